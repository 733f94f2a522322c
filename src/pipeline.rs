use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;

use crate::captions::{CaptionSource, select_language, select_track};
use crate::error::{ErrorKind, ErrorReport, TranscriptError};
use crate::store::TranscriptStore;
use crate::{DEFAULT_LANGUAGE, NewTranscript, Transcript, VideoId, extract_video_id};

/// Network-bound phase the generator is in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Resolving the video ID and checking storage for an existing transcript
    Resolving,
    /// Talking to the caption provider
    Fetching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Already stored; the caption provider was not contacted for the document
    Cached,
    /// Fetched and inserted by this request
    Created,
}

#[derive(Debug, Clone)]
pub struct Generated {
    pub transcript: Transcript,
    pub origin: Origin,
}

/// A failed generate request.
///
/// When the insert was refused by the daily quota, `unsaved` carries the
/// fully fetched transcript so it can still be shown; it was not stored.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct GenerateFailure {
    #[source]
    pub error: TranscriptError,
    pub unsaved: Option<NewTranscript>,
}

impl GenerateFailure {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    pub fn report(&self) -> ErrorReport {
        self.error.report()
    }

    pub fn unsaved_content(&self) -> Option<&str> {
        self.unsaved.as_ref().map(|t| t.content.as_str())
    }
}

impl From<TranscriptError> for GenerateFailure {
    fn from(error: TranscriptError) -> Self {
        Self { error, unsaved: None }
    }
}

/// Runs the resolve → dedup → catalog → select → fetch → insert pipeline
#[derive(Clone)]
pub struct Generator {
    captions: Arc<dyn CaptionSource>,
    store: Arc<dyn TranscriptStore>,
    /// Exact caption language to use instead of the English-default policy
    language: Option<String>,
}

impl Generator {
    pub fn new(captions: Arc<dyn CaptionSource>, store: Arc<dyn TranscriptStore>) -> Self {
        Self {
            captions,
            store,
            language: None,
        }
    }

    /// Ask for one specific caption language; the request fails with
    /// `NoCaptionsFound` when the video has no track with exactly that code.
    pub fn with_language(mut self, language_code: impl Into<String>) -> Self {
        self.language = Some(language_code.into()).filter(|code: &String| !code.trim().is_empty());
        self
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn store(&self) -> &Arc<dyn TranscriptStore> {
        &self.store
    }

    pub async fn generate(&self, url: &str, owner: Option<&str>) -> Result<Generated, GenerateFailure> {
        self.generate_with(url, owner, |_| {}).await
    }

    /// Like [`Generator::generate`], reporting each stage to `on_stage`.
    ///
    /// Every external call is awaited in sequence, and the insert happens only
    /// once the complete content is in hand.
    pub async fn generate_with(
        &self,
        url: &str,
        owner: Option<&str>,
        mut on_stage: impl FnMut(Stage) + Send,
    ) -> Result<Generated, GenerateFailure> {
        on_stage(Stage::Resolving);

        let video_id = extract_video_id(url).ok_or_else(|| TranscriptError::InvalidUrl {
            url: url.trim().to_string(),
        })?;
        debug!("Resolved {url} to video {video_id}");

        let wanted = self.language.as_deref().unwrap_or(DEFAULT_LANGUAGE);
        if let Some(existing) = self.lookup(&video_id, wanted).await? {
            info!("Cache hit: {video_id} ({wanted}) stored as {}", existing.id);
            return Ok(Generated {
                transcript: existing,
                origin: Origin::Cached,
            });
        }

        on_stage(Stage::Fetching);

        let catalog = self.captions.list_caption_tracks(&video_id).await?;
        let selected = match &self.language {
            Some(code) => select_language(&catalog.tracks, code),
            None => select_track(&catalog.tracks),
        };
        let Some(track) = selected else {
            warn!(
                "No caption track for {video_id} in {wanted}; available: {}",
                catalog
                    .tracks
                    .iter()
                    .map(|t| t.language_code.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            return Err(TranscriptError::NoCaptionsFound {
                video_id: video_id.to_string(),
            }
            .into());
        };
        debug!("Selected caption track: lang={}", track.language_code);

        // A fallback pick has its own dedup key
        if track.language_code != wanted {
            if let Some(existing) = self.lookup(&video_id, &track.language_code).await? {
                info!("Cache hit: {video_id} ({}) stored as {}", track.language_code, existing.id);
                return Ok(Generated {
                    transcript: existing,
                    origin: Origin::Cached,
                });
            }
        }

        let content = self.captions.fetch_and_flatten(track).await?;

        let new = NewTranscript {
            owner_user_id: owner.map(str::to_string),
            video_id,
            video_url: url.trim().to_string(),
            video_title: catalog.title.clone(),
            language_code: track.language_code.clone(),
            content,
        };

        match self.store.insert(new.clone()).await {
            Ok(transcript) => {
                info!("Saved transcript {} for {}", transcript.id, transcript.video_id);
                Ok(Generated {
                    transcript,
                    origin: Origin::Created,
                })
            }
            Err(e) => {
                let error = TranscriptError::from(e);
                let unsaved = if error.kind() == ErrorKind::DailyLimitReached {
                    warn!("Not saving {}: {error}", new.video_id);
                    Some(new)
                } else {
                    None
                };
                Err(GenerateFailure { error, unsaved })
            }
        }
    }

    async fn lookup(&self, video_id: &VideoId, language_code: &str) -> Result<Option<Transcript>, TranscriptError> {
        let mut rows = self.store.find(video_id, language_code).await?;
        if rows.len() > 1 {
            warn!("{} stored rows for ({video_id}, {language_code})", rows.len());
        }
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::store::{LocalStore, StoreError};
    use crate::{CaptionCatalog, CaptionTrack};

    type CatalogFn = fn(&VideoId) -> Result<CaptionCatalog, TranscriptError>;
    type DocumentFn = fn(&CaptionTrack) -> Result<String, TranscriptError>;

    pub(crate) struct FakeCaptions {
        catalog: CatalogFn,
        document: DocumentFn,
        pub catalog_calls: AtomicUsize,
        pub document_calls: AtomicUsize,
    }

    impl FakeCaptions {
        pub(crate) fn new(catalog: CatalogFn, document: DocumentFn) -> Arc<Self> {
            Arc::new(Self {
                catalog,
                document,
                catalog_calls: AtomicUsize::new(0),
                document_calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn english() -> Arc<Self> {
            Self::new(|_| Ok(catalog_of(&["fr", "en"])), |_| Ok("Hello\nworld".to_string()))
        }

        pub(crate) fn calls(&self) -> (usize, usize) {
            (
                self.catalog_calls.load(Ordering::SeqCst),
                self.document_calls.load(Ordering::SeqCst),
            )
        }
    }

    #[async_trait]
    impl CaptionSource for FakeCaptions {
        async fn list_caption_tracks(&self, video_id: &VideoId) -> Result<CaptionCatalog, TranscriptError> {
            self.catalog_calls.fetch_add(1, Ordering::SeqCst);
            (self.catalog)(video_id)
        }

        async fn fetch_and_flatten(&self, track: &CaptionTrack) -> Result<String, TranscriptError> {
            self.document_calls.fetch_add(1, Ordering::SeqCst);
            (self.document)(track)
        }
    }

    pub(crate) fn catalog_of(codes: &[&str]) -> CaptionCatalog {
        CaptionCatalog {
            title: Some("Test Video".to_string()),
            tracks: codes
                .iter()
                .map(|code| CaptionTrack {
                    language_name: code.to_string(),
                    language_code: code.to_string(),
                    is_translatable: true,
                    source_url: format!("https://captions.test/{code}"),
                })
                .collect(),
        }
    }

    fn fixed_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    const URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    fn generator(captions: Arc<FakeCaptions>, store: Arc<LocalStore>) -> Generator {
        Generator::new(captions, store)
    }

    #[tokio::test]
    async fn test_invalid_url_makes_no_calls() {
        let captions = FakeCaptions::english();
        let store = Arc::new(LocalStore::in_memory(10));
        let failure = generator(captions.clone(), store)
            .generate("https://example.com", Some("alice"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::InvalidUrl);
        assert!(failure.unsaved.is_none());
        assert_eq!(captions.calls(), (0, 0));
    }

    #[tokio::test]
    async fn test_creates_then_serves_from_cache() {
        let captions = FakeCaptions::english();
        let store = Arc::new(LocalStore::in_memory(10));
        let generator = generator(captions.clone(), store.clone());

        let first = generator.generate(URL, Some("alice")).await.unwrap();
        assert_eq!(first.origin, Origin::Created);
        assert_eq!(first.transcript.content, "Hello\nworld");
        assert_eq!(first.transcript.language_code, "en");
        assert_eq!(first.transcript.video_title.as_deref(), Some("Test Video"));
        assert_eq!(first.transcript.video_url, URL);
        assert_eq!(captions.calls(), (1, 1));

        let second = generator
            .generate("https://youtu.be/dQw4w9WgXcQ", Some("alice"))
            .await
            .unwrap();
        assert_eq!(second.origin, Origin::Cached);
        assert_eq!(second.transcript, first.transcript);
        assert_eq!(captions.calls(), (1, 1));

        let id = VideoId::parse("dQw4w9WgXcQ").unwrap();
        assert_eq!(store.find(&id, "en").await.unwrap().len(), 1);
        assert_eq!(store.usage_today("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stored_content_round_trips() {
        let captions = FakeCaptions::new(
            |_| Ok(catalog_of(&["en"])),
            |_| Ok("it's a \"test\"\n  spaced  \nend".to_string()),
        );
        let store = Arc::new(LocalStore::in_memory(10));
        let created = generator(captions, store.clone()).generate(URL, None).await.unwrap();

        let loaded = store.get(&created.transcript.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, "it's a \"test\"\n  spaced  \nend");
        assert!(loaded.owner_user_id.is_none());
    }

    #[tokio::test]
    async fn test_eleventh_insert_hits_daily_limit_but_returns_content() {
        let captions = FakeCaptions::english();
        let store = Arc::new(LocalStore::in_memory(10).with_clock(fixed_noon));
        for n in 0..10 {
            store
                .insert(NewTranscript {
                    owner_user_id: Some("alice".to_string()),
                    video_id: VideoId::parse(&format!("video{n:06}")).unwrap(),
                    video_url: String::new(),
                    video_title: None,
                    language_code: "en".to_string(),
                    content: "x".to_string(),
                })
                .await
                .unwrap();
        }

        let failure = generator(captions.clone(), store.clone())
            .generate(URL, Some("alice"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::DailyLimitReached);
        assert_eq!(failure.unsaved_content(), Some("Hello\nworld"));
        assert_eq!(captions.calls(), (1, 1));

        let id = VideoId::parse("dQw4w9WgXcQ").unwrap();
        assert!(store.find(&id, "en").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failure_propagates() {
        let captions = FakeCaptions::new(
            |_| {
                Err(TranscriptError::UpstreamUnavailable {
                    reason: "503".to_string(),
                })
            },
            |_| unreachable!(),
        );
        let store = Arc::new(LocalStore::in_memory(10));
        let failure = generator(captions.clone(), store).generate(URL, None).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::UpstreamUnavailable);
        assert_eq!(captions.calls(), (1, 0));
    }

    #[tokio::test]
    async fn test_empty_catalog_is_no_captions() {
        let captions = FakeCaptions::new(|_| Ok(CaptionCatalog::default()), |_| unreachable!());
        let store = Arc::new(LocalStore::in_memory(10));
        let failure = generator(captions, store).generate(URL, None).await.unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::NoCaptionsFound);
    }

    #[tokio::test]
    async fn test_fetch_failure_saves_nothing() {
        let captions = FakeCaptions::new(
            |_| Ok(catalog_of(&["en"])),
            |_| {
                Err(TranscriptError::MalformedCaptionDocument {
                    reason: "no segments".to_string(),
                })
            },
        );
        let store = Arc::new(LocalStore::in_memory(10));
        let failure = generator(captions, store.clone())
            .generate(URL, Some("alice"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::MalformedCaptionDocument);
        assert!(failure.unsaved.is_none());
        assert!(store.list_by_owner("alice").await.unwrap().is_empty());
        assert_eq!(store.usage_today("alice").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_english_track_is_deduplicated_by_its_own_code() {
        let captions = FakeCaptions::new(|_| Ok(catalog_of(&["fr", "de"])), |_| Ok("Bonjour".to_string()));
        let store = Arc::new(LocalStore::in_memory(10));
        let generator = generator(captions.clone(), store.clone());

        let first = generator.generate(URL, None).await.unwrap();
        assert_eq!(first.origin, Origin::Created);
        assert_eq!(first.transcript.language_code, "fr");

        let second = generator.generate(URL, None).await.unwrap();
        assert_eq!(second.origin, Origin::Cached);
        assert_eq!(second.transcript.id, first.transcript.id);
        assert_eq!(captions.calls(), (2, 1));
    }

    #[tokio::test]
    async fn test_requested_language_selects_exact_track() {
        let captions = FakeCaptions::new(
            |_| Ok(catalog_of(&["en", "de", "de-AT"])),
            |track| Ok(format!("text for {}", track.language_code)),
        );
        let store = Arc::new(LocalStore::in_memory(10));
        let generator = generator(captions.clone(), store.clone()).with_language("de");
        assert_eq!(generator.language(), Some("de"));

        let first = generator.generate(URL, None).await.unwrap();
        assert_eq!(first.origin, Origin::Created);
        assert_eq!(first.transcript.language_code, "de");
        assert_eq!(first.transcript.content, "text for de");

        // the stored German row is found before any provider call
        let second = generator.generate(URL, None).await.unwrap();
        assert_eq!(second.origin, Origin::Cached);
        assert_eq!(second.transcript.id, first.transcript.id);
        assert_eq!(captions.calls(), (1, 1));
    }

    #[tokio::test]
    async fn test_requested_language_missing_is_no_captions() {
        let captions = FakeCaptions::english();
        let store = Arc::new(LocalStore::in_memory(10));
        let failure = generator(captions.clone(), store)
            .with_language("ja")
            .generate(URL, Some("alice"))
            .await
            .unwrap_err();
        assert_eq!(failure.kind(), ErrorKind::NoCaptionsFound);
        assert_eq!(captions.calls(), (1, 0));
    }

    #[tokio::test]
    async fn test_blank_language_keeps_english_default() {
        let captions = FakeCaptions::english();
        let store = Arc::new(LocalStore::in_memory(10));
        let generator = generator(captions, store).with_language("  ");
        assert_eq!(generator.language(), None);
        let created = generator.generate(URL, None).await.unwrap();
        assert_eq!(created.transcript.language_code, "en");
    }

    #[tokio::test]
    async fn test_stages_reported_in_order() {
        let captions = FakeCaptions::english();
        let store = Arc::new(LocalStore::in_memory(10));
        let generator = generator(captions, store);

        let mut stages = Vec::new();
        generator
            .generate_with(URL, None, |stage| stages.push(stage))
            .await
            .unwrap();
        assert_eq!(stages, vec![Stage::Resolving, Stage::Fetching]);

        let mut stages = Vec::new();
        generator
            .generate_with(URL, None, |stage| stages.push(stage))
            .await
            .unwrap();
        assert_eq!(stages, vec![Stage::Resolving]);
    }

    struct RejectingStore;

    #[async_trait]
    impl TranscriptStore for RejectingStore {
        async fn find(&self, _: &VideoId, _: &str) -> Result<Vec<Transcript>, StoreError> {
            Ok(Vec::new())
        }

        async fn insert(&self, _: NewTranscript) -> Result<Transcript, StoreError> {
            Err(StoreError::Rejected {
                code: "23514".to_string(),
                message: "Daily limit of 10 transcripts reached".to_string(),
            })
        }

        async fn get(&self, _: &str) -> Result<Option<Transcript>, StoreError> {
            Ok(None)
        }

        async fn update_summary(&self, id: &str, _: &str) -> Result<Transcript, StoreError> {
            Err(StoreError::NotFound { id: id.to_string() })
        }

        async fn delete(&self, id: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::NotFound { id: id.to_string() })
        }

        async fn list_by_owner(&self, _: &str) -> Result<Vec<Transcript>, StoreError> {
            Ok(Vec::new())
        }

        async fn list_community(&self) -> Result<Vec<Transcript>, StoreError> {
            Ok(Vec::new())
        }

        async fn usage_today(&self, _: &str) -> Result<u32, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_other_insert_rejection_is_storage_error() {
        let generator = Generator::new(FakeCaptions::english(), Arc::new(RejectingStore));
        let failure = generator.generate(URL, Some("alice")).await.unwrap_err();
        // the message mentions a daily limit, but only the code decides the kind
        assert_eq!(failure.kind(), ErrorKind::StorageError);
        assert!(failure.unsaved.is_none());
        assert!(failure.to_string().contains("23514"));
    }
}
