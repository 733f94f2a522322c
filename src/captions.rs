use async_trait::async_trait;
use log::debug;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Deserialize;

use crate::config::ProviderConfig;
use crate::error::TranscriptError;
use crate::{CaptionCatalog, CaptionTrack, DEFAULT_LANGUAGE, VideoId};

/// Where caption tracks and timed-text documents come from.
///
/// Each call is a single attempt; retry policy belongs to the caller.
#[async_trait]
pub trait CaptionSource: Send + Sync {
    /// List the caption tracks the provider advertises for `video_id`.
    ///
    /// Fails with `UpstreamUnavailable` on transport errors, non-2xx
    /// statuses or malformed payloads, and with `NoCaptionsFound` when the
    /// payload is well-formed but lists no tracks.
    async fn list_caption_tracks(&self, video_id: &VideoId) -> Result<CaptionCatalog, TranscriptError>;

    /// Download `track` and flatten it to newline-joined plain text.
    async fn fetch_and_flatten(&self, track: &CaptionTrack) -> Result<String, TranscriptError>;
}

#[derive(Debug, Deserialize)]
struct SubtitlesResponse {
    /// Absent and `null` both mean the video has no captions
    #[serde(default)]
    subtitles: Option<Vec<CaptionTrack>>,
    #[serde(default)]
    title: Option<String>,
}

/// Caption provider reached over HTTP with static API-key headers
pub struct HttpCaptionClient {
    client: reqwest::Client,
    base_url: String,
    host: String,
    api_key: String,
}

impl HttpCaptionClient {
    pub fn new(client: reqwest::Client, provider: &ProviderConfig) -> Self {
        Self {
            client,
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            host: provider.host.clone(),
            api_key: provider.api_key.clone().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl CaptionSource for HttpCaptionClient {
    async fn list_caption_tracks(&self, video_id: &VideoId) -> Result<CaptionCatalog, TranscriptError> {
        let url = format!("{}/subtitles", self.base_url);
        debug!("Fetching caption catalog: {url}?id={video_id}");

        let upstream = |reason: String| TranscriptError::UpstreamUnavailable { reason };

        let resp = self
            .client
            .get(&url)
            .query(&[("id", video_id.as_str())])
            .header("X-RapidAPI-Key", &self.api_key)
            .header("X-RapidAPI-Host", &self.host)
            .send()
            .await
            .map_err(|e| upstream(format!("request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| upstream(format!("reading response failed: {e}")))?;

        if !status.is_success() {
            return Err(upstream(format!("provider returned {status}: {}", snippet(&body))));
        }

        let parsed: SubtitlesResponse =
            serde_json::from_str(&body).map_err(|e| upstream(format!("malformed catalog payload: {e}")))?;

        let tracks = parsed.subtitles.unwrap_or_default();
        if tracks.is_empty() {
            return Err(TranscriptError::NoCaptionsFound {
                video_id: video_id.to_string(),
            });
        }

        debug!("Provider listed {} caption track(s) for {video_id}", tracks.len());
        Ok(CaptionCatalog {
            title: parsed.title.filter(|t| !t.trim().is_empty()),
            tracks,
        })
    }

    async fn fetch_and_flatten(&self, track: &CaptionTrack) -> Result<String, TranscriptError> {
        debug!("Fetching caption document: lang={} url={}", track.language_code, track.source_url);

        let failed = |reason: String| TranscriptError::FetchFailed { reason };

        let resp = self
            .client
            .get(&track.source_url)
            .send()
            .await
            .map_err(|e| failed(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(failed(format!("caption server returned {status}")));
        }

        let xml = resp
            .text()
            .await
            .map_err(|e| failed(format!("reading caption document failed: {e}")))?;

        flatten_caption_xml(&xml)
    }
}

/// Pick the caption track to transcribe.
///
/// Policy: default to English. An exact `en` track wins, then the first
/// regional `en-*` track, then whatever the provider listed first. This is
/// not locale-aware and ignores any user language preference. `None` only
/// for an empty slice.
pub fn select_track(tracks: &[CaptionTrack]) -> Option<&CaptionTrack> {
    let regional = format!("{DEFAULT_LANGUAGE}-");
    tracks
        .iter()
        .find(|t| t.language_code == DEFAULT_LANGUAGE)
        .or_else(|| tracks.iter().find(|t| t.language_code.starts_with(&regional)))
        .or_else(|| tracks.first())
}

/// The track whose code is exactly `language_code`, if the provider lists one
pub fn select_language<'a>(tracks: &'a [CaptionTrack], language_code: &str) -> Option<&'a CaptionTrack> {
    tracks.iter().find(|t| t.language_code == language_code)
}

/// Flatten a timed-text document into its caption lines joined by `\n`.
pub fn flatten_caption_xml(xml: &str) -> Result<String, TranscriptError> {
    let segments = parse_caption_xml(xml).map_err(|reason| TranscriptError::MalformedCaptionDocument { reason })?;

    if segments.is_empty() {
        return Err(TranscriptError::MalformedCaptionDocument {
            reason: "document has no <text> segments".to_string(),
        });
    }

    debug!("Parsed {} caption segment(s)", segments.len());
    Ok(segments.join("\n"))
}

/// Text content of every `<text>` element in document order; blank ones are dropped.
///
/// A document that ends with elements still open was cut off in transit and
/// is rejected rather than returned as a partial transcript.
fn parse_caption_xml(xml: &str) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut segments = Vec::new();
    let mut current = String::new();
    // elements open anywhere in the document
    let mut open = 0usize;
    // nesting depth inside the current <text> element, 0 when outside
    let mut depth = 0usize;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| format!("invalid timed-text XML: {e}"))?;
        match event {
            Event::Start(e) => {
                open += 1;
                if depth > 0 {
                    depth += 1;
                } else if e.name().as_ref() == b"text" {
                    current.clear();
                    depth = 1;
                }
            }
            Event::End(_) => {
                open = open.saturating_sub(1);
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 && !current.trim().is_empty() {
                        segments.push(std::mem::take(&mut current));
                    }
                }
            }
            Event::Text(e) if depth > 0 => {
                // Timed text is often double-escaped (`&amp;#39;`), so decode
                // HTML entities after the XML pass.
                let raw = match e.unescape() {
                    Ok(text) => text.into_owned(),
                    Err(_) => String::from_utf8_lossy(&e).into_owned(),
                };
                current.push_str(&html_escape::decode_html_entities(&raw));
            }
            Event::CData(e) if depth > 0 => {
                current.push_str(&String::from_utf8_lossy(&e));
            }
            Event::Eof if open > 0 => {
                return Err(format!("timed-text document truncated with {open} element(s) still open"));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(segments)
}

fn snippet(body: &str) -> String {
    const MAX: usize = 200;
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
