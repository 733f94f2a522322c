use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, warn};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StoreConfig;
use crate::{NewTranscript, Transcript, VideoId};

#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend refused the insert because the owner's daily quota is used up
    #[error("daily limit of {limit} transcripts reached")]
    DailyLimitReached { limit: u32 },

    #[error("transcript {id} not found")]
    NotFound { id: String },

    #[error("backend rejected request [{code}]: {message}")]
    Rejected { code: String, message: String },

    #[error("backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Data-access handle for stored transcripts.
///
/// Constructed once at startup and passed to whoever needs it; call
/// [`TranscriptStore::close`] before shutdown.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Dedup lookup by (video, language)
    async fn find(&self, video_id: &VideoId, language_code: &str) -> Result<Vec<Transcript>, StoreError>;

    /// Insert a new row, subject to the owner's daily quota
    async fn insert(&self, new: NewTranscript) -> Result<Transcript, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Transcript>, StoreError>;

    /// Attach or replace the summary of an existing row
    async fn update_summary(&self, id: &str, summary: &str) -> Result<Transcript, StoreError>;

    /// Delete a row owned by `owner`; rows owned by someone else are `NotFound`
    async fn delete(&self, id: &str, owner: &str) -> Result<(), StoreError>;

    /// The owner's transcripts, newest first
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Transcript>, StoreError>;

    /// Ownerless transcripts, newest first
    async fn list_community(&self) -> Result<Vec<Transcript>, StoreError>;

    /// Successful inserts by `owner` on the current UTC day
    async fn usage_today(&self, owner: &str) -> Result<u32, StoreError>;

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UsageRow {
    user_id: Option<String>,
    date: NaiveDate,
    count: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LocalState {
    transcripts: Vec<Transcript>,
    usage: Vec<UsageRow>,
}

impl LocalState {
    fn usage_mut(&mut self, owner: Option<&str>, date: NaiveDate) -> &mut UsageRow {
        let pos = self
            .usage
            .iter()
            .position(|u| u.user_id.as_deref() == owner && u.date == date);
        match pos {
            Some(pos) => &mut self.usage[pos],
            None => {
                self.usage.push(UsageRow {
                    user_id: owner.map(str::to_string),
                    date,
                    count: 0,
                });
                let last = self.usage.len() - 1;
                &mut self.usage[last]
            }
        }
    }

    fn usage_on(&self, owner: Option<&str>, date: NaiveDate) -> u32 {
        self.usage
            .iter()
            .find(|u| u.user_id.as_deref() == owner && u.date == date)
            .map_or(0, |u| u.count)
    }
}

/// Self-contained backend: rows and usage counters in memory, optionally
/// mirrored to a JSON file after every mutation.
///
/// Enforces the same rules as the hosted backend: one row per
/// (video, language) and at most `daily_limit` inserts per owner per UTC
/// day. Anonymous inserts share a single bucket. Deleting a row does not
/// give quota back.
///
/// File writes are synchronous and happen under the state lock, which suits
/// a single CLI process; it is not meant to be shared between processes.
pub struct LocalStore {
    state: Mutex<LocalState>,
    path: Option<PathBuf>,
    daily_limit: u32,
    clock: Clock,
}

impl LocalStore {
    pub fn in_memory(daily_limit: u32) -> Self {
        Self {
            state: Mutex::new(LocalState::default()),
            path: None,
            daily_limit,
            clock: Box::new(Utc::now),
        }
    }

    /// Open (or start) a store persisted at `path`
    pub fn open(path: &Path, daily_limit: u32) -> Result<Self, StoreError> {
        let state = if path.exists() {
            debug!("Loading local store from {}", path.display());
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str(&data)?
        } else {
            debug!("No local store at {}, starting empty", path.display());
            LocalState::default()
        };
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path.to_path_buf()),
            daily_limit,
            clock: Box::new(Utc::now),
        })
    }

    pub fn from_config(config: &StoreConfig, path: &Path) -> Result<Self, StoreError> {
        Self::open(path, config.daily_limit)
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, state: &LocalState) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(state)?;
        // write beside the target and rename over it, so a crash mid-write
        // leaves the previous file intact
        let tmp = temp_path(path);
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;
        debug!("Saved local store: {}", path.display());
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn newest_first(mut rows: Vec<Transcript>) -> Vec<Transcript> {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    rows
}

#[async_trait]
impl TranscriptStore for LocalStore {
    async fn find(&self, video_id: &VideoId, language_code: &str) -> Result<Vec<Transcript>, StoreError> {
        let state = self.lock();
        Ok(state
            .transcripts
            .iter()
            .filter(|t| &t.video_id == video_id && t.language_code == language_code)
            .cloned()
            .collect())
    }

    async fn insert(&self, new: NewTranscript) -> Result<Transcript, StoreError> {
        if new.content.trim().is_empty() {
            return Err(StoreError::Rejected {
                code: "empty_content".to_string(),
                message: "transcript content must not be empty".to_string(),
            });
        }

        let now = (self.clock)();
        let today = now.date_naive();
        let mut state = self.lock();

        if state
            .transcripts
            .iter()
            .any(|t| t.video_id == new.video_id && t.language_code == new.language_code)
        {
            return Err(StoreError::Rejected {
                code: "unique_violation".to_string(),
                message: format!(
                    "a transcript for ({}, {}) already exists",
                    new.video_id, new.language_code
                ),
            });
        }

        let owner = new.owner_user_id.as_deref();
        if state.usage_on(owner, today) >= self.daily_limit {
            warn!("Daily limit reached for {}", owner.unwrap_or("anonymous"));
            return Err(StoreError::DailyLimitReached {
                limit: self.daily_limit,
            });
        }

        let transcript = Transcript {
            id: uuid::Uuid::new_v4().to_string(),
            owner_user_id: new.owner_user_id,
            video_id: new.video_id,
            video_url: new.video_url,
            video_title: new.video_title,
            language_code: new.language_code,
            content: new.content,
            summary: None,
            created_at: now,
        };

        let owner = transcript.owner_user_id.clone();
        state.usage_mut(owner.as_deref(), today).count += 1;
        state.transcripts.push(transcript.clone());

        if let Err(e) = self.persist(&state) {
            state.transcripts.pop();
            state.usage_mut(owner.as_deref(), today).count -= 1;
            return Err(e);
        }

        Ok(transcript)
    }

    async fn get(&self, id: &str) -> Result<Option<Transcript>, StoreError> {
        let state = self.lock();
        Ok(state.transcripts.iter().find(|t| t.id == id).cloned())
    }

    async fn update_summary(&self, id: &str, summary: &str) -> Result<Transcript, StoreError> {
        let mut state = self.lock();
        let Some(row) = state.transcripts.iter_mut().find(|t| t.id == id) else {
            return Err(StoreError::NotFound { id: id.to_string() });
        };
        let previous = row.summary.replace(summary.to_string());
        let updated = row.clone();

        if let Err(e) = self.persist(&state) {
            if let Some(row) = state.transcripts.iter_mut().find(|t| t.id == id) {
                row.summary = previous;
            }
            return Err(e);
        }
        Ok(updated)
    }

    async fn delete(&self, id: &str, owner: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        let Some(pos) = state
            .transcripts
            .iter()
            .position(|t| t.id == id && t.owner_user_id.as_deref() == Some(owner))
        else {
            return Err(StoreError::NotFound { id: id.to_string() });
        };
        let removed = state.transcripts.remove(pos);

        if let Err(e) = self.persist(&state) {
            state.transcripts.insert(pos, removed);
            return Err(e);
        }
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Transcript>, StoreError> {
        let state = self.lock();
        let rows = state
            .transcripts
            .iter()
            .filter(|t| t.owner_user_id.as_deref() == Some(owner))
            .cloned()
            .collect();
        Ok(newest_first(rows))
    }

    async fn list_community(&self) -> Result<Vec<Transcript>, StoreError> {
        let state = self.lock();
        let rows = state
            .transcripts
            .iter()
            .filter(|t| t.owner_user_id.is_none())
            .cloned()
            .collect();
        Ok(newest_first(rows))
    }

    async fn usage_today(&self, owner: &str) -> Result<u32, StoreError> {
        let today = (self.clock)().date_naive();
        Ok(self.lock().usage_on(Some(owner), today))
    }

    async fn close(&self) -> Result<(), StoreError> {
        let state = self.lock();
        self.persist(&state)
    }
}

/// Error body returned by the hosted backend's REST layer
#[derive(Debug, Deserialize)]
struct BackendError {
    code: Option<String>,
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageCount {
    count: u32,
}

/// Hosted Postgres backend reached through its REST interface.
///
/// Quota enforcement happens server-side; a rejection is recognised only by
/// the error `code` in the response body matching the configured quota code.
pub struct RestStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
    quota_code: String,
    daily_limit: u32,
}

impl RestStore {
    pub fn new(client: reqwest::Client, url: &str, config: &StoreConfig) -> Self {
        Self {
            client,
            base_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            api_key: config.api_key.clone().unwrap_or_default(),
            access_token: config.access_token.clone(),
            quota_code: config.quota_code.clone(),
            daily_limit: config.daily_limit,
        }
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.client
            .request(method, format!("{}/{table}", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(bearer)
    }

    async fn rows<T: serde::de::DeserializeOwned>(&self, req: RequestBuilder) -> Result<Vec<T>, StoreError> {
        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(self.classify(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&body)?)
    }

    fn classify(&self, status: StatusCode, body: &str) -> StoreError {
        match serde_json::from_str::<BackendError>(body) {
            Ok(err) if err.code.as_deref() == Some(self.quota_code.as_str()) => {
                warn!("Backend rejected insert with quota code {}", self.quota_code);
                StoreError::DailyLimitReached {
                    limit: self.daily_limit,
                }
            }
            Ok(err) => {
                let mut message = err.message.unwrap_or_else(|| status.to_string());
                if let Some(details) = err.details.filter(|d| !d.is_empty()) {
                    message = format!("{message} ({details})");
                }
                StoreError::Rejected {
                    code: err.code.unwrap_or_else(|| status.as_u16().to_string()),
                    message,
                }
            }
            Err(_) => StoreError::Rejected {
                code: status.as_u16().to_string(),
                message: if body.trim().is_empty() {
                    status.to_string()
                } else {
                    body.trim().to_string()
                },
            },
        }
    }
}

#[async_trait]
impl TranscriptStore for RestStore {
    async fn find(&self, video_id: &VideoId, language_code: &str) -> Result<Vec<Transcript>, StoreError> {
        debug!("Looking up stored transcript for ({video_id}, {language_code})");
        let req = self.request(Method::GET, "transcripts").query(&[
            ("select", "*".to_string()),
            ("video_id", format!("eq.{video_id}")),
            ("language", format!("eq.{language_code}")),
        ]);
        self.rows(req).await
    }

    async fn insert(&self, new: NewTranscript) -> Result<Transcript, StoreError> {
        debug!("Inserting transcript for ({}, {})", new.video_id, new.language_code);
        let req = self
            .request(Method::POST, "transcripts")
            .header("Prefer", "return=representation")
            .json(&new);
        self.rows(req)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Rejected {
                code: "empty_response".to_string(),
                message: "insert returned no row".to_string(),
            })
    }

    async fn get(&self, id: &str) -> Result<Option<Transcript>, StoreError> {
        let req = self
            .request(Method::GET, "transcripts")
            .query(&[("select", "*".to_string()), ("id", format!("eq.{id}"))]);
        Ok(self.rows(req).await?.into_iter().next())
    }

    async fn update_summary(&self, id: &str, summary: &str) -> Result<Transcript, StoreError> {
        let req = self
            .request(Method::PATCH, "transcripts")
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(&serde_json::json!({ "summary": summary }));
        self.rows(req)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn delete(&self, id: &str, owner: &str) -> Result<(), StoreError> {
        let req = self
            .request(Method::DELETE, "transcripts")
            .query(&[("id", format!("eq.{id}")), ("user_id", format!("eq.{owner}"))])
            .header("Prefer", "return=representation");
        let removed: Vec<Transcript> = self.rows(req).await?;
        if removed.is_empty() {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Transcript>, StoreError> {
        let req = self.request(Method::GET, "transcripts").query(&[
            ("select", "*".to_string()),
            ("user_id", format!("eq.{owner}")),
            ("order", "created_at.desc".to_string()),
        ]);
        self.rows(req).await
    }

    async fn list_community(&self) -> Result<Vec<Transcript>, StoreError> {
        let req = self.request(Method::GET, "transcripts").query(&[
            ("select", "*"),
            ("user_id", "is.null"),
            ("order", "created_at.desc"),
        ]);
        self.rows(req).await
    }

    async fn usage_today(&self, owner: &str) -> Result<u32, StoreError> {
        let today = Utc::now().date_naive();
        let req = self.request(Method::GET, "daily_usage").query(&[
            ("select", "count".to_string()),
            ("user_id", format!("eq.{owner}")),
            ("date", format!("eq.{today}")),
        ]);
        let rows: Vec<UsageCount> = self.rows(req).await?;
        Ok(rows.first().map_or(0, |r| r.count))
    }
}
