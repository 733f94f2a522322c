pub mod captions;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod state;
pub mod store;
pub mod summarize;

#[cfg(test)]
mod testing;

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use error::{ErrorKind, ErrorReport, TranscriptError};

/// Language code the dedup lookup is keyed on before any network call.
pub const DEFAULT_LANGUAGE: &str = "en";

/// A YouTube video identifier: exactly 11 characters of `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VideoId(String);

impl VideoId {
    pub const LEN: usize = 11;

    pub fn parse(token: &str) -> Option<Self> {
        let valid = token.len() == Self::LEN
            && token
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        valid.then(|| VideoId(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VideoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VideoId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        VideoId::parse(&value).ok_or_else(|| format!("invalid video id: {value:?}"))
    }
}

impl From<VideoId> for String {
    fn from(id: VideoId) -> Self {
        id.0
    }
}

/// One language variant advertised by the caption provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionTrack {
    #[serde(default)]
    pub language_name: String,
    pub language_code: String,
    #[serde(default)]
    pub is_translatable: bool,
    #[serde(rename = "url")]
    pub source_url: String,
}

/// Caption tracks for one video, in provider order
#[derive(Debug, Clone, Default)]
pub struct CaptionCatalog {
    pub title: Option<String>,
    pub tracks: Vec<CaptionTrack>,
}

/// A stored transcript row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub id: String,
    #[serde(rename = "user_id", default)]
    pub owner_user_id: Option<String>,
    pub video_id: VideoId,
    pub video_url: String,
    #[serde(default)]
    pub video_title: Option<String>,
    #[serde(rename = "language")]
    pub language_code: String,
    pub content: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied on insert; the backend assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTranscript {
    #[serde(rename = "user_id")]
    pub owner_user_id: Option<String>,
    pub video_id: VideoId,
    pub video_url: String,
    pub video_title: Option<String>,
    #[serde(rename = "language")]
    pub language_code: String,
    pub content: String,
}

static VIDEO_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:youtube\.com/(?:[^/\s]+/(?:[^\s]*?/)?(?:v|e(?:mbed)?)/|(?:v|e(?:mbed)?|shorts)/|[^\s]*?[?&]v=)|youtu\.be/)([A-Za-z0-9_-]{11})(?:["&?/#\s]|$)"#,
    )
    .unwrap()
});

/// Extract the video ID from a watch, embed, `/v/`, shorts or youtu.be URL.
///
/// The 11-character token must directly follow a recognised marker and be
/// terminated by `"`, `&`, `?`, `/`, `#`, whitespace or the end of input.
/// Extra path segments may precede a `/v/` or `/embed/` marker. The first
/// marked token wins. Pure; never touches the network.
pub fn extract_video_id(url: &str) -> Option<VideoId> {
    let caps = VIDEO_ID_RE.captures(url.trim())?;
    VideoId::parse(&caps[1])
}
