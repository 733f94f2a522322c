use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Failure of a transcript request, one variant per user-visible kind.
#[derive(Error, Debug)]
pub enum TranscriptError {
    #[error("could not find a YouTube video ID in {url:?}")]
    InvalidUrl { url: String },

    #[error("caption provider unavailable: {reason}")]
    UpstreamUnavailable { reason: String },

    #[error("no captions available for video {video_id}")]
    NoCaptionsFound { video_id: String },

    #[error("failed to fetch caption document: {reason}")]
    FetchFailed { reason: String },

    #[error("caption document contained no text: {reason}")]
    MalformedCaptionDocument { reason: String },

    #[error("daily limit of {limit} transcripts reached")]
    DailyLimitReached { limit: u32 },

    #[error("storage error: {message}")]
    StorageError { message: String },

    #[error("transcript {id} not found")]
    NotFound { id: String },

    #[error("summary generation failed: {reason}")]
    SummaryFailed { reason: String },
}

/// Stable, message-independent classification of a [`TranscriptError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,
    UpstreamUnavailable,
    NoCaptionsFound,
    FetchFailed,
    MalformedCaptionDocument,
    DailyLimitReached,
    StorageError,
    NotFound,
    SummaryFailed,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::NoCaptionsFound => "no_captions_found",
            ErrorKind::FetchFailed => "fetch_failed",
            ErrorKind::MalformedCaptionDocument => "malformed_caption_document",
            ErrorKind::DailyLimitReached => "daily_limit_reached",
            ErrorKind::StorageError => "storage_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::SummaryFailed => "summary_failed",
        }
    }

    /// Short English title; presentation layers may localize by `code()` instead.
    pub fn title(&self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "Invalid URL",
            ErrorKind::UpstreamUnavailable => "Caption Service Unavailable",
            ErrorKind::NoCaptionsFound => "No Captions Found",
            ErrorKind::FetchFailed => "Transcript Download Failed",
            ErrorKind::MalformedCaptionDocument => "Unreadable Transcript",
            ErrorKind::DailyLimitReached => "Daily Limit Reached",
            ErrorKind::StorageError => "Storage Error",
            ErrorKind::NotFound => "Not Found",
            ErrorKind::SummaryFailed => "Summary Failed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Kind plus human-readable message, ready for rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.title(), self.message)
    }
}

impl TranscriptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TranscriptError::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            TranscriptError::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            TranscriptError::NoCaptionsFound { .. } => ErrorKind::NoCaptionsFound,
            TranscriptError::FetchFailed { .. } => ErrorKind::FetchFailed,
            TranscriptError::MalformedCaptionDocument { .. } => ErrorKind::MalformedCaptionDocument,
            TranscriptError::DailyLimitReached { .. } => ErrorKind::DailyLimitReached,
            TranscriptError::StorageError { .. } => ErrorKind::StorageError,
            TranscriptError::NotFound { .. } => ErrorKind::NotFound,
            TranscriptError::SummaryFailed { .. } => ErrorKind::SummaryFailed,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<StoreError> for TranscriptError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DailyLimitReached { limit } => TranscriptError::DailyLimitReached { limit },
            StoreError::NotFound { id } => TranscriptError::NotFound { id },
            other => TranscriptError::StorageError {
                message: other.to_string(),
            },
        }
    }
}
