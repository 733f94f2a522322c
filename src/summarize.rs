use log::{debug, info};

use crate::Transcript;
use crate::config::SummaryConfig;
use crate::error::TranscriptError;
use crate::store::TranscriptStore;

const DEFAULT_INSTRUCTIONS: &str = "Summarize this YouTube video transcript. \
Capture the main topic and at most three or four key points, highlight any important conclusions \
or takeaways, keep a neutral and informative tone, and stay around 250 words. \
Write clear, readable paragraphs.";

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Input to the summary service
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub transcript: String,
    pub video_title: Option<String>,
    /// Replaces the default instructions when set
    pub custom_prompt: Option<String>,
}

impl SummaryRequest {
    pub fn for_transcript(transcript: &Transcript, custom_prompt: Option<String>) -> Self {
        Self {
            transcript: transcript.content.clone(),
            video_title: transcript.video_title.clone(),
            custom_prompt: custom_prompt.filter(|p| !p.trim().is_empty()),
        }
    }

    fn prompt(&self) -> String {
        let instructions = self.custom_prompt.as_deref().unwrap_or(DEFAULT_INSTRUCTIONS);
        let title = self.video_title.as_deref().unwrap_or("Untitled");
        format!(
            "{instructions}\n\nThe video is titled: \"{title}\".\n\nHere's the transcript:\n{}",
            self.transcript
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Gemini,
    Anthropic,
    OpenAi,
}

impl Backend {
    fn for_model(model: &str) -> Self {
        if model.starts_with("gemini") {
            Backend::Gemini
        } else if model.starts_with("claude") {
            Backend::Anthropic
        } else {
            Backend::OpenAi
        }
    }

    fn key_var(&self) -> &'static str {
        match self {
            Backend::Gemini => "GEMINI_API_KEY",
            Backend::Anthropic => "ANTHROPIC_API_KEY",
            Backend::OpenAi => "OPENAI_API_KEY",
        }
    }
}

fn failed(reason: impl Into<String>) -> TranscriptError {
    TranscriptError::SummaryFailed { reason: reason.into() }
}

/// Client for the generative summary service
pub struct Summarizer {
    client: reqwest::Client,
    model: String,
    api_key: Option<String>,
}

impl Summarizer {
    pub fn new(client: reqwest::Client, config: &SummaryConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub async fn summarize(&self, request: &SummaryRequest) -> Result<String, TranscriptError> {
        if request.transcript.trim().is_empty() {
            return Err(failed("transcript is required"));
        }

        let backend = Backend::for_model(&self.model);
        let api_key = match &self.api_key {
            Some(key) => key.clone(),
            None => std::env::var(backend.key_var())
                .map_err(|_| failed(format!("{} environment variable not set", backend.key_var())))?,
        };

        debug!("Summarizing via {backend:?} with model {}", self.model);
        let prompt = request.prompt();

        let req = match backend {
            Backend::Gemini => self
                .client
                .post(format!("{GEMINI_API_URL}/{}:generateContent", self.model))
                .query(&[("key", api_key.as_str())])
                .json(&serde_json::json!({
                    "contents": [{ "parts": [{ "text": prompt }] }],
                    "generationConfig": {
                        "temperature": 0.7,
                        "topK": 40,
                        "topP": 0.95,
                        "maxOutputTokens": 1024
                    }
                })),
            Backend::Anthropic => self
                .client
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", &api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&serde_json::json!({
                    "model": self.model,
                    "max_tokens": 1024,
                    "messages": [{ "role": "user", "content": prompt }]
                })),
            Backend::OpenAi => self
                .client
                .post(OPENAI_API_URL)
                .bearer_auth(&api_key)
                .json(&serde_json::json!({
                    "model": self.model,
                    "messages": [{ "role": "user", "content": prompt }]
                })),
        };

        let resp = req.send().await.map_err(|e| failed(format!("request failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(failed(format!("{backend:?} API returned {status}: {body}")));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| failed(format!("invalid response body: {e}")))?;

        let summary = match backend {
            Backend::Gemini => extract_gemini_text(&json),
            Backend::Anthropic => extract_anthropic_text(&json),
            Backend::OpenAi => extract_openai_text(&json),
        }
        .ok_or_else(|| failed(format!("unexpected {backend:?} response format")))?;

        Ok(summary)
    }
}

fn extract_gemini_text(json: &serde_json::Value) -> Option<String> {
    json.pointer("/candidates/0/content/parts/0/text")
        .and_then(|t| t.as_str())
        .filter(|t| !t.trim().is_empty())
        .map(str::to_string)
}

fn extract_anthropic_text(json: &serde_json::Value) -> Option<String> {
    let text: String = json
        .get("content")?
        .as_array()?
        .iter()
        .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|block| block.get("text")?.as_str())
        .collect();
    (!text.is_empty()).then_some(text)
}

fn extract_openai_text(json: &serde_json::Value) -> Option<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|t| t.as_str())
        .map(str::to_string)
}

/// Store `summary` on an already-persisted transcript
pub async fn attach_summary(
    store: &dyn TranscriptStore,
    id: &str,
    summary: &str,
) -> Result<Transcript, TranscriptError> {
    let updated = store.update_summary(id, summary).await?;
    info!("Attached summary to transcript {id}");
    Ok(updated)
}

/// Replace the summary of a transcript owned by `owner` with hand-written text.
///
/// Rows owned by someone else, and ownerless rows, are `NotFound`.
pub async fn edit_summary(
    store: &dyn TranscriptStore,
    id: &str,
    owner: &str,
    summary: &str,
) -> Result<Transcript, TranscriptError> {
    let transcript = store
        .get(id)
        .await?
        .filter(|t| t.owner_user_id.as_deref() == Some(owner))
        .ok_or_else(|| TranscriptError::NotFound { id: id.to_string() })?;
    attach_summary(store, &transcript.id, summary).await
}

/// Summarize a stored transcript and attach the result
pub async fn summarize_stored(
    summarizer: &Summarizer,
    store: &dyn TranscriptStore,
    id: &str,
    custom_prompt: Option<String>,
) -> Result<Transcript, TranscriptError> {
    let transcript = store
        .get(id)
        .await?
        .ok_or_else(|| TranscriptError::NotFound { id: id.to_string() })?;
    let request = SummaryRequest::for_transcript(&transcript, custom_prompt);
    let summary = summarizer.summarize(&request).await?;
    attach_summary(store, &transcript.id, &summary).await
}
