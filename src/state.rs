use log::debug;

use crate::Transcript;
use crate::error::ErrorReport;
use crate::pipeline::{Generator, Origin, Stage};

/// Where one generate request stands, as a single value
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationState {
    Idle,
    Resolving,
    Fetching,
    Ready { transcript: Transcript, origin: Origin },
    /// `content` is set when the transcript was fetched but could not be saved
    Failed { error: ErrorReport, content: Option<String> },
}

impl GenerationState {
    /// Loading gate: a UI disables re-submission while this holds
    pub fn is_busy(&self) -> bool {
        matches!(self, GenerationState::Resolving | GenerationState::Fetching)
    }

    pub fn label(&self) -> &'static str {
        match self {
            GenerationState::Idle => "idle",
            GenerationState::Resolving => "resolving",
            GenerationState::Fetching => "fetching",
            GenerationState::Ready { .. } => "ready",
            GenerationState::Failed { .. } => "failed",
        }
    }

    /// Text to show, if any
    pub fn content(&self) -> Option<&str> {
        match self {
            GenerationState::Ready { transcript, .. } => Some(&transcript.content),
            GenerationState::Failed { content, .. } => content.as_deref(),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorReport> {
        match self {
            GenerationState::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}

impl From<Stage> for GenerationState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Resolving => GenerationState::Resolving,
            Stage::Fetching => GenerationState::Fetching,
        }
    }
}

/// One generator bound to one user and its current [`GenerationState`].
///
/// `submit` takes `&mut self`, so a session can never run two requests at
/// once. A submission abandoned mid-flight leaves the state busy until the
/// next `submit` or `reset`.
pub struct Session {
    generator: Generator,
    owner: Option<String>,
    state: GenerationState,
}

impl Session {
    pub fn new(generator: Generator, owner: Option<String>) -> Self {
        Self {
            generator,
            owner,
            state: GenerationState::Idle,
        }
    }

    pub fn state(&self) -> &GenerationState {
        &self.state
    }

    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn reset(&mut self) {
        self.state = GenerationState::Idle;
    }

    pub async fn submit(&mut self, url: &str) -> &GenerationState {
        self.submit_with(url, |_| {}).await
    }

    /// Run one request, passing every state change to `observe`
    pub async fn submit_with(
        &mut self,
        url: &str,
        mut observe: impl FnMut(&GenerationState) + Send,
    ) -> &GenerationState {
        if self.state.is_busy() {
            debug!("Previous submission was abandoned; starting over");
        }

        let Session { generator, owner, state } = self;
        let result = generator
            .generate_with(url, owner.as_deref(), |stage| {
                *state = stage.into();
                observe(&*state);
            })
            .await;

        *state = match result {
            Ok(generated) => GenerationState::Ready {
                transcript: generated.transcript,
                origin: generated.origin,
            },
            Err(failure) => GenerationState::Failed {
                error: failure.report(),
                content: failure.unsaved.map(|t| t.content),
            },
        };
        observe(&*state);
        state
    }
}
