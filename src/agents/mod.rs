//! Capability agents: one processing unit per modality behind a uniform `process` contract.
//!
//! The workflow never looks inside an agent. It builds a typed input, awaits
//! `Result<AgentOutput, AgentError>`, and stores the output in the slot owned by the agent's
//! [`CapabilityKind`].

pub mod audio;
pub mod image;
pub mod text;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm::LanguageModelError;
use crate::retrieval::RetrievalError;
use crate::transcription::TranscriptionError;

pub use audio::{AudioAgent, AudioAnalysis, AudioRequest};
pub use image::{ImageAgent, ImageAnalysis, ImageRequest};
pub use text::{TextAgent, TextRequest};

const SOURCE_PREVIEW_CHARS: usize = 200;

/// Modality handled by a capability agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    /// Retrieval-augmented answers over stored documents.
    Text,
    /// Vision analysis of an attached image.
    Image,
    /// Transcription and analysis of an attached audio clip.
    Audio,
}

impl CapabilityKind {
    /// Stable lowercase identifier used in metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            CapabilityKind::Text => "text",
            CapabilityKind::Image => "image",
            CapabilityKind::Audio => "audio",
        }
    }

    /// Capitalized name used in trace entries.
    pub fn label(self) -> &'static str {
        match self {
            CapabilityKind::Text => "Text",
            CapabilityKind::Image => "Image",
            CapabilityKind::Audio => "Audio",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document citation surfaced alongside a text answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    /// Identifier of the retrieved chunk.
    pub id: String,
    /// Similarity score reported by the vector store.
    pub score: f32,
    /// Preview of the chunk text.
    pub text: String,
}

impl Source {
    /// Build a citation whose text is a bounded preview of `text`.
    pub fn preview(id: impl Into<String>, score: f32, text: &str) -> Self {
        let mut preview: String = text.chars().take(SOURCE_PREVIEW_CHARS).collect();
        preview.push_str("...");
        Self {
            id: id.into(),
            score,
            text: preview,
        }
    }
}

/// Successful result of one agent call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutput {
    /// Text produced for the caller.
    pub response: String,
    /// Analysis variant performed, for agents that have several.
    pub analysis_type: Option<String>,
    /// Citations backing the response.
    pub sources: Vec<Source>,
    /// Agent-specific details (model, counts, transcript, ...).
    pub metadata: Map<String, Value>,
}

/// Failure reported by a capability agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Input was missing a required field or carried an unusable value.
    #[error("{0}")]
    InvalidInput(String),
    /// Attached file could not be read.
    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        /// Path we attempted to read.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },
    /// Language model call failed.
    #[error(transparent)]
    Model(#[from] LanguageModelError),
    /// Retrieval failed in a way the agent could not absorb.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    /// Speech-to-text failed.
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),
    /// Agent did not answer within the step budget.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Contract shared by every capability agent.
#[async_trait]
pub trait CapabilityAgent: Send + Sync {
    /// Typed request accepted by the agent.
    type Input: Send + 'static;

    /// Modality this agent serves.
    fn kind(&self) -> CapabilityKind;

    /// Run the agent once.
    async fn process(&self, input: Self::Input) -> Result<AgentOutput, AgentError>;
}

/// Shared handle to the text agent.
pub type TextAgentHandle = Arc<dyn CapabilityAgent<Input = TextRequest>>;
/// Shared handle to the image agent.
pub type ImageAgentHandle = Arc<dyn CapabilityAgent<Input = ImageRequest>>;
/// Shared handle to the audio agent.
pub type AudioAgentHandle = Arc<dyn CapabilityAgent<Input = AudioRequest>>;
