//! Audio agent: transcribe a clip, then optionally analyze, summarize, or translate it.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use super::{AgentError, AgentOutput, CapabilityAgent, CapabilityKind};
use crate::llm::{ChatMessage, CompletionRequest, LanguageModel, ReasoningEffort, Verbosity};
use crate::transcription::{Transcriber, Transcript};

const DEFAULT_ANALYSIS_TASK: &str =
    "Analyze this audio transcript. Identify key topics, sentiment, and main points.";
const DEFAULT_TARGET_LANGUAGE: &str = "English";

/// Analysis performed by [`AudioAgent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioAnalysis {
    /// Return the transcript as is.
    Transcribe,
    /// Analyze the transcript, steered by the query when present.
    Analyze,
    /// Summarize the transcript in a few bullet points.
    Summarize,
    /// Translate the transcript.
    Translate,
}

impl AudioAnalysis {
    /// Stable lowercase identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            AudioAnalysis::Transcribe => "transcribe",
            AudioAnalysis::Analyze => "analyze",
            AudioAnalysis::Summarize => "summarize",
            AudioAnalysis::Translate => "translate",
        }
    }

    /// Whether the user's query is forwarded with this analysis.
    pub fn uses_query(self) -> bool {
        matches!(self, AudioAnalysis::Analyze)
    }
}

impl fmt::Display for AudioAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input accepted by [`AudioAgent`].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioRequest {
    /// Path of the audio clip.
    pub audio: Option<String>,
    /// Analysis to perform on the transcript.
    pub analysis: AudioAnalysis,
    /// Analysis task, for [`AudioAnalysis::Analyze`].
    pub query: Option<String>,
    /// Spoken-language hint passed to the transcriber.
    pub language: Option<String>,
    /// Target language for [`AudioAnalysis::Translate`]; defaults to English.
    pub translate_to: Option<String>,
}

/// Transcribes audio and post-processes the transcript with a chat model.
pub struct AudioAgent {
    transcriber: Arc<dyn Transcriber>,
    llm: Arc<dyn LanguageModel>,
    model: String,
}

impl AudioAgent {
    /// Build an agent over `transcriber`, using `model` for transcript analysis.
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        llm: Arc<dyn LanguageModel>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            transcriber,
            llm,
            model: model.into(),
        }
    }

    async fn run_prompt(
        &self,
        system: String,
        user: String,
        max_tokens: u32,
        (effort, verbosity): (ReasoningEffort, Verbosity),
    ) -> Result<String, AgentError> {
        let request = CompletionRequest::new(
            self.model.clone(),
            vec![ChatMessage::system(system), ChatMessage::user(user)],
        )
        .with_max_tokens(max_tokens)
        .with_reasoning_effort(effort)
        .with_verbosity(verbosity);
        Ok(self.llm.complete(request).await?)
    }
}

#[async_trait]
impl CapabilityAgent for AudioAgent {
    type Input = AudioRequest;

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Audio
    }

    async fn process(&self, request: AudioRequest) -> Result<AgentOutput, AgentError> {
        let audio = request
            .audio
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AgentError::InvalidInput("No audio provided".into()))?;

        tracing::info!(analysis = %request.analysis, audio, "Processing audio");
        let Transcript {
            text: transcript,
            language,
            segments,
        } = self
            .transcriber
            .transcribe(Path::new(audio), request.language.as_deref())
            .await?;

        let mut metadata = Map::new();
        metadata.insert("audio".into(), Value::String(audio.to_string()));
        metadata.insert(
            "language".into(),
            language.clone().map(Value::String).unwrap_or(Value::Null),
        );
        metadata.insert("segments".into(), Value::from(segments));

        if request.analysis != AudioAnalysis::Transcribe && transcript.is_empty() {
            return Err(AgentError::InvalidInput(
                "Transcript is empty; nothing to analyze".into(),
            ));
        }

        let response = match request.analysis {
            AudioAnalysis::Transcribe => {
                return Ok(AgentOutput {
                    response: transcript,
                    analysis_type: Some(request.analysis.as_str().to_string()),
                    sources: Vec::new(),
                    metadata,
                });
            }
            AudioAnalysis::Analyze => {
                let task = request
                    .query
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .unwrap_or(DEFAULT_ANALYSIS_TASK);
                self.run_prompt(
                    "You are an expert at analyzing audio transcripts.".into(),
                    format!(
                        "Audio Transcript:\n{transcript}\n\nAnalysis Task: {task}\n\nProvide a detailed analysis."
                    ),
                    1000,
                    (ReasoningEffort::Medium, Verbosity::Medium),
                )
                .await?
            }
            AudioAnalysis::Summarize => {
                self.run_prompt(
                    "You are an expert at summarizing audio transcripts concisely.".into(),
                    format!(
                        "Summarize this audio transcript in 3-5 bullet points:\n\n{transcript}"
                    ),
                    500,
                    (ReasoningEffort::Low, Verbosity::Low),
                )
                .await?
            }
            AudioAnalysis::Translate => {
                let source = language.as_deref().unwrap_or("the source language");
                let target = request
                    .translate_to
                    .as_deref()
                    .unwrap_or(DEFAULT_TARGET_LANGUAGE);
                metadata.insert("target_language".into(), Value::String(target.to_string()));
                self.run_prompt(
                    format!("You are an expert translator. Translate from {source} to {target}."),
                    format!(
                        "Translate this text to {target}:\n\n{transcript}\n\n\
                         Provide only the translation, keeping the original meaning and tone."
                    ),
                    2000,
                    (ReasoningEffort::Medium, Verbosity::Low),
                )
                .await?
            }
        };

        metadata.insert("transcript".into(), Value::String(transcript));
        metadata.insert("model".into(), Value::String(self.model.clone()));

        Ok(AgentOutput {
            response,
            analysis_type: Some(request.analysis.as_str().to_string()),
            sources: Vec::new(),
            metadata,
        })
    }
}
