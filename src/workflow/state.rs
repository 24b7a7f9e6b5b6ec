//! Request, per-invocation workflow state, and the caller-facing result.

use std::fmt;
use std::sync::OnceLock;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::agents::{CapabilityKind, Source};

/// Coarse category assigned to a request by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Plain question answered over stored documents.
    Text,
    /// Request about an attached image.
    Image,
    /// Request about an attached audio clip.
    Audio,
    /// Request spanning several modalities.
    MultiModal,
    /// Classification failed.
    Error,
}

impl QueryType {
    /// Stable lowercase identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            QueryType::Text => "text",
            QueryType::Image => "image",
            QueryType::Audio => "audio",
            QueryType::MultiModal => "multi_modal",
            QueryType::Error => "error",
        }
    }

    /// Parse a model-produced label. `error` is never accepted from a model.
    pub fn parse_label(value: &str) -> Option<Self> {
        match first_token(value).as_str() {
            "text" => Some(QueryType::Text),
            "image" => Some(QueryType::Image),
            "audio" => Some(QueryType::Audio),
            "multi_modal" | "multi-modal" | "multimodal" => Some(QueryType::MultiModal),
            _ => None,
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the user wants done with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Find something.
    Search,
    /// Examine something in depth.
    Analyze,
    /// Transform or extract content.
    Process,
    /// Answer a question.
    Question,
}

impl Intent {
    /// Stable lowercase identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Search => "search",
            Intent::Analyze => "analyze",
            Intent::Process => "process",
            Intent::Question => "question",
        }
    }

    /// Parse a model-produced label.
    pub fn parse_label(value: &str) -> Option<Self> {
        match first_token(value).as_str() {
            "search" => Some(Intent::Search),
            "analyze" | "analyse" => Some(Intent::Analyze),
            "process" => Some(Intent::Process),
            "question" => Some(Intent::Question),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn first_token(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c: char| matches!(c, '*' | '`' | '"' | '\'' | '<' | '>'))
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | ';' | '(' | '*' | '`'))
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

/// Which optional attachments came with the request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ModalityFlags {
    /// An image handle is attached.
    pub has_image: bool,
    /// An audio handle is attached.
    pub has_audio: bool,
    /// A document handle is attached.
    pub has_document: bool,
}

/// Input bundle for one workflow invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// Natural-language query.
    pub query: String,
    /// Optional image handle (path or URL).
    pub image: Option<String>,
    /// Optional audio handle (path).
    pub audio: Option<String>,
    /// Optional document handle, matched against stored `source_uri` values.
    pub document: Option<String>,
    /// Per-request override for retrieval-augmented answering.
    pub use_rag: Option<bool>,
    /// Spoken-language hint passed to the transcriber.
    pub language: Option<String>,
    /// Target language for audio translation.
    ///
    /// Translation is only selected through a custom [`RoutingPolicy`](super::RoutingPolicy)
    /// audio map; the default map never picks it.
    pub translate_to: Option<String>,
}

impl Request {
    /// Build a text-only request.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Attach an image handle.
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Attach an audio handle.
    pub fn with_audio(mut self, audio: impl Into<String>) -> Self {
        self.audio = Some(audio.into());
        self
    }

    /// Attach a document handle.
    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    /// Override whether the text path retrieves context.
    pub fn with_use_rag(mut self, use_rag: bool) -> Self {
        self.use_rag = Some(use_rag);
        self
    }

    /// Hint the language spoken in the attached audio.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Target language for audio translation.
    pub fn with_translate_to(mut self, language: impl Into<String>) -> Self {
        self.translate_to = Some(language.into());
        self
    }

    /// Derive attachment flags; blank handles count as absent.
    pub fn modality_flags(&self) -> ModalityFlags {
        let present = |handle: &Option<String>| {
            handle
                .as_deref()
                .is_some_and(|value| !value.trim().is_empty())
        };
        ModalityFlags {
            has_image: present(&self.image),
            has_audio: present(&self.audio),
            has_document: present(&self.document),
        }
    }
}

/// Resolved classification for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Query type after overrides.
    pub query_type: QueryType,
    /// Detected intent.
    pub intent: Intent,
    /// Free-text justification from the model, if any.
    pub reasoning: Option<String>,
}

impl Classification {
    /// Trace line recorded for a successful classification.
    pub fn trace_entry(&self) -> String {
        format!(
            "Classified as {} with intent {}",
            self.query_type, self.intent
        )
    }
}

/// Output of the text path.
#[derive(Debug, Clone, PartialEq)]
pub struct TextResult {
    /// Answer produced by the text agent.
    pub response: String,
    /// Citations for the answer.
    pub sources: Vec<Source>,
}

/// Output of the image or audio path.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// Text produced by the agent.
    pub response: String,
    /// Analysis variant performed.
    pub analysis_type: String,
    /// Agent-specific details.
    pub metadata: Map<String, Value>,
}

/// Answer written once by the synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalAnswer {
    /// Response returned to the caller.
    pub response: String,
    /// Citations returned to the caller.
    pub sources: Vec<Source>,
}

/// Attempted to overwrite a write-once field.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    /// Classification was already recorded.
    #[error("classification already recorded")]
    AlreadyClassified,
    /// The slot for this capability already holds a result.
    #[error("{0} result already recorded")]
    SlotOccupied(CapabilityKind),
    /// The final answer was already written.
    #[error("final response already written")]
    AlreadyFinalized,
}

/// Mutable record threaded through one invocation.
///
/// Write-once fields live in [`OnceLock`]s and the trace is only reachable through
/// [`WorkflowState::record_step`], so the invariants hold by construction.
#[derive(Debug)]
pub struct WorkflowState {
    request: Request,
    flags: ModalityFlags,
    query_type: OnceLock<QueryType>,
    intent: OnceLock<Intent>,
    steps: Vec<String>,
    text: OnceLock<TextResult>,
    image: OnceLock<AnalysisResult>,
    audio: OnceLock<AnalysisResult>,
    current_agent: Option<String>,
    agents_used: Vec<String>,
    error: Option<String>,
    metadata: Map<String, Value>,
    final_answer: OnceLock<FinalAnswer>,
}

impl WorkflowState {
    /// Start a fresh state for `request`.
    pub fn new(request: Request) -> Self {
        let flags = request.modality_flags();
        Self {
            request,
            flags,
            query_type: OnceLock::new(),
            intent: OnceLock::new(),
            steps: Vec::new(),
            text: OnceLock::new(),
            image: OnceLock::new(),
            audio: OnceLock::new(),
            current_agent: None,
            agents_used: Vec::new(),
            error: None,
            metadata: Map::new(),
            final_answer: OnceLock::new(),
        }
    }

    /// Request being processed.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// User query.
    pub fn query(&self) -> &str {
        &self.request.query
    }

    /// Attachment flags derived from the request.
    pub fn flags(&self) -> ModalityFlags {
        self.flags
    }

    /// Query type, once classification ran.
    pub fn query_type(&self) -> Option<QueryType> {
        self.query_type.get().copied()
    }

    /// Intent, once classification succeeded.
    pub fn intent(&self) -> Option<Intent> {
        self.intent.get().copied()
    }

    /// Record a successful classification.
    pub fn set_classification(
        &mut self,
        classification: &Classification,
    ) -> Result<(), StateError> {
        self.query_type
            .set(classification.query_type)
            .map_err(|_| StateError::AlreadyClassified)?;
        self.intent
            .set(classification.intent)
            .map_err(|_| StateError::AlreadyClassified)
    }

    /// Record a failed classification: the query type becomes `error` and the failure is kept.
    pub fn fail_classification(&mut self, message: impl Into<String>) {
        if self.query_type.set(QueryType::Error).is_err() {
            tracing::warn!("Classification failure recorded after a successful classification");
        }
        self.error = Some(message.into());
    }

    /// Append a trace entry.
    pub fn record_step(&mut self, entry: impl Into<String>) {
        self.steps.push(entry.into());
    }

    /// Trace entries recorded so far.
    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// Note that `agent` is about to run and stamp it as the current agent.
    pub fn enter_agent(&mut self, agent: &str) {
        self.agents_used.push(agent.to_string());
        self.current_agent = Some(agent.to_string());
    }

    /// Stamp the current agent without recording a new invocation.
    pub fn stamp_agent(&mut self, agent: &str) {
        self.current_agent = Some(agent.to_string());
    }

    /// Most recently stamped agent.
    pub fn current_agent(&self) -> Option<&str> {
        self.current_agent.as_deref()
    }

    /// Agents invoked so far, in order.
    pub fn agents_used(&self) -> &[String] {
        &self.agents_used
    }

    /// Store the text path result.
    pub fn set_text_result(&mut self, result: TextResult) -> Result<(), StateError> {
        self.text
            .set(result)
            .map_err(|_| StateError::SlotOccupied(CapabilityKind::Text))
    }

    /// Store the image path result.
    pub fn set_image_result(&mut self, result: AnalysisResult) -> Result<(), StateError> {
        self.image
            .set(result)
            .map_err(|_| StateError::SlotOccupied(CapabilityKind::Image))
    }

    /// Store the audio path result.
    pub fn set_audio_result(&mut self, result: AnalysisResult) -> Result<(), StateError> {
        self.audio
            .set(result)
            .map_err(|_| StateError::SlotOccupied(CapabilityKind::Audio))
    }

    /// Text path result, if the text agent succeeded.
    pub fn text_result(&self) -> Option<&TextResult> {
        self.text.get()
    }

    /// Image path result, if the image agent succeeded.
    pub fn image_result(&self) -> Option<&AnalysisResult> {
        self.image.get()
    }

    /// Audio path result, if the audio agent succeeded.
    pub fn audio_result(&self) -> Option<&AnalysisResult> {
        self.audio.get()
    }

    /// Record a failure. The most recent failure is the one reported.
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Most recent failure, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Attach free-form metadata surfaced in the result.
    pub fn insert_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Write the final answer.
    pub fn finalize(&mut self, answer: FinalAnswer) -> Result<(), StateError> {
        self.final_answer
            .set(answer)
            .map_err(|_| StateError::AlreadyFinalized)
    }

    /// Final answer, once synthesized.
    pub fn final_answer(&self) -> Option<&FinalAnswer> {
        self.final_answer.get()
    }

    /// Consume the state into the caller-facing result.
    pub fn into_result(
        self,
        request_id: String,
        elapsed_ms: u64,
        completed_at: String,
    ) -> WorkflowResult {
        let (response, sources) = match self.final_answer.into_inner() {
            Some(answer) => (Some(answer.response), answer.sources),
            None => (None, Vec::new()),
        };
        WorkflowResult {
            success: self.error.is_none(),
            response,
            sources,
            metadata: WorkflowMetadata {
                query_type: self.query_type.into_inner(),
                intent: self.intent.into_inner(),
                agents_used: self.agents_used,
                current_agent: self.current_agent,
                processing_steps: self.steps,
                request_id,
                elapsed_ms,
                completed_at,
                extra: self.metadata,
            },
            error: self.error,
        }
    }
}

/// Result returned for every invocation, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowResult {
    /// `true` when no step recorded an error.
    pub success: bool,
    /// Final answer; absent when classification failed.
    pub response: Option<String>,
    /// Citations from the text path.
    pub sources: Vec<Source>,
    /// Execution details.
    pub metadata: WorkflowMetadata,
    /// Most recent failure, if any.
    pub error: Option<String>,
}

/// Execution details attached to a [`WorkflowResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowMetadata {
    /// Resolved query type.
    pub query_type: Option<QueryType>,
    /// Resolved intent.
    pub intent: Option<Intent>,
    /// Agents invoked, in order.
    pub agents_used: Vec<String>,
    /// Last agent-calling state.
    pub current_agent: Option<String>,
    /// Trace of the invocation.
    pub processing_steps: Vec<String>,
    /// Identifier of the invocation, also attached to its log span.
    pub request_id: String,
    /// Wall-clock duration of the invocation.
    pub elapsed_ms: u64,
    /// RFC 3339 completion timestamp.
    pub completed_at: String,
    /// Free-form metadata recorded by workflow steps.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
