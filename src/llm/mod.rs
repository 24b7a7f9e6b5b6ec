//! Chat-completion client shared by the classifier, the synthesizer, and the capability agents.
//!
//! Everything speaks the OpenAI-compatible `/chat/completions` wire format, which also covers
//! vision prompts through `image_url` content parts. Callers depend on the [`LanguageModel`]
//! trait so tests and alternative providers can be swapped in without touching the workflow.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

#[cfg(test)]
pub(crate) mod testing;

/// Errors surfaced while requesting a completion.
#[derive(Debug, Error)]
pub enum LanguageModelError {
    /// Provider could not be reached or the client could not be built.
    #[error("Language model provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// Provider answered without any text content.
    #[error("Language model returned an empty completion")]
    EmptyCompletion,
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Instructions framing the conversation.
    System,
    /// End-user content.
    User,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
        }
    }
}

/// One piece of message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    /// Plain text.
    Text(String),
    /// Image reference, either an `http(s)` URL or a `data:` URL.
    ImageUrl(String),
}

/// Chat message composed of one or more content parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Author of the message.
    pub role: Role,
    /// Ordered content parts.
    pub parts: Vec<ContentPart>,
}

impl ChatMessage {
    /// Build a text-only system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    /// Build a text-only user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    /// Build a user message pairing a text prompt with an image.
    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            parts: vec![
                ContentPart::Text(text.into()),
                ContentPart::ImageUrl(image_url.into()),
            ],
        }
    }

    /// Concatenate every text part, ignoring images.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::ImageUrl(_) => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn to_json(&self) -> Value {
        let content = match self.parts.as_slice() {
            [ContentPart::Text(text)] => Value::String(text.clone()),
            parts => Value::Array(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text(text) => json!({ "type": "text", "text": text }),
                        ContentPart::ImageUrl(url) => {
                            json!({ "type": "image_url", "image_url": { "url": url } })
                        }
                    })
                    .collect(),
            ),
        };
        json!({ "role": self.role.as_str(), "content": content })
    }
}

/// Request payload passed to the language model.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier understood by the provider.
    pub model: String,
    /// Conversation sent to the model.
    pub messages: Vec<ChatMessage>,
    /// Optional output token budget.
    pub max_tokens: Option<u32>,
    /// Reasoning budget hint; only sent to reasoning-model families.
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Answer length hint; only sent to the `gpt-5` family.
    pub verbosity: Option<Verbosity>,
}

/// How much hidden reasoning a reasoning model may spend before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningEffort {
    /// Spend as little of the budget as possible on reasoning.
    Low,
    /// Provider default.
    Medium,
    /// Favor reasoning depth over latency.
    High,
}

impl ReasoningEffort {
    fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Requested answer length for models that support it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Terse answers.
    Low,
    /// Provider default.
    Medium,
    /// Expansive answers.
    High,
}

impl Verbosity {
    fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl CompletionRequest {
    /// Build a request without an explicit token budget.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            reasoning_effort: None,
            verbosity: None,
        }
    }

    /// Cap the number of generated tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Ask reasoning models to limit their hidden reasoning.
    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    /// Ask `gpt-5` models for a shorter or longer answer.
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = Some(verbosity);
        self
    }
}

/// Interface implemented by chat-completion providers.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Run one completion and return the generated text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, LanguageModelError>;
}

/// Client for OpenAI-compatible chat-completion endpoints.
pub struct OpenAiChatClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiChatClient {
    /// Construct a client targeting `base_url` (for example `https://api.openai.com/v1`).
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, LanguageModelError> {
        let http = Client::builder()
            .user_agent("aura-router/chat")
            .timeout(timeout)
            .build()
            .map_err(|error| {
                LanguageModelError::ProviderUnavailable(format!(
                    "failed to build HTTP client: {error}"
                ))
            })?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Reasoning-model families reject `max_tokens` and expect `max_completion_tokens` instead.
pub(crate) fn uses_completion_token_budget(model: &str) -> bool {
    let model = model.to_ascii_lowercase();
    model.contains("gpt-5") || ["o1", "o3", "o4"].iter().any(|prefix| model.starts_with(prefix))
}

pub(crate) fn build_payload(request: &CompletionRequest) -> Value {
    let mut payload = json!({
        "model": request.model,
        "messages": request.messages.iter().map(ChatMessage::to_json).collect::<Vec<_>>(),
        "store": false,
    });
    if let Some(max_tokens) = request.max_tokens
        && let Some(object) = payload.as_object_mut()
    {
        let key = if uses_completion_token_budget(&request.model) {
            "max_completion_tokens"
        } else {
            "max_tokens"
        };
        object.insert(key.into(), Value::from(max_tokens));
    }
    if let Some(object) = payload.as_object_mut()
        && uses_completion_token_budget(&request.model)
    {
        if let Some(effort) = request.reasoning_effort {
            object.insert("reasoning_effort".into(), Value::from(effort.as_str()));
        }
        if let Some(verbosity) = request.verbosity
            && request.model.to_ascii_lowercase().contains("gpt-5")
        {
            object.insert("verbosity".into(), Value::from(verbosity.as_str()));
        }
    }
    payload
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAiChatClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LanguageModelError> {
        let payload = build_payload(&request);
        let mut builder = self.http.post(self.endpoint()).json(&payload);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(|error| {
            LanguageModelError::ProviderUnavailable(format!(
                "failed to reach {}: {error}",
                self.base_url
            ))
        })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(LanguageModelError::ProviderUnavailable(format!(
                "endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LanguageModelError::GenerationFailed(format!(
                "provider returned {status}: {body}"
            )));
        }

        let body: ChatResponse = response.json().await.map_err(|error| {
            LanguageModelError::InvalidResponse(format!("failed to decode completion: {error}"))
        })?;

        let choice = body.choices.into_iter().next().ok_or_else(|| {
            LanguageModelError::InvalidResponse("completion contained no choices".into())
        })?;

        if choice.finish_reason.as_deref() == Some("length") {
            tracing::warn!(
                model = %request.model,
                max_tokens = ?request.max_tokens,
                "Completion truncated by token limit"
            );
        }

        let content = choice.message.content.unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LanguageModelError::EmptyCompletion);
        }

        tracing::debug!(model = %request.model, chars = content.len(), "Completion received");
        Ok(content)
    }
}
