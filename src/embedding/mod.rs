use std::time::Duration;

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient {
    /// Produce an embedding vector for each supplied chunk of text.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Embedding client for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiEmbeddingClient {
    /// Construct a client targeting `base_url` with the given model.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingClientError> {
        Ok(Self {
            http: build_http(timeout)?,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        })
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }
        tracing::debug!(model = %self.model, inputs = texts.len(), "Generating embeddings");

        let mut builder = self
            .http
            .post(format!("{}/embeddings", self.base_url.trim_end_matches('/')))
            .json(&json!({ "model": self.model, "input": texts }));
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(|error| {
            EmbeddingClientError::GenerationFailed(format!(
                "failed to reach {}: {error}",
                self.base_url
            ))
        })?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "provider returned {status}: {body}"
            )));
        }

        let mut body: OpenAiEmbeddingResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::GenerationFailed(format!("malformed response: {error}"))
        })?;
        body.data.sort_by_key(|item| item.index);
        Ok(body.data.into_iter().map(|item| item.embedding).collect())
    }
}

/// Embedding client for a local Ollama runtime (`/api/embed`).
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbeddingClient {
    /// Construct a client targeting the Ollama runtime at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingClientError> {
        Ok(Self {
            http: build_http(timeout)?,
            base_url: base_url.into(),
            model: model.into(),
        })
    }
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }
        tracing::debug!(model = %self.model, inputs = texts.len(), "Generating embeddings");

        let response = self
            .http
            .post(format!("{}/api/embed", self.base_url.trim_end_matches('/')))
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::GenerationFailed(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaEmbedResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::GenerationFailed(format!("malformed response: {error}"))
        })?;
        Ok(body.embeddings)
    }
}

fn build_http(timeout: Duration) -> Result<Client, EmbeddingClientError> {
    Client::builder()
        .user_agent("aura-router/embedding")
        .timeout(timeout)
        .build()
        .map_err(|error| {
            EmbeddingClientError::GenerationFailed(format!("failed to build HTTP client: {error}"))
        })
}

/// Build an embedding client suitable for the supplied configuration.
pub fn get_embedding_client(
    config: &Config,
) -> Result<Box<dyn EmbeddingClient + Send + Sync>, EmbeddingClientError> {
    let timeout = Duration::from_secs(config.llm_request_timeout_secs);
    match config.embedding_provider {
        EmbeddingProvider::OpenAI => Ok(Box::new(OpenAiEmbeddingClient::new(
            config.llm_base_url.clone(),
            config.llm_api_key.clone(),
            config.embedding_model.clone(),
            timeout,
        )?)),
        EmbeddingProvider::Ollama => {
            let base_url = config
                .ollama_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
            Ok(Box::new(OllamaEmbeddingClient::new(
                base_url,
                config.embedding_model.clone(),
                timeout,
            )?))
        }
    }
}
