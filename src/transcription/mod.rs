//! Speech-to-text client used by the audio agent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Client,
    multipart::{Form, Part},
};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors surfaced while transcribing an audio clip.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// Audio file could not be read from disk.
    #[error("Failed to read audio file {path}: {source}")]
    Io {
        /// Path we attempted to read.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },
    /// Provider could not be reached or the client could not be built.
    #[error("Transcription provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to transcribe audio: {0}")]
    Failed(String),
    /// Provider response could not be parsed.
    #[error("Malformed transcription response: {0}")]
    InvalidResponse(String),
}

/// Text recovered from an audio clip.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    /// Full transcript text.
    pub text: String,
    /// Language detected by the provider, if reported.
    pub language: Option<String>,
    /// Number of timed segments reported by the provider.
    pub segments: usize,
}

/// Interface implemented by speech-to-text providers.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the clip stored at `path`, optionally hinting the spoken language.
    async fn transcribe(
        &self,
        path: &Path,
        language: Option<&str>,
    ) -> Result<Transcript, TranscriptionError>;
}

/// Client for OpenAI-compatible `/audio/transcriptions` endpoints.
pub struct OpenAiTranscriber {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiTranscriber {
    /// Construct a transcriber targeting `base_url` with the given model.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TranscriptionError> {
        let http = Client::builder()
            .user_agent("aura-router/transcription")
            .timeout(timeout)
            .build()
            .map_err(|error| {
                TranscriptionError::ProviderUnavailable(format!(
                    "failed to build HTTP client: {error}"
                ))
            })?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<Value>,
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(
        &self,
        path: &Path,
        language: Option<&str>,
    ) -> Result<Transcript, TranscriptionError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| TranscriptionError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("audio.wav")
            .to_string();

        let mut form = Form::new()
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .part("file", Part::bytes(bytes).file_name(file_name));
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        let mut builder = self.http.post(self.endpoint()).multipart(form);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(|error| {
            TranscriptionError::ProviderUnavailable(format!(
                "failed to reach {}: {error}",
                self.base_url
            ))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Failed(format!(
                "provider returned {status}: {body}"
            )));
        }

        let body: TranscriptionResponse = response.json().await.map_err(|error| {
            TranscriptionError::InvalidResponse(format!("failed to decode transcript: {error}"))
        })?;

        tracing::info!(
            path = %path.display(),
            language = ?body.language,
            chars = body.text.len(),
            "Transcription complete"
        );

        Ok(Transcript {
            text: body.text.trim().to_string(),
            language: body.language,
            segments: body.segments.len(),
        })
    }
}
