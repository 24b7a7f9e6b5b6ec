//! Single-shot request classification with attachment-based overrides.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::state::{Classification, Intent, ModalityFlags, QueryType};
use crate::llm::{
    ChatMessage, CompletionRequest, LanguageModel, LanguageModelError, ReasoningEffort,
    Verbosity,
};

const MAX_TOKENS: u32 = 150;

/// Classification could not be obtained from the model.
#[derive(Debug, Error)]
pub enum ClassificationError {
    /// Model call failed.
    #[error(transparent)]
    Model(#[from] LanguageModelError),
    /// Model did not answer within the step budget.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Asks a language model for `(type, intent)` and applies deterministic overrides.
pub struct Classifier {
    llm: Arc<dyn LanguageModel>,
    model: String,
    multi_modal_query_threshold: usize,
    timeout: Duration,
}

impl Classifier {
    /// Build a classifier issuing prompts to `model`.
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        model: impl Into<String>,
        multi_modal_query_threshold: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            multi_modal_query_threshold,
            timeout,
        }
    }

    /// Classify `query` given the attachments present.
    pub async fn classify(
        &self,
        query: &str,
        flags: ModalityFlags,
    ) -> Result<Classification, ClassificationError> {
        let request = CompletionRequest::new(
            self.model.clone(),
            vec![ChatMessage::user(build_prompt(query, flags))],
        )
        .with_max_tokens(MAX_TOKENS)
        .with_reasoning_effort(ReasoningEffort::Low)
        .with_verbosity(Verbosity::Low);

        let answer = match tokio::time::timeout(self.timeout, self.llm.complete(request))
            .await
            .map_err(|_| ClassificationError::Timeout(self.timeout))?
        {
            Ok(answer) => answer,
            // a blank answer parses to the defaults
            Err(LanguageModelError::EmptyCompletion) => {
                tracing::warn!("Classifier returned an empty completion; using defaults");
                String::new()
            }
            Err(error) => return Err(error.into()),
        };

        let parsed = parse_classification(&answer);
        let query_type = apply_overrides(
            parsed.query_type,
            flags,
            query.chars().count(),
            self.multi_modal_query_threshold,
        );
        if query_type != parsed.query_type {
            tracing::debug!(
                model_type = %parsed.query_type,
                resolved = %query_type,
                "Attachment override applied"
            );
        }
        tracing::info!(
            query_type = %query_type,
            intent = %parsed.intent,
            reasoning = parsed.reasoning.as_deref().unwrap_or(""),
            "Classified request"
        );

        Ok(Classification {
            query_type,
            ..parsed
        })
    }
}

fn build_prompt(query: &str, flags: ModalityFlags) -> String {
    format!(
        "Classify this user request:

Query: {query}
Has Image: {}
Has Audio: {}
Has Document: {}

Determine:
1. Query Type: text, image, audio, or multi_modal
2. Intent: search, analyze, process, or question

Respond in this exact format:
Type: <query_type>
Intent: <intent>
Reasoning: <brief reasoning>",
        flags.has_image, flags.has_audio, flags.has_document
    )
}

/// Read `Type:` / `Intent:` / `Reasoning:` lines out of free text.
///
/// Missing or unrecognized values fall back to `text` / `question`. The first recognized value
/// for each label wins.
pub fn parse_classification(answer: &str) -> Classification {
    let mut query_type = None;
    let mut intent = None;
    let mut reasoning = None;

    for line in answer.lines() {
        let line = line
            .trim_start()
            .trim_start_matches(|c: char| matches!(c, '-' | '*' | '•' | '#' | '>'))
            .trim_start();
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim().trim_matches('*').trim().to_ascii_lowercase();
        let value = value.trim().trim_start_matches('*').trim();

        match label.as_str() {
            "type" | "query type" | "query_type" => {
                if query_type.is_none() {
                    query_type = QueryType::parse_label(value);
                }
            }
            "intent" => {
                if intent.is_none() {
                    intent = Intent::parse_label(value);
                }
            }
            "reasoning" if reasoning.is_none() && !value.is_empty() => {
                reasoning = Some(value.to_string());
            }
            _ => {}
        }
    }

    Classification {
        query_type: query_type.unwrap_or(QueryType::Text),
        intent: intent.unwrap_or(Intent::Question),
        reasoning,
    }
}

/// Let attachments overrule the model. Rules are tried in order and the first match wins.
pub fn apply_overrides(
    model_answer: QueryType,
    flags: ModalityFlags,
    query_chars: usize,
    threshold: usize,
) -> QueryType {
    if flags.has_image && !flags.has_document {
        QueryType::Image
    // the length test is shadowed by the image-only rule above
    } else if flags.has_image && (flags.has_document || query_chars > threshold) {
        QueryType::MultiModal
    } else if flags.has_audio && !flags.has_document {
        QueryType::Audio
    } else {
        model_answer
    }
}
