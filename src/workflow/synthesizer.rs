//! Merge partial results into the final answer.

use std::sync::Arc;
use std::time::Duration;

use super::state::{FinalAnswer, WorkflowState};
use crate::llm::{ChatMessage, CompletionRequest, LanguageModel, ReasoningEffort, Verbosity};

/// Response used when no agent produced output.
pub const NO_RESULT_MESSAGE: &str = "No response generated.";

const MAX_TOKENS: u32 = 500;

/// One labeled partial result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Heading shown to the fusion model.
    pub label: String,
    /// Partial result text.
    pub content: String,
}

/// Outcome of the synthesis step.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    /// Answer to store in the state.
    pub answer: FinalAnswer,
    /// Failure raised while fusing, if any.
    pub error: Option<String>,
    /// Whether a fusion call was issued.
    pub fused: bool,
}

/// Collect non-empty partial results in priority order: text, image, audio.
pub fn collect_sections(state: &WorkflowState) -> Vec<Section> {
    let mut sections = Vec::new();
    if let Some(text) = state.text_result()
        && !text.response.trim().is_empty()
    {
        sections.push(Section {
            label: "Document Analysis".into(),
            content: text.response.clone(),
        });
    }
    if let Some(image) = state.image_result()
        && !image.response.trim().is_empty()
    {
        sections.push(Section {
            label: format!("Image Analysis ({})", image.analysis_type),
            content: image.response.clone(),
        });
    }
    if let Some(audio) = state.audio_result()
        && !audio.response.trim().is_empty()
    {
        sections.push(Section {
            label: format!("Audio Analysis ({})", audio.analysis_type),
            content: audio.response.clone(),
        });
    }
    sections
}

/// Passes a single result through and fuses several with one model call.
pub struct Synthesizer {
    llm: Arc<dyn LanguageModel>,
    model: String,
    timeout: Duration,
}

impl Synthesizer {
    /// Build a synthesizer fusing with `model`.
    pub fn new(llm: Arc<dyn LanguageModel>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            llm,
            model: model.into(),
            timeout,
        }
    }

    /// Produce the final answer for `state`. Never fails; fusion errors become the answer.
    pub async fn synthesize(&self, state: &WorkflowState) -> Synthesis {
        let sources = state
            .text_result()
            .map(|text| text.sources.clone())
            .unwrap_or_default();
        let mut sections = collect_sections(state);

        if sections.len() <= 1 {
            let response = sections
                .pop()
                .map(|section| section.content)
                .unwrap_or_else(|| NO_RESULT_MESSAGE.to_string());
            return Synthesis {
                answer: FinalAnswer { response, sources },
                error: None,
                fused: false,
            };
        }

        tracing::info!(sections = sections.len(), "Fusing partial results");
        let request = CompletionRequest::new(
            self.model.clone(),
            vec![ChatMessage::user(fusion_prompt(state.query(), &sections))],
        )
        .with_max_tokens(MAX_TOKENS)
        .with_reasoning_effort(ReasoningEffort::Medium)
        .with_verbosity(Verbosity::Medium);

        let outcome = match tokio::time::timeout(self.timeout, self.llm.complete(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) => Err(error.to_string()),
            Err(_) => Err(format!("Timed out after {:?}", self.timeout)),
        };

        match outcome {
            Ok(response) => Synthesis {
                answer: FinalAnswer { response, sources },
                error: None,
                fused: true,
            },
            Err(message) => {
                tracing::error!(error = %message, "Fusion failed");
                Synthesis {
                    answer: FinalAnswer {
                        response: format!("Error: {message}"),
                        sources,
                    },
                    error: Some(message),
                    fused: true,
                }
            }
        }
    }
}

fn fusion_prompt(query: &str, sections: &[Section]) -> String {
    let body = sections
        .iter()
        .map(|section| format!("**{}:**\n{}", section.label, section.content))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "Combine these analysis results into a coherent response to the user's question: \"{query}\"\n\n\
         {body}\n\n\
         Provide a unified, clear answer that integrates all information without repeating itself."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Source;
    use crate::llm::testing::ScriptedModel;
    use crate::workflow::state::{AnalysisResult, Request, TextResult};
    use serde_json::Map;

    fn synthesizer(llm: Arc<ScriptedModel>) -> Synthesizer {
        Synthesizer::new(llm, "gpt-5-mini", Duration::from_secs(5))
    }

    fn analysis(response: &str, analysis_type: &str) -> AnalysisResult {
        AnalysisResult {
            response: response.into(),
            analysis_type: analysis_type.into(),
            metadata: Map::new(),
        }
    }

    #[test]
    fn sections_follow_priority_order() {
        let mut state = WorkflowState::new(Request::new("q"));
        state
            .set_audio_result(analysis("clip", "transcribe"))
            .expect("audio");
        state.set_image_result(analysis("photo", "ocr")).expect("image");
        state
            .set_text_result(TextResult {
                response: "docs".into(),
                sources: Vec::new(),
            })
            .expect("text");

        let labels: Vec<String> = collect_sections(&state)
            .into_iter()
            .map(|section| section.label)
            .collect();
        assert_eq!(
            labels,
            vec![
                "Document Analysis",
                "Image Analysis (ocr)",
                "Audio Analysis (transcribe)"
            ]
        );
    }

    #[tokio::test]
    async fn single_section_passes_through_verbatim() {
        let llm = Arc::new(ScriptedModel::new());
        let mut state = WorkflowState::new(Request::new("q"));
        let raw = "  Exact *markdown* answer.\n";
        state
            .set_text_result(TextResult {
                response: raw.into(),
                sources: vec![Source::preview("a", 0.9, "chunk")],
            })
            .expect("text");

        let synthesis = synthesizer(llm.clone()).synthesize(&state).await;

        assert_eq!(synthesis.answer.response, raw);
        assert_eq!(synthesis.answer.sources.len(), 1);
        assert!(!synthesis.fused);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn no_sections_yield_no_result_message() {
        let llm = Arc::new(ScriptedModel::new());
        let state = WorkflowState::new(Request::new("q"));

        let synthesis = synthesizer(llm.clone()).synthesize(&state).await;

        assert_eq!(synthesis.answer.response, NO_RESULT_MESSAGE);
        assert_eq!(synthesis.error, None);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn several_sections_are_fused_once() {
        let llm = Arc::new(ScriptedModel::replying(&["Unified answer."]));
        let mut state = WorkflowState::new(Request::new("What does the invoice say?"));
        state.set_image_result(analysis("Total 42", "ocr")).expect("image");
        state
            .set_text_result(TextResult {
                response: "Terms are net 30.".into(),
                sources: Vec::new(),
            })
            .expect("text");

        let synthesis = synthesizer(llm.clone()).synthesize(&state).await;

        assert_eq!(synthesis.answer.response, "Unified answer.");
        assert!(synthesis.fused);
        assert_eq!(llm.call_count(), 1);
        let prompt = llm.requests()[0].messages[0].text();
        assert!(prompt.contains("\"What does the invoice say?\""));
        assert!(prompt.contains("**Document Analysis:**\nTerms are net 30."));
        assert!(prompt.contains("**Image Analysis (ocr):**\nTotal 42"));
        assert_eq!(llm.requests()[0].max_tokens, Some(MAX_TOKENS));
        assert_eq!(
            llm.requests()[0].reasoning_effort,
            Some(ReasoningEffort::Medium)
        );
        assert_eq!(llm.requests()[0].verbosity, Some(Verbosity::Medium));
    }

    #[tokio::test]
    async fn fusion_failure_becomes_error_answer() {
        let llm = Arc::new(ScriptedModel::new());
        llm.push_failure("context length exceeded");
        let mut state = WorkflowState::new(Request::new("q"));
        state.set_image_result(analysis("a", "describe")).expect("image");
        state
            .set_audio_result(analysis("b", "transcribe"))
            .expect("audio");

        let synthesis = synthesizer(llm).synthesize(&state).await;

        assert!(synthesis.answer.response.starts_with("Error: "));
        assert!(
            synthesis
                .error
                .as_deref()
                .is_some_and(|message| message.contains("context length exceeded"))
        );
    }
}
