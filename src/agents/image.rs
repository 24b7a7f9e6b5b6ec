//! Vision agent: describe, analyze, transcribe text from, or answer questions about an image.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::Serialize;
use serde_json::{Map, Value};

use super::{AgentError, AgentOutput, CapabilityAgent, CapabilityKind};
use crate::llm::{ChatMessage, CompletionRequest, LanguageModel, ReasoningEffort, Verbosity};

const MAX_TOKENS: u32 = 1000;

const DESCRIBE_PROMPT: &str = "Identify and describe this document image.

Report:
- Document type (invoice, contract, receipt, form, report, letter, diagram, other)
- Key visual elements: headers, logos, layout, stamps, signatures, barcodes
- A short preview of the visible text
- Scan quality (excellent, good, poor)";

const ANALYZE_PROMPT: &str = "Analyze this document image for:
1. Document type and purpose
2. Key information (dates, amounts, parties, terms)
3. Structure (sections, clauses, fields)
4. Legal or financial elements (signatures, totals, terms)
5. Completeness (missing fields, stamps, signatures)
6. Risks or anomalies

Provide business insight, not just a description.";

const OCR_PROMPT: &str = "Extract ALL text from this image.

Requirements:
1. Extract every word, number, and symbol
2. Preserve line breaks, spacing, and structure (headers, sections, tables)
3. Mark uncertain text with [?]
4. Note any illegible sections

Start with the document type, then the full text.";

/// Analysis performed by [`ImageAgent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageAnalysis {
    /// General description of the image.
    Describe,
    /// In-depth analysis, optionally steered by the query.
    Analyze,
    /// Text extraction.
    Ocr,
    /// Answer the query about the image.
    Question,
}

impl ImageAnalysis {
    /// Stable lowercase identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            ImageAnalysis::Describe => "describe",
            ImageAnalysis::Analyze => "analyze",
            ImageAnalysis::Ocr => "ocr",
            ImageAnalysis::Question => "question",
        }
    }

    /// Whether the workflow forwards the user's query with this analysis.
    ///
    /// `analyze` keeps its structured prompt unless a caller supplies a task directly.
    pub fn uses_query(self) -> bool {
        matches!(self, ImageAnalysis::Question)
    }
}

impl fmt::Display for ImageAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input accepted by [`ImageAgent`].
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRequest {
    /// File path or `http(s)`/`data:` URL of the image.
    pub image: Option<String>,
    /// Analysis to perform.
    pub analysis: ImageAnalysis,
    /// User query, for analyses that take one.
    pub query: Option<String>,
}

/// Runs vision prompts against a multimodal chat model.
pub struct ImageAgent {
    llm: Arc<dyn LanguageModel>,
    model: String,
}

impl ImageAgent {
    /// Build an agent that sends images to `model`.
    pub fn new(llm: Arc<dyn LanguageModel>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }
}

#[async_trait]
impl CapabilityAgent for ImageAgent {
    type Input = ImageRequest;

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Image
    }

    async fn process(&self, request: ImageRequest) -> Result<AgentOutput, AgentError> {
        let image = request
            .image
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AgentError::InvalidInput("No image provided".into()))?;
        let query = request
            .query
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());

        let prompt = match (request.analysis, query) {
            (ImageAnalysis::Describe, _) => DESCRIBE_PROMPT,
            (ImageAnalysis::Ocr, _) => OCR_PROMPT,
            (ImageAnalysis::Analyze, Some(query)) => query,
            (ImageAnalysis::Analyze, None) => ANALYZE_PROMPT,
            (ImageAnalysis::Question, Some(query)) => query,
            (ImageAnalysis::Question, None) => {
                return Err(AgentError::InvalidInput(
                    "Query required for question analysis".into(),
                ));
            }
        };

        let image_url = load_image_url(image).await?;
        tracing::info!(analysis = %request.analysis, image, "Processing image");

        let completion = CompletionRequest::new(
            self.model.clone(),
            vec![ChatMessage::user_with_image(prompt, image_url)],
        )
        .with_max_tokens(MAX_TOKENS)
        .with_reasoning_effort(ReasoningEffort::Medium)
        .with_verbosity(Verbosity::Medium);
        let response = self.llm.complete(completion).await?;

        let mut metadata = Map::new();
        metadata.insert("model".into(), Value::String(self.model.clone()));
        metadata.insert("image".into(), Value::String(image.to_string()));
        if let Some(query) = query
            && matches!(
                request.analysis,
                ImageAnalysis::Analyze | ImageAnalysis::Question
            )
        {
            metadata.insert("query".into(), Value::String(query.to_string()));
        }

        Ok(AgentOutput {
            response,
            analysis_type: Some(request.analysis.as_str().to_string()),
            sources: Vec::new(),
            metadata,
        })
    }
}

/// Turn an image reference into something the vision endpoint accepts.
///
/// Remote and inline URLs pass through; local files are inlined as base64 `data:` URLs.
async fn load_image_url(image: &str) -> Result<String, AgentError> {
    if ["http://", "https://", "data:"]
        .iter()
        .any(|prefix| image.starts_with(prefix))
    {
        return Ok(image.to_string());
    }

    let path = Path::new(image);
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| AgentError::Attachment {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(format!(
        "data:{};base64,{}",
        mime_type(path),
        STANDARD.encode(bytes)
    ))
}

fn mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("tif" | "tiff") => "image/tiff",
        _ => "image/jpeg",
    }
}
