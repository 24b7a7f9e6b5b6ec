//! Retrieval-augmented text agent.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{AgentError, AgentOutput, CapabilityAgent, CapabilityKind, Source};
use crate::llm::{ChatMessage, CompletionRequest, LanguageModel, ReasoningEffort, Verbosity};
use crate::retrieval::{RetrievedDocument, Retriever};

const SYSTEM_PROMPT: &str = "You are a Text Agent specialized in document analysis and question answering.

Answer the user's question using the context retrieved from their documents.

Guidelines:
- Use information from the retrieved documents to answer questions
- If the context does not contain relevant information, say so clearly
- Cite document numbers when referencing information (e.g. \"According to Document 2...\")
- If documents disagree, mention the differences
- Keep answers concise but complete

Only use information from the provided context. Do not make up information.";

/// Input accepted by [`TextAgent`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextRequest {
    /// Natural-language question.
    pub query: String,
    /// Retrieve supporting chunks before answering.
    pub use_rag: bool,
    /// Number of chunks to retrieve.
    pub top_k: usize,
    /// Restrict retrieval to chunks from this document.
    pub document: Option<String>,
}

/// Answers questions over chunks pulled from the vector store.
pub struct TextAgent {
    llm: Arc<dyn LanguageModel>,
    retriever: Arc<dyn Retriever>,
    model: String,
}

impl TextAgent {
    /// Build an agent that answers with `model` over context from `retriever`.
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        retriever: Arc<dyn Retriever>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            retriever,
            model: model.into(),
        }
    }

    async fn gather_context(&self, request: &TextRequest) -> Vec<RetrievedDocument> {
        match self
            .retriever
            .retrieve(&request.query, request.top_k, request.document.as_deref())
            .await
        {
            Ok(documents) => {
                if documents.is_empty() {
                    tracing::warn!("No relevant documents found in knowledge base");
                }
                documents
            }
            Err(error) => {
                tracing::warn!(error = %error, "Retrieval failed; answering without context");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl CapabilityAgent for TextAgent {
    type Input = TextRequest;

    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Text
    }

    async fn process(&self, request: TextRequest) -> Result<AgentOutput, AgentError> {
        if request.query.trim().is_empty() {
            return Err(AgentError::InvalidInput("No query provided".into()));
        }

        let documents = if request.use_rag {
            self.gather_context(&request).await
        } else {
            Vec::new()
        };

        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(user_message(&request.query, &format_context(&documents))),
        ];
        let response = self
            .llm
            .complete(
                CompletionRequest::new(self.model.clone(), messages)
                    .with_reasoning_effort(ReasoningEffort::Medium)
                    .with_verbosity(Verbosity::Medium),
            )
            .await?;

        let sources: Vec<Source> = documents
            .iter()
            .map(|document| Source::preview(document.id.clone(), document.score, &document.text))
            .collect();

        let mut metadata = Map::new();
        metadata.insert("documents_retrieved".into(), Value::from(sources.len()));
        metadata.insert("rag_enabled".into(), Value::Bool(request.use_rag));
        metadata.insert("model".into(), Value::String(self.model.clone()));
        if let Some(document) = request.document {
            metadata.insert("document".into(), Value::String(document));
        }

        Ok(AgentOutput {
            response,
            analysis_type: None,
            sources,
            metadata,
        })
    }
}

fn format_context(documents: &[RetrievedDocument]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(index, document)| {
            format!(
                "[Document {}] (Relevance: {:.2})\n{}\n",
                index + 1,
                document.score,
                document.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn user_message(query: &str, context: &str) -> String {
    if context.is_empty() {
        format!(
            "No relevant documents were found in the knowledge base.\n\n\
             User Question: {query}\n\n\
             Provide a general answer, and state clearly that it is not based on the knowledge base."
        )
    } else {
        format!(
            "Context from relevant documents:\n\n{context}\n---\n\n\
             User Question: {query}\n\n\
             Answer the question based on the context above."
        )
    }
}
