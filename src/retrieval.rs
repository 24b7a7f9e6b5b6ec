//! Query-time retrieval: embed the question and pull the closest chunks from Qdrant.

use async_trait::async_trait;
use thiserror::Error;

use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::qdrant::{
    QdrantError, QdrantService, build_source_filter,
    filters::{payload_source_uri, payload_text},
};

/// Errors emitted while retrieving context for a query.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Embedding provider failed to return vectors for the query text.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Qdrant search request returned an error response.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// Returned embedding dimension does not match configuration.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected embedding dimension configured on the server.
        expected: usize,
        /// Actual embedding dimension produced by the provider.
        actual: usize,
    },
    /// Embedding provider returned no vectors.
    #[error("Embedding provider returned no vectors for the query")]
    EmptyEmbedding,
}

/// Chunk returned by a similarity search.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedDocument {
    /// Identifier assigned by the vector store.
    pub id: String,
    /// Similarity score reported by the vector store.
    pub score: f32,
    /// Stored chunk text.
    pub text: String,
    /// Document the chunk was ingested from, when recorded.
    pub source_uri: Option<String>,
}

/// Source of retrieved context for the text agent.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to `top_k` chunks relevant to `query`, optionally limited to one document.
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        document: Option<&str>,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError>;
}

/// [`Retriever`] backed by an embedding provider and a Qdrant collection.
pub struct QdrantRetriever {
    embedding_client: Box<dyn EmbeddingClient + Send + Sync>,
    qdrant: QdrantService,
    collection: String,
    dimension: usize,
    score_threshold: Option<f32>,
}

impl QdrantRetriever {
    /// Assemble a retriever over `collection`.
    pub fn new(
        embedding_client: Box<dyn EmbeddingClient + Send + Sync>,
        qdrant: QdrantService,
        collection: impl Into<String>,
        dimension: usize,
        score_threshold: Option<f32>,
    ) -> Self {
        Self {
            embedding_client,
            qdrant,
            collection: collection.into(),
            dimension,
            score_threshold,
        }
    }
}

#[async_trait]
impl Retriever for QdrantRetriever {
    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        document: Option<&str>,
    ) -> Result<Vec<RetrievedDocument>, RetrievalError> {
        let mut vectors = self
            .embedding_client
            .generate_embeddings(vec![query.to_string()])
            .await?;
        let vector = vectors.pop().ok_or(RetrievalError::EmptyEmbedding)?;

        let actual = vector.len();
        if actual != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }

        let hits = self
            .qdrant
            .search_points(
                &self.collection,
                vector,
                build_source_filter(document),
                top_k.max(1),
                self.score_threshold,
            )
            .await?;

        let documents: Vec<RetrievedDocument> = hits
            .into_iter()
            .filter_map(|hit| {
                let payload = hit.payload?;
                Some(RetrievedDocument {
                    text: payload_text(&payload)?,
                    source_uri: payload_source_uri(&payload),
                    id: hit.id,
                    score: hit.score,
                })
            })
            .collect();

        tracing::info!(
            collection = %self.collection,
            top_k,
            scoped_to_document = document.is_some(),
            hits = documents.len(),
            "Retrieved context"
        );
        Ok(documents)
    }
}
