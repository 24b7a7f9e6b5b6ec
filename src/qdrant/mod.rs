//! Qdrant vector store integration (read path used for retrieval).

pub mod client;
pub mod filters;
pub mod types;

pub use client::QdrantService;
pub use filters::build_source_filter;
pub use types::{QdrantError, ScoredPoint};
