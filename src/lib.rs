#![deny(missing_docs)]

//! Core library for Aura Router: classify multi-modal requests, dispatch them to capability
//! agents, and fuse the partial answers.

/// Text, image, and audio capability agents.
pub mod agents;
/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Chat-completion client abstraction and the OpenAI-compatible adapter.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Workflow counters.
pub mod metrics;
/// Qdrant vector store integration.
pub mod qdrant;
/// Query embedding and vector search for the text agent.
pub mod retrieval;
/// Speech-to-text client abstraction and the OpenAI-compatible adapter.
pub mod transcription;
/// Classification, routing, and synthesis state machine.
pub mod workflow;
