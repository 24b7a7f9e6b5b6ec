//! HTTP surface for Aura Router.
//!
//! - `POST /query` – Run one request through the workflow. Workflow failures are reported
//!   in-band (`success: false` plus `error`); only a blank query is rejected with `400`.
//! - `GET /metrics` – Invocation, failure, fusion, and per-route counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.

use crate::metrics::MetricsSnapshot;
use crate::workflow::{Orchestrator, Request, WorkflowResult};
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Operations the HTTP layer needs from the workflow.
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    /// Run one request to completion.
    async fn process(&self, request: Request) -> WorkflowResult;

    /// Current workflow counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

#[async_trait]
impl WorkflowApi for Orchestrator {
    async fn process(&self, request: Request) -> WorkflowResult {
        Orchestrator::process(self, request).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        Orchestrator::metrics_snapshot(self)
    }
}

/// Build the HTTP router exposing the workflow.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: WorkflowApi + 'static,
{
    Router::new()
        .route("/query", post(run_query::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .with_state(service)
}

/// Request body for the `POST /query` endpoint.
#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    image_path: Option<String>,
    #[serde(default)]
    audio_path: Option<String>,
    /// Document handle used to scope retrieval.
    #[serde(default)]
    document_path: Option<String>,
    #[serde(default)]
    use_rag: Option<bool>,
    /// Spoken-language hint for the audio attachment.
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    translate_to: Option<String>,
}

impl From<QueryRequest> for Request {
    fn from(body: QueryRequest) -> Self {
        Request {
            query: body.query,
            image: body.image_path,
            audio: body.audio_path,
            document: body.document_path,
            use_rag: body.use_rag,
            language: body.language,
            translate_to: body.translate_to,
        }
    }
}

async fn run_query<S>(
    State(service): State<Arc<S>>,
    Json(body): Json<QueryRequest>,
) -> Result<Json<WorkflowResult>, ApiError>
where
    S: WorkflowApi,
{
    if body.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".into()));
    }
    let result = service.process(body.into()).await;
    tracing::info!(
        success = result.success,
        query_type = ?result.metadata.query_type,
        request_id = %result.metadata.request_id,
        "Query request completed"
    );
    Ok(Json(result))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: WorkflowApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "query",
                method: "POST",
                path: "/query",
                description: "Classify a request, route it to the text, image, or audio agents, and return the synthesized answer with sources and a processing trace.",
                request_example: Some(json!({
                    "query": "Compare this invoice against the contract terms",
                    "image_path": "/data/invoice.png",
                    "document_path": "contract.pdf",
                    "use_rag": true
                })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return workflow counters: invocations, failures, fusion calls, and routing decisions.",
                request_example: None,
            },
        ],
    })
}

enum ApiError {
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
        }
    }
}
