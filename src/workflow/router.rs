//! Static dispatch from classification to processing state.

use serde::Serialize;

use super::state::QueryType;

/// Processing state selected after classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Text agent only.
    Text,
    /// Image agent only.
    Image,
    /// Audio agent only.
    Audio,
    /// Fan out across the attached modalities and the text agent.
    MultiModal,
    /// Terminal failure; no agent runs and synthesis is skipped.
    Error,
}

/// Pick the next state. A recorded error always wins over the table.
pub fn route(query_type: Option<QueryType>, error_is_set: bool) -> Route {
    if error_is_set {
        return Route::Error;
    }
    match query_type {
        Some(QueryType::Image) => Route::Image,
        Some(QueryType::Audio) => Route::Audio,
        Some(QueryType::MultiModal) => Route::MultiModal,
        Some(QueryType::Text | QueryType::Error) | None => Route::Text,
    }
}
