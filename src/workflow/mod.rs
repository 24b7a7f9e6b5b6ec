//! Classification-and-routing workflow.
//!
//! One invocation walks `CLASSIFY → {TEXT | IMAGE | AUDIO | MULTI_MODAL | ERROR} → SYNTHESIZE`,
//! threading a [`WorkflowState`] through every step and returning a [`WorkflowResult`] whatever
//! happens along the way.

pub mod classifier;
pub mod engine;
pub mod policy;
pub mod router;
pub mod state;
pub mod synthesizer;

pub use classifier::{Classifier, ClassificationError};
pub use engine::{InitError, Orchestrator, WorkflowServices};
pub use policy::{IntentMap, RoutingPolicy};
pub use router::{Route, route};
pub use state::{
    Classification, Intent, ModalityFlags, QueryType, Request, WorkflowMetadata, WorkflowResult,
    WorkflowState,
};
pub use synthesizer::{NO_RESULT_MESSAGE, Synthesizer};
