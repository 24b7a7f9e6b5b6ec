//! Tunable routing constants.

use std::time::Duration;

use crate::agents::{AudioAnalysis, ImageAnalysis};
use crate::config::Config;

use super::state::Intent;

/// Per-intent lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntentMap<T> {
    /// Value used for [`Intent::Search`].
    pub search: T,
    /// Value used for [`Intent::Analyze`].
    pub analyze: T,
    /// Value used for [`Intent::Process`].
    pub process: T,
    /// Value used for [`Intent::Question`].
    pub question: T,
}

impl<T: Copy> IntentMap<T> {
    /// Look up the value for `intent`.
    pub fn get(&self, intent: Intent) -> T {
        match intent {
            Intent::Search => self.search,
            Intent::Analyze => self.analyze,
            Intent::Process => self.process,
            Intent::Question => self.question,
        }
    }
}

/// Constants steering classification overrides, agent inputs, and step execution.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingPolicy {
    /// Query length (in characters) above which an image request counts as multi-modal.
    ///
    /// Inert under the current override order: an image without a document is always routed to
    /// the image path first, so this only applies once a document is attached, where the request
    /// is multi-modal regardless.
    pub multi_modal_query_threshold: usize,
    /// Chunks retrieved by the text path.
    pub retrieval_top_k: usize,
    /// Whether the text path retrieves context when the request does not say.
    pub use_rag_by_default: bool,
    /// Run multi-modal sub-agents concurrently.
    pub concurrent_fanout: bool,
    /// Upper bound for each classification, agent, and fusion call.
    pub step_timeout: Duration,
    /// Image analysis chosen for each intent.
    pub image_analysis: IntentMap<ImageAnalysis>,
    /// Audio analysis chosen for each intent.
    pub audio_analysis: IntentMap<AudioAnalysis>,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            multi_modal_query_threshold: 20,
            retrieval_top_k: 5,
            use_rag_by_default: true,
            concurrent_fanout: false,
            step_timeout: Duration::from_secs(120),
            image_analysis: IntentMap {
                search: ImageAnalysis::Describe,
                analyze: ImageAnalysis::Analyze,
                process: ImageAnalysis::Ocr,
                question: ImageAnalysis::Question,
            },
            audio_analysis: IntentMap {
                search: AudioAnalysis::Transcribe,
                analyze: AudioAnalysis::Analyze,
                process: AudioAnalysis::Transcribe,
                question: AudioAnalysis::Analyze,
            },
        }
    }
}

impl RoutingPolicy {
    /// Policy with the tunables taken from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            multi_modal_query_threshold: config.multi_modal_query_threshold,
            retrieval_top_k: config.retrieval_top_k,
            concurrent_fanout: config.concurrent_fanout,
            step_timeout: Duration::from_secs(config.step_timeout_secs),
            ..Self::default()
        }
    }
}
