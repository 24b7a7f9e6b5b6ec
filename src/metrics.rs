use std::sync::atomic::{AtomicU64, Ordering};

use crate::workflow::Route;

/// Thread-safe counters describing workflow activity.
#[derive(Default)]
pub struct WorkflowMetrics {
    invocations: AtomicU64,
    failures: AtomicU64,
    fusions: AtomicU64,
    text_routes: AtomicU64,
    image_routes: AtomicU64,
    audio_routes: AtomicU64,
    multi_modal_routes: AtomicU64,
    error_routes: AtomicU64,
}

impl WorkflowMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the routing decision taken for one invocation.
    pub fn record_route(&self, route: Route) {
        let counter = match route {
            Route::Text => &self.text_routes,
            Route::Image => &self.image_routes,
            Route::Audio => &self.audio_routes,
            Route::MultiModal => &self.multi_modal_routes,
            Route::Error => &self.error_routes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished invocation and whether it completed without error.
    pub fn record_completion(&self, success: bool) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one fusion model call issued by the synthesizer.
    pub fn record_fusion(&self) {
        self.fusions.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            fusions: self.fusions.load(Ordering::Relaxed),
            routes: RouteCounts {
                text: self.text_routes.load(Ordering::Relaxed),
                image: self.image_routes.load(Ordering::Relaxed),
                audio: self.audio_routes.load(Ordering::Relaxed),
                multi_modal: self.multi_modal_routes.load(Ordering::Relaxed),
                error: self.error_routes.load(Ordering::Relaxed),
            },
        }
    }
}

/// Immutable view of workflow counters used for reporting.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of completed invocations since startup.
    pub invocations: u64,
    /// Invocations that finished with an error recorded.
    pub failures: u64,
    /// Fusion model calls issued by the synthesizer.
    pub fusions: u64,
    /// Routing decisions broken down by target.
    pub routes: RouteCounts,
}

/// Per-route invocation counters.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct RouteCounts {
    /// Requests routed to the text agent.
    pub text: u64,
    /// Requests routed to the image agent.
    pub image: u64,
    /// Requests routed to the audio agent.
    pub audio: u64,
    /// Requests fanned out across several agents.
    pub multi_modal: u64,
    /// Requests terminated by a classification failure.
    pub error: u64,
}
