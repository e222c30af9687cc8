use std::sync::Arc;

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

/// Coordinator-side counters exported at `/metrics`.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub jobs_submitted: IntCounter,
    pub nodes_registered: IntCounter,
    pub heartbeats_received: IntCounter,
    pub results_received: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Arc::new(Registry::new());

        let jobs_submitted =
            IntCounter::new("quorumd_jobs_submitted_total", "Jobs accepted over the API").unwrap();
        let nodes_registered =
            IntCounter::new("quorumd_nodes_registered_total", "Node registration requests")
                .unwrap();
        let heartbeats_received =
            IntCounter::new("quorumd_heartbeats_received_total", "Heartbeats received").unwrap();
        let results_received =
            IntCounter::new("quorumd_results_received_total", "Execution results received")
                .unwrap();

        registry.register(Box::new(jobs_submitted.clone())).unwrap();
        registry
            .register(Box::new(nodes_registered.clone()))
            .unwrap();
        registry
            .register(Box::new(heartbeats_received.clone()))
            .unwrap();
        registry
            .register(Box::new(results_received.clone()))
            .unwrap();

        Self {
            registry,
            jobs_submitted,
            nodes_registered,
            heartbeats_received,
            results_received,
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
