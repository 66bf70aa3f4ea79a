//! Prometheus metrics
//!
//! Metrics live on a private registry so several services can coexist in one
//! process (and in tests) without global-name collisions.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

use crate::error::{Error, Result};

/// Metrics for probes, rounds and keyed mutations
pub struct Metrics {
    registry: Registry,
    probes: IntCounterVec,
    round_duration: Histogram,
    last_round_nodes: IntGauge,
    mutations: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let probes = IntCounterVec::new(
            Opts::new("leaf_topology_probes_total", "Topology probes by outcome"),
            &["outcome"],
        )
        .map_err(metrics_err)?;
        let round_duration = Histogram::with_opts(HistogramOpts::new(
            "leaf_topology_round_duration_seconds",
            "Duration of a full fan-out round",
        ))
        .map_err(metrics_err)?;
        let last_round_nodes = IntGauge::new(
            "leaf_topology_last_round_nodes",
            "Nodes in the most recently assembled graph",
        )
        .map_err(metrics_err)?;
        let mutations = IntCounterVec::new(
            Opts::new("leaf_topology_mutations_total", "Keyed mutations by operation and outcome"),
            &["operation", "outcome"],
        )
        .map_err(metrics_err)?;

        registry.register(Box::new(probes.clone())).map_err(metrics_err)?;
        registry.register(Box::new(round_duration.clone())).map_err(metrics_err)?;
        registry.register(Box::new(last_round_nodes.clone())).map_err(metrics_err)?;
        registry.register(Box::new(mutations.clone())).map_err(metrics_err)?;

        Ok(Self {
            registry,
            probes,
            round_duration,
            last_round_nodes,
            mutations,
        })
    }

    pub fn record_probe(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.probes.with_label_values(&[outcome]).inc();
    }

    pub fn record_round(&self, seconds: f64, nodes: usize) {
        self.round_duration.observe(seconds);
        self.last_round_nodes.set(nodes as i64);
    }

    pub fn record_mutation(&self, operation: &str, applied: bool) {
        let outcome = if applied { "applied" } else { "declined" };
        self.mutations.with_label_values(&[operation, outcome]).inc();
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<(String, String)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_err)?;
        let body = String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))?;
        Ok((encoder.format_type().to_string(), body))
    }
}

fn metrics_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics error: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.record_probe(true);
        metrics.record_probe(false);
        metrics.record_mutation("withdraw", false);
        metrics.record_round(0.25, 4);

        let (content_type, body) = metrics.render().unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert!(body.contains("leaf_topology_probes_total{outcome=\"failure\"} 1"));
        assert!(body.contains(
            "leaf_topology_mutations_total{operation=\"withdraw\",outcome=\"declined\"} 1"
        ));
        assert!(body.contains("leaf_topology_last_round_nodes 4"));
    }
}
