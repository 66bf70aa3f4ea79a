//! Topology Service
//!
//! Runs one round per call: fan out to every configured target, assemble the
//! graph, and report which targets failed. Per-target health is kept across
//! rounds.

use crate::config::TopologyConfig;
use crate::domain::ports::Prober;
use crate::error::Result;
use crate::fanout::{FanOutConfig, FanOutCoordinator};
use crate::metrics::Metrics;
use crate::probe::{HttpProbeClient, ProbeClientConfig, ProbeFailure, ProbeResult, ProbeTarget};
use crate::topology::assembler::{AssemblerConfig, TopologyAssembler};
use crate::topology::graph::Graph;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

// =============================================================================
// Snapshot Types
// =============================================================================

/// A target that produced no topology in a round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTarget {
    pub address: String,
    pub cause: ProbeFailure,
}

/// Result of one round
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologySnapshot {
    pub graph: Graph,
    pub failed_targets: Vec<FailedTarget>,
    pub probed: usize,
    pub succeeded: usize,
    pub taken_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl TopologySnapshot {
    pub fn is_complete(&self) -> bool {
        self.failed_targets.is_empty()
    }
}

/// Health of one target across rounds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetHealth {
    pub address: String,
    pub rounds: u64,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<ProbeFailure>,
}

// =============================================================================
// Service
// =============================================================================

/// Config, coordinator and assembler wired together
pub struct TopologyService {
    targets: Vec<ProbeTarget>,
    coordinator: FanOutCoordinator,
    assembler: TopologyAssembler,
    health: DashMap<String, TargetHealth>,
    metrics: Option<Arc<Metrics>>,
}

impl TopologyService {
    pub fn new(
        targets: Vec<ProbeTarget>,
        prober: Arc<dyn Prober>,
        fanout: FanOutConfig,
        assembler: AssemblerConfig,
    ) -> Self {
        let health = targets
            .iter()
            .map(|t| {
                (
                    t.address.clone(),
                    TargetHealth {
                        address: t.address.clone(),
                        ..Default::default()
                    },
                )
            })
            .collect();

        Self {
            targets,
            coordinator: FanOutCoordinator::new(prober, fanout),
            assembler: TopologyAssembler::new(assembler),
            health,
            metrics: None,
        }
    }

    /// Build a service that probes over HTTP; the config must be valid
    pub fn from_config(config: &TopologyConfig) -> Result<Self> {
        config.validate()?;
        let client = HttpProbeClient::new(ProbeClientConfig {
            timeout: config.probe_timeout(),
            connect_timeout: config.probe_timeout(),
            ..Default::default()
        })?;

        Ok(Self::new(
            config.targets(),
            Arc::new(client),
            FanOutConfig {
                round_deadline: config.round_deadline(),
            },
            AssemblerConfig {
                control_port: config.control_port,
            },
        ))
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn targets(&self) -> &[ProbeTarget] {
        &self.targets
    }

    /// Run one round; failed targets are reported, not raised
    pub async fn fetch(&self) -> Result<TopologySnapshot> {
        let started = Instant::now();
        let taken_at = Utc::now();

        let results = self.coordinator.gather(&self.targets).await;
        let graph = self.assembler.assemble(&results);
        graph.validate()?;

        let mut failed_targets = Vec::new();
        for result in &results {
            self.record_health(result, taken_at);
            if let Some(metrics) = &self.metrics {
                metrics.record_probe(result.is_success());
            }
            if let ProbeResult::Failure { target, cause } = result {
                failed_targets.push(FailedTarget {
                    address: target.address.clone(),
                    cause: cause.clone(),
                });
            }
        }

        let elapsed = started.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.record_round(elapsed.as_secs_f64(), graph.nodes.len());
        }

        let snapshot = TopologySnapshot {
            probed: results.len(),
            succeeded: results.len() - failed_targets.len(),
            graph,
            failed_targets,
            taken_at,
            duration_ms: elapsed.as_millis() as u64,
        };

        if snapshot.is_complete() {
            info!(
                nodes = snapshot.graph.nodes.len(),
                edges = snapshot.graph.edges.len(),
                duration_ms = snapshot.duration_ms,
                "topology round complete"
            );
        } else {
            warn!(
                nodes = snapshot.graph.nodes.len(),
                edges = snapshot.graph.edges.len(),
                failed = snapshot.failed_targets.len(),
                "topology round partially failed"
            );
        }

        Ok(snapshot)
    }

    /// Health of every configured target, in configuration order
    pub fn target_health(&self) -> Vec<TargetHealth> {
        self.targets
            .iter()
            .filter_map(|t| self.health.get(&t.address).map(|h| h.value().clone()))
            .collect()
    }

    fn record_health(&self, result: &ProbeResult, at: DateTime<Utc>) {
        let address = result.target().address.clone();
        let mut entry = self.health.entry(address.clone()).or_insert_with(|| TargetHealth {
            address,
            ..Default::default()
        });
        entry.rounds += 1;
        match result {
            ProbeResult::Success { .. } => {
                entry.consecutive_failures = 0;
                entry.last_success = Some(at);
            }
            ProbeResult::Failure { cause, .. } => {
                entry.consecutive_failures += 1;
                entry.last_failure = Some(cause.clone());
            }
        }
    }
}
