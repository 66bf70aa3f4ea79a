//! Fan-Out Coordinator
//!
//! Probes every target concurrently and gathers exactly one result per
//! target. Each probe task delivers into a channel sized to the number of
//! targets, so no task ever waits on the coordinator; the coordinator counts
//! deliveries and stops at the target count, when every sender is gone, or at
//! the round deadline.

use crate::domain::ports::Prober;
use crate::probe::{ProbeFailure, ProbeResult, ProbeTarget};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the fan-out coordinator
#[derive(Debug, Clone, Default)]
pub struct FanOutConfig {
    /// Give up on outstanding targets after this long
    pub round_deadline: Option<Duration>,
}

// =============================================================================
// Coordinator
// =============================================================================

/// Fans one query out to many nodes and gathers every outcome
pub struct FanOutCoordinator {
    prober: Arc<dyn Prober>,
    config: FanOutConfig,
}

impl FanOutCoordinator {
    pub fn new(prober: Arc<dyn Prober>, config: FanOutConfig) -> Self {
        Self { prober, config }
    }

    /// Probe all targets; returns exactly `targets.len()` results
    pub async fn gather(&self, targets: &[ProbeTarget]) -> Vec<ProbeResult> {
        let deadline = self.config.round_deadline.map(|d| Instant::now() + d);
        self.gather_until(targets, deadline).await
    }

    /// Probe all targets, converting any still outstanding at `deadline` into
    /// [`ProbeFailure::DeadlineExceeded`].
    ///
    /// Results come back in completion order; targets that never delivered
    /// follow in target order.
    pub async fn gather_until(
        &self,
        targets: &[ProbeTarget],
        deadline: Option<Instant>,
    ) -> Vec<ProbeResult> {
        let expected = targets.len();
        if expected == 0 {
            return Vec::new();
        }

        let (tx, mut rx) = mpsc::channel::<(usize, ProbeResult)>(expected);
        let tasks: Vec<JoinHandle<()>> = targets
            .iter()
            .cloned()
            .enumerate()
            .map(|(idx, target)| {
                let tx = tx.clone();
                let prober = self.prober.clone();
                tokio::spawn(async move {
                    let result = prober.probe(&target).await;
                    // Capacity equals the target count, so this never waits.
                    let _ = tx.send((idx, result)).await;
                })
            })
            .collect();
        drop(tx);

        debug!(
            targets = expected,
            transport = self.prober.transport(),
            "fan-out started"
        );

        let mut slots: Vec<Option<ProbeResult>> = vec![None; expected];
        let mut delivered = vec![false; expected];
        let mut arrival: Vec<usize> = Vec::with_capacity(expected);
        let mut deadline_hit = false;

        while arrival.len() < expected {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, rx.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        deadline_hit = true;
                        break;
                    }
                },
                None => rx.recv().await,
            };

            match next {
                Some((idx, result)) => {
                    slots[idx] = Some(result);
                    delivered[idx] = true;
                    arrival.push(idx);
                }
                // Every sender dropped: the remaining tasks died without delivering.
                None => break,
            }
        }

        if deadline_hit {
            // Results that landed in the channel right at the deadline still count.
            while let Ok((idx, result)) = rx.try_recv() {
                slots[idx] = Some(result);
                delivered[idx] = true;
                arrival.push(idx);
            }
        }

        let mut results: Vec<ProbeResult> = arrival
            .iter()
            .filter_map(|&idx| slots[idx].take())
            .collect();

        for (idx, task) in tasks.into_iter().enumerate() {
            if delivered[idx] {
                continue;
            }
            let target = targets[idx].clone();
            let cause = if deadline_hit {
                task.abort();
                ProbeFailure::DeadlineExceeded
            } else {
                match task.await {
                    Err(e) => ProbeFailure::TaskAborted(e.to_string()),
                    Ok(()) => ProbeFailure::TaskAborted("task exited without a result".into()),
                }
            };
            warn!(target = %target, %cause, "no result from probe task");
            results.push(ProbeResult::failure(target, cause));
        }

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            targets = expected,
            succeeded,
            failed = expected - succeeded,
            deadline_hit,
            "fan-out complete"
        );

        results
    }
}
