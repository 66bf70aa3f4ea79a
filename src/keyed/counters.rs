//! Project Counters
//!
//! Operation counters keyed by project name, created on first use.

use super::lock_registry::Key;
use super::state::{DeclineReason, KeyedState, Mutation};
use std::collections::BTreeMap;

/// Lazily keyed counters, one lock per project
#[derive(Debug, Default)]
pub struct ProjectCounters {
    counts: KeyedState<u64>,
}

impl ProjectCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a project's counter and return the new count
    pub async fn increment(&self, project: &str) -> u64 {
        let mutation = self
            .counts
            .mutate(project, |count| count.checked_add(1).ok_or(DeclineReason::Overflow))
            .await;
        if let Mutation::Declined { reason, .. } = &mutation {
            tracing::warn!(project, %reason, "counter not incremented");
        }
        *mutation.current()
    }

    /// Current count, or 0 for a project never seen
    pub async fn get(&self, project: &str) -> u64 {
        self.counts.get(project).await.unwrap_or(0)
    }

    /// Per-project counts
    pub async fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .snapshot()
            .await
            .into_iter()
            .map(|(Key(name), count)| (name, count))
            .collect()
    }

    /// Sum across all projects
    pub async fn total(&self) -> u64 {
        self.snapshot().await.values().sum()
    }

    pub fn project_count(&self) -> usize {
        self.counts.len()
    }
}
