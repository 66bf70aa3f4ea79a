//! Keyed State
//!
//! Values guarded by their key's lock. Every read and write of a key's value
//! goes through [`KeyedState`], which takes that key's lock for the duration
//! of the read-compute-write cycle. Preconditions run inside the cycle, so a
//! check and the write that depends on it are atomic.

use super::lock_registry::{Key, KeyLock, KeyedLockRegistry, RegistryStatsSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;

// =============================================================================
// Mutation Outcome
// =============================================================================

/// Why a mutation function refused to produce a new value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum DeclineReason {
    #[error("insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds { available: u64, requested: u64 },

    #[error("arithmetic overflow")]
    Overflow,
}

/// Outcome of one mutation on one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation<V> {
    /// The new value was written
    Applied { previous: V, current: V },
    /// The function declined; the value is unchanged
    Declined { current: V, reason: DeclineReason },
}

impl<V> Mutation<V> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Mutation::Applied { .. })
    }

    /// Value after the mutation (unchanged if declined)
    pub fn current(&self) -> &V {
        match self {
            Mutation::Applied { current, .. } | Mutation::Declined { current, .. } => current,
        }
    }
}

// =============================================================================
// Keyed State
// =============================================================================

/// A map of values where each value is only reachable through its key's lock
pub struct KeyedState<V> {
    locks: KeyedLockRegistry<V>,
}

impl<V> std::fmt::Debug for KeyedState<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedState")
            .field("keys", &self.locks.len())
            .finish()
    }
}

impl<V: Clone + Send> KeyedState<V> {
    pub fn new() -> Self {
        Self {
            locks: KeyedLockRegistry::new(),
        }
    }

    /// Create the key with `initial` unless it already exists.
    /// Returns true if this call created it.
    pub fn insert(&self, key: impl Into<Key>, initial: V) -> bool {
        self.locks.insert_if_absent(key, || initial).1
    }

    pub fn contains(&self, key: impl Into<Key>) -> bool {
        self.locks.contains(key)
    }

    /// Read the current value under the key's lock
    pub async fn get(&self, key: impl Into<Key>) -> Option<V> {
        let handle = self.locks.get(key)?;
        let guard = handle.lock().await;
        Some((*guard).clone())
    }

    /// Mutate an existing key. Returns `None` if the key was never created.
    pub async fn try_mutate<F>(&self, key: impl Into<Key>, f: F) -> Option<Mutation<V>>
    where
        F: FnOnce(&V) -> Result<V, DeclineReason>,
    {
        let handle = self.locks.get(key)?;
        Some(apply(&handle, f).await)
    }

    /// Mutate an existing key with an update that may await while the lock is held
    pub async fn try_mutate_async<F, Fut>(&self, key: impl Into<Key>, f: F) -> Option<Mutation<V>>
    where
        F: FnOnce(V) -> Fut,
        Fut: Future<Output = Result<V, DeclineReason>>,
    {
        let handle = self.locks.get(key)?;
        Some(apply_async(&handle, f).await)
    }

    /// Values of every key, each read under its own lock.
    /// Keys are read one after another, so the map is not a cross-key snapshot.
    pub async fn snapshot(&self) -> BTreeMap<Key, V> {
        let mut out = BTreeMap::new();
        for key in self.locks.keys() {
            if let Some(handle) = self.locks.get(key.clone()) {
                let value = (*handle.lock().await).clone();
                out.insert(key, value);
            }
        }
        out
    }

    pub fn keys(&self) -> Vec<Key> {
        self.locks.keys()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn stats(&self) -> RegistryStatsSnapshot {
        self.locks.stats()
    }

    /// Direct access to the lock table, e.g. to hold a key across several steps
    pub fn locks(&self) -> &KeyedLockRegistry<V> {
        &self.locks
    }
}

impl<V: Clone + Send + Default> KeyedState<V> {
    /// Mutate a key, creating it with `V::default()` on first use
    pub async fn mutate<F>(&self, key: impl Into<Key>, f: F) -> Mutation<V>
    where
        F: FnOnce(&V) -> Result<V, DeclineReason>,
    {
        let handle = self.locks.acquire(key);
        apply(&handle, f).await
    }

    /// Like [`KeyedState::mutate`] but the update may await while holding the lock
    pub async fn mutate_async<F, Fut>(&self, key: impl Into<Key>, f: F) -> Mutation<V>
    where
        F: FnOnce(V) -> Fut,
        Fut: Future<Output = Result<V, DeclineReason>>,
    {
        let handle = self.locks.acquire(key);
        apply_async(&handle, f).await
    }
}

impl<V: Clone + Send> Default for KeyedState<V> {
    fn default() -> Self {
        Self::new()
    }
}

async fn apply<V, F>(handle: &KeyLock<V>, f: F) -> Mutation<V>
where
    V: Clone,
    F: FnOnce(&V) -> Result<V, DeclineReason>,
{
    let mut guard = handle.lock().await;
    match f(&*guard) {
        Ok(next) => {
            let previous = std::mem::replace(&mut *guard, next);
            Mutation::Applied {
                previous,
                current: (*guard).clone(),
            }
        }
        Err(reason) => Mutation::Declined {
            current: (*guard).clone(),
            reason,
        },
    }
}

async fn apply_async<V, F, Fut>(handle: &KeyLock<V>, f: F) -> Mutation<V>
where
    V: Clone,
    F: FnOnce(V) -> Fut,
    Fut: Future<Output = Result<V, DeclineReason>>,
{
    let mut guard = handle.lock().await;
    match f((*guard).clone()).await {
        Ok(next) => {
            let previous = std::mem::replace(&mut *guard, next);
            Mutation::Applied {
                previous,
                current: (*guard).clone(),
            }
        }
        Err(reason) => Mutation::Declined {
            current: (*guard).clone(),
            reason,
        },
    }
}
