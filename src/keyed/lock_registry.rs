//! Sharded Keyed Lock Registry
//!
//! Hands out one lock per key, created lazily on first request and kept for
//! the lifetime of the registry. Keys are hashed onto a fixed number of
//! shards so that the table lookup itself never serializes unrelated keys;
//! after creation a key's lock is reached through a shard read lock only.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

// =============================================================================
// Constants
// =============================================================================

/// Number of shards in the lock table
pub const LOCK_SHARD_COUNT: usize = 64;

// =============================================================================
// Key
// =============================================================================

/// Opaque identifier naming one independently lockable entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(pub String);

impl Key {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the shard index for this key
    #[inline]
    pub fn shard_index(&self) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.0.hash(&mut hasher);
        (hasher.finish() as usize) % LOCK_SHARD_COUNT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&String> for Key {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

// =============================================================================
// Key Lock
// =============================================================================

/// The lock bound to a single key, guarding a value of type `T`
#[derive(Debug)]
pub struct KeyLock<T> {
    key: Key,
    value: Mutex<T>,
    acquisitions: AtomicU64,
}

impl<T> KeyLock<T> {
    fn new(key: Key, value: T) -> Self {
        Self {
            key,
            value: Mutex::new(value),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Key this lock is bound to
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Wait for exclusive access; released when the guard drops
    pub async fn lock(&self) -> MutexGuard<'_, T> {
        let guard = self.value.lock().await;
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        guard
    }

    /// Take the lock only if nobody holds it
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        let guard = self.value.try_lock().ok()?;
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        Some(guard)
    }

    /// Number of times this lock has been taken
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }
}

/// Shared handle to a key's lock. Handles for the same key are `Arc::ptr_eq`.
pub type LockHandle<T = ()> = Arc<KeyLock<T>>;

// =============================================================================
// Lock Shard
// =============================================================================

/// A single shard of the lock table
struct LockShard<T> {
    locks: RwLock<HashMap<Key, LockHandle<T>>>,
}

impl<T> LockShard<T> {
    fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, key: &Key) -> Option<LockHandle<T>> {
        self.locks.read().get(key).cloned()
    }

    /// Insert a lock for `key` unless one already exists.
    /// Returns the bound handle and whether this call created it.
    fn get_or_insert_with(&self, key: &Key, init: impl FnOnce() -> T) -> (LockHandle<T>, bool) {
        if let Some(existing) = self.get(key) {
            return (existing, false);
        }

        let mut locks = self.locks.write();
        // Another caller may have won the race between the two locks above.
        if let Some(existing) = locks.get(key) {
            return (existing.clone(), false);
        }
        let handle = Arc::new(KeyLock::new(key.clone(), init()));
        locks.insert(key.clone(), handle.clone());
        (handle, true)
    }

    fn keys(&self) -> Vec<Key> {
        self.locks.read().keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.locks.read().len()
    }
}

// =============================================================================
// Registry Statistics
// =============================================================================

/// Counters across the whole registry
#[derive(Debug, Default)]
struct RegistryStats {
    created: AtomicU64,
    lookups: AtomicU64,
}

/// Snapshot of registry statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatsSnapshot {
    /// Locks created since the registry started
    pub created: u64,
    /// Acquire/get calls served
    pub lookups: u64,
}

// =============================================================================
// Keyed Lock Registry
// =============================================================================

/// Per-key lock table with lazy, race-free lock creation
pub struct KeyedLockRegistry<T = ()> {
    shards: Box<[LockShard<T>]>,
    stats: RegistryStats,
}

impl<T> std::fmt::Debug for KeyedLockRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedLockRegistry")
            .field("keys", &self.len())
            .finish()
    }
}

impl<T> KeyedLockRegistry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        let shards: Vec<LockShard<T>> = (0..LOCK_SHARD_COUNT).map(|_| LockShard::new()).collect();
        Self {
            shards: shards.into_boxed_slice(),
            stats: RegistryStats::default(),
        }
    }

    fn shard(&self, key: &Key) -> &LockShard<T> {
        &self.shards[key.shard_index()]
    }

    /// Look up a key's lock without creating it
    pub fn get(&self, key: impl Into<Key>) -> Option<LockHandle<T>> {
        let key = key.into();
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);
        self.shard(&key).get(&key)
    }

    /// Get the key's lock, creating it with `init` if this is the first request.
    /// Returns whether this call created the lock.
    pub fn insert_if_absent(
        &self,
        key: impl Into<Key>,
        init: impl FnOnce() -> T,
    ) -> (LockHandle<T>, bool) {
        let key = key.into();
        self.stats.lookups.fetch_add(1, Ordering::Relaxed);
        let (handle, created) = self.shard(&key).get_or_insert_with(&key, init);
        if created {
            self.stats.created.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(key = %key, "created key lock");
        }
        (handle, created)
    }

    /// Check if a key has a lock
    pub fn contains(&self, key: impl Into<Key>) -> bool {
        let key = key.into();
        self.shard(&key).get(&key).is_some()
    }

    /// All keys that currently have a lock
    pub fn keys(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        for shard in self.shards.iter() {
            keys.extend(shard.keys());
        }
        keys
    }

    /// Number of keys with a lock
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get registry statistics
    pub fn stats(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            created: self.stats.created.load(Ordering::Relaxed),
            lookups: self.stats.lookups.load(Ordering::Relaxed),
        }
    }
}

impl<T: Default> KeyedLockRegistry<T> {
    /// Get the key's lock, creating it on first request. Never fails.
    pub fn acquire(&self, key: impl Into<Key>) -> LockHandle<T> {
        self.insert_if_absent(key, T::default).0
    }
}

impl<T> Default for KeyedLockRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_key_sharding() {
        let k1 = Key::new("Project-1");
        let k2 = Key::new("Project-2");
        let k3 = Key::new("Project-1");

        assert_eq!(k1.shard_index(), k3.shard_index());
        assert!(k1.shard_index() < LOCK_SHARD_COUNT);
        assert!(k2.shard_index() < LOCK_SHARD_COUNT);
    }

    #[test]
    fn test_same_key_same_lock() {
        let registry: KeyedLockRegistry = KeyedLockRegistry::new();

        let a = registry.acquire("acct-1");
        let b = registry.acquire("acct-1");
        let c = registry.acquire("acct-2");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.stats().created, 2);
    }

    #[test]
    fn test_get_does_not_create() {
        let registry: KeyedLockRegistry<u64> = KeyedLockRegistry::new();
        assert!(registry.get("missing").is_none());
        assert!(registry.is_empty());

        let (_, created) = registry.insert_if_absent("present", || 7);
        assert!(created);
        let (handle, created) = registry.insert_if_absent("present", || 99);
        assert!(!created);

        let value = tokio_test::block_on(async { *handle.lock().await });
        assert_eq!(value, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_first_creation_single_winner() {
        let registry: Arc<KeyedLockRegistry> = Arc::new(KeyedLockRegistry::new());
        let barrier = Arc::new(tokio::sync::Barrier::new(32));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    registry.acquire("brand-new")
                })
            })
            .collect();

        let locks: Vec<LockHandle> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        for lock in &locks[1..] {
            assert!(Arc::ptr_eq(&locks[0], lock));
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.stats().created, 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let registry: KeyedLockRegistry = KeyedLockRegistry::new();
        let a = registry.acquire("a");
        let b = registry.acquire("b");

        let _held = a.lock().await;
        assert!(a.try_lock().is_none());

        let guard = tokio::time::timeout(Duration::from_millis(100), b.lock()).await;
        assert!(guard.is_ok());
    }

    #[tokio::test]
    async fn test_guard_drop_releases() {
        let registry: KeyedLockRegistry = KeyedLockRegistry::new();
        let lock = registry.acquire("k");
        {
            let _guard = lock.lock().await;
        }
        assert!(lock.try_lock().is_some());
        assert_eq!(lock.acquisitions(), 2);
        assert_eq!(lock.key().as_str(), "k");
    }
}
