//! Unguarded Balance
//!
//! A balance updated by a plain read, a pause, and a write with no lock
//! around the three steps. Concurrent updates overwrite each other, which is
//! exactly what the per-key locks in this crate prevent. Kept as a
//! counterexample for the race demo; atomics keep each individual load and
//! store well defined, the lost updates come from the gap between them.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub struct UnguardedBalance {
    value: AtomicI64,
    settle_delay: Duration,
}

impl UnguardedBalance {
    pub fn new(initial: i64, settle_delay: Duration) -> Self {
        Self {
            value: AtomicI64::new(initial),
            settle_delay,
        }
    }

    pub async fn deposit(&self, amount: i64) {
        self.read_modify_write(amount).await;
    }

    pub async fn withdraw(&self, amount: i64) {
        self.read_modify_write(-amount).await;
    }

    pub fn balance(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    async fn read_modify_write(&self, delta: i64) {
        let seen = self.value.load(Ordering::SeqCst);
        tokio::time::sleep(self.settle_delay).await;
        self.value.store(seen + delta, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequential_use_is_correct() {
        let balance = UnguardedBalance::new(100, Duration::from_millis(1));
        balance.deposit(10).await;
        balance.withdraw(30).await;
        assert_eq!(balance.balance(), 80);
    }
}
