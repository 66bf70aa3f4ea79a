//! Account Ledger
//!
//! Balances keyed by account id. A deposit or withdrawal on one account only
//! takes that account's lock; accounts never wait on each other.

use super::lock_registry::Key;
use super::state::{DeclineReason, KeyedState, Mutation};
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Result of a deposit or withdrawal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum TransferOutcome {
    /// The balance changed
    Applied { previous: u64, balance: u64 },
    /// A business rule refused the change; the balance is untouched
    Declined { balance: u64, reason: DeclineReason },
}

impl TransferOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransferOutcome::Applied { .. })
    }

    pub fn balance(&self) -> u64 {
        match self {
            TransferOutcome::Applied { balance, .. }
            | TransferOutcome::Declined { balance, .. } => *balance,
        }
    }
}

impl From<Mutation<u64>> for TransferOutcome {
    fn from(m: Mutation<u64>) -> Self {
        match m {
            Mutation::Applied { previous, current } => TransferOutcome::Applied {
                previous,
                balance: current,
            },
            Mutation::Declined { current, reason } => TransferOutcome::Declined {
                balance: current,
                reason,
            },
        }
    }
}

/// Per-account balances with per-account locking
pub struct AccountLedger {
    balances: KeyedState<u64>,
    /// Time spent "processing" between reading and writing a balance
    settle_delay: Option<Duration>,
    metrics: Option<Arc<Metrics>>,
}

impl AccountLedger {
    pub fn new() -> Self {
        Self {
            balances: KeyedState::new(),
            settle_delay: None,
            metrics: None,
        }
    }

    /// Hold each account's lock for `delay` between read and write
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = Some(delay);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Open an account with a starting balance
    pub fn open_account(&self, account_id: &str, initial_balance: u64) -> Result<()> {
        if !self.balances.insert(account_id, initial_balance) {
            return Err(Error::AccountAlreadyExists {
                account_id: account_id.to_string(),
            });
        }
        info!(account = account_id, balance = initial_balance, "opened account");
        Ok(())
    }

    /// Add `amount` to an account
    pub async fn deposit(&self, account_id: &str, amount: u64) -> Result<TransferOutcome> {
        if amount == 0 {
            return Err(Error::InvalidAmount { amount });
        }
        let outcome = self
            .apply(account_id, move |balance| {
                balance.checked_add(amount).ok_or(DeclineReason::Overflow)
            })
            .await?;
        debug!(account = account_id, amount, ?outcome, "deposit");
        self.record("deposit", &outcome);
        Ok(outcome)
    }

    /// Take `amount` from an account. The funds check runs under the account's lock.
    pub async fn withdraw(&self, account_id: &str, amount: u64) -> Result<TransferOutcome> {
        if amount == 0 {
            return Err(Error::InvalidAmount { amount });
        }
        let outcome = self
            .apply(account_id, move |balance| {
                if balance >= amount {
                    Ok(balance - amount)
                } else {
                    Err(DeclineReason::InsufficientFunds {
                        available: balance,
                        requested: amount,
                    })
                }
            })
            .await?;
        debug!(account = account_id, amount, ?outcome, "withdraw");
        self.record("withdraw", &outcome);
        Ok(outcome)
    }

    /// Current balance of an account
    pub async fn balance(&self, account_id: &str) -> Result<u64> {
        self.balances
            .get(account_id)
            .await
            .ok_or_else(|| Error::AccountNotFound {
                account_id: account_id.to_string(),
            })
    }

    /// All balances, each read under its account's lock
    pub async fn balances(&self) -> BTreeMap<String, u64> {
        self.balances
            .snapshot()
            .await
            .into_iter()
            .map(|(Key(id), balance)| (id, balance))
            .collect()
    }

    pub fn account_count(&self) -> usize {
        self.balances.len()
    }

    async fn apply<F>(&self, account_id: &str, f: F) -> Result<TransferOutcome>
    where
        F: FnOnce(u64) -> std::result::Result<u64, DeclineReason> + Send,
    {
        let mutation = match self.settle_delay {
            Some(delay) => {
                self.balances
                    .try_mutate_async(account_id, |balance| async move {
                        tokio::time::sleep(delay).await;
                        f(balance)
                    })
                    .await
            }
            None => self.balances.try_mutate(account_id, |balance| f(*balance)).await,
        };

        mutation
            .map(TransferOutcome::from)
            .ok_or_else(|| Error::AccountNotFound {
                account_id: account_id.to_string(),
            })
    }

    fn record(&self, operation: &str, outcome: &TransferOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_mutation(operation, outcome.is_applied());
        }
    }
}

impl Default for AccountLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rand::seq::SliceRandom;

    #[tokio::test]
    async fn test_open_and_deposit() {
        let ledger = AccountLedger::new();
        ledger.open_account("User1", 1000).unwrap();

        let outcome = ledger.deposit("User1", 100).await.unwrap();
        assert_eq!(
            outcome,
            TransferOutcome::Applied {
                previous: 1000,
                balance: 1100
            }
        );
        assert_eq!(ledger.balance("User1").await.unwrap(), 1100);
    }

    #[tokio::test]
    async fn test_duplicate_open_rejected() {
        let ledger = AccountLedger::new();
        ledger.open_account("User1", 10).unwrap();
        let err = ledger.open_account("User1", 99).unwrap_err();
        assert_matches!(err, Error::AccountAlreadyExists { .. });
        assert_eq!(ledger.balance("User1").await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let ledger = AccountLedger::new();
        assert_matches!(
            ledger.deposit("nobody", 5).await,
            Err(Error::AccountNotFound { .. })
        );
        assert_matches!(
            ledger.withdraw("nobody", 5).await,
            Err(Error::AccountNotFound { .. })
        );
        assert_eq!(ledger.account_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let ledger = AccountLedger::new();
        ledger.open_account("User1", 10).unwrap();
        assert_matches!(
            ledger.deposit("User1", 0).await,
            Err(Error::InvalidAmount { amount: 0 })
        );
    }

    #[tokio::test]
    async fn test_insufficient_funds_declined() {
        let ledger = AccountLedger::new();
        ledger.open_account("User1", 30).unwrap();

        let outcome = ledger.withdraw("User1", 50).await.unwrap();
        assert_matches!(
            outcome,
            TransferOutcome::Declined {
                balance: 30,
                reason: DeclineReason::InsufficientFunds {
                    available: 30,
                    requested: 50
                }
            }
        );

        // lock was released: the next operation goes through
        assert!(ledger.withdraw("User1", 30).await.unwrap().is_applied());
        assert_eq!(ledger.balance("User1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deposit_overflow_declined() {
        let ledger = AccountLedger::new();
        ledger.open_account("whale", u64::MAX - 1).unwrap();
        let outcome = ledger.deposit("whale", 5).await.unwrap();
        assert_matches!(
            outcome,
            TransferOutcome::Declined {
                reason: DeclineReason::Overflow,
                ..
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_transfers_balance_invariant() {
        for round in 0..10u64 {
            let ledger = Arc::new(AccountLedger::new());
            ledger.open_account("acct", 50).unwrap();

            let mut ops: Vec<(bool, u64)> = (0..40)
                .map(|i| (i % 2 == 0, 5 + (i % 7) + round))
                .collect();
            ops.shuffle(&mut rand::thread_rng());

            let tasks: Vec<_> = ops
                .into_iter()
                .map(|(is_deposit, amount)| {
                    let ledger = ledger.clone();
                    tokio::spawn(async move {
                        let outcome = if is_deposit {
                            ledger.deposit("acct", amount).await
                        } else {
                            ledger.withdraw("acct", amount).await
                        };
                        (is_deposit, amount, outcome.unwrap())
                    })
                })
                .collect();

            let mut expected: i128 = 50;
            for task in futures::future::join_all(tasks).await {
                let (is_deposit, amount, outcome) = task.unwrap();
                if outcome.is_applied() {
                    if is_deposit {
                        expected += amount as i128;
                    } else {
                        expected -= amount as i128;
                    }
                } else {
                    assert!(!is_deposit);
                }
            }

            assert_eq!(ledger.balance("acct").await.unwrap() as i128, expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_ten_accounts_independent() {
        let ledger = Arc::new(AccountLedger::new());
        for i in 1..=10 {
            ledger.open_account(&format!("User{}", i), 1000).unwrap();
        }

        let mut tasks = Vec::new();
        for i in 1..=10 {
            let id = format!("User{}", i);
            let l = ledger.clone();
            let d = id.clone();
            tasks.push(tokio::spawn(async move { l.deposit(&d, 100).await }));
            let l = ledger.clone();
            tasks.push(tokio::spawn(async move { l.withdraw(&id, 50).await }));
        }
        for task in futures::future::join_all(tasks).await {
            assert!(task.unwrap().unwrap().is_applied());
        }

        let balances = ledger.balances().await;
        assert_eq!(balances.len(), 10);
        assert!(balances.values().all(|&b| b == 1050));
    }
}
