//! Demo workloads
//!
//! Small concurrent workloads behind the `race-demo`, `account-demo` and
//! `project-demo` subcommands. Each returns a report that states whether the
//! end state matches what sequential execution would have produced.

use crate::error::{Error, Result};
use crate::keyed::{AccountLedger, ProjectCounters, UnguardedBalance};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

const RACE_ACCOUNT: &str = "race";

// =============================================================================
// Balance Race
// =============================================================================

/// Parameters for [`balance_race`]
#[derive(Debug, Clone)]
pub struct RaceSettings {
    pub initial: u64,
    pub amount: u64,
    pub deposits: usize,
    pub withdrawals: usize,
    /// Pause between reading and writing the balance
    pub settle_delay: Duration,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            initial: 100,
            amount: 10,
            deposits: 5,
            withdrawals: 5,
            settle_delay: Duration::from_millis(5),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceReport {
    pub guarded: bool,
    pub initial: u64,
    pub expected: i64,
    pub final_balance: i64,
    pub declined: usize,
    pub consistent: bool,
    pub duration_ms: u64,
}

/// Run concurrent deposits and withdrawals against one balance, with or
/// without the per-key lock.
pub async fn balance_race(guarded: bool, settings: &RaceSettings) -> Result<RaceReport> {
    let started = Instant::now();
    let amount = settings.amount;

    let (expected, final_balance, declined) = if guarded {
        let ledger = AccountLedger::new().with_settle_delay(settings.settle_delay);
        ledger.open_account(RACE_ACCOUNT, settings.initial)?;

        let deposits =
            join_all((0..settings.deposits).map(|_| ledger.deposit(RACE_ACCOUNT, amount)));
        let withdrawals =
            join_all((0..settings.withdrawals).map(|_| ledger.withdraw(RACE_ACCOUNT, amount)));
        let (deposits, withdrawals) = futures::join!(deposits, withdrawals);

        let mut applied = 0i64;
        let mut declined = 0;
        for outcome in deposits {
            match outcome? {
                o if o.is_applied() => applied += 1,
                _ => declined += 1,
            }
        }
        for outcome in withdrawals {
            match outcome? {
                o if o.is_applied() => applied -= 1,
                _ => declined += 1,
            }
        }

        let expected = settings.initial as i64 + applied * amount as i64;
        let final_balance = ledger.balance(RACE_ACCOUNT).await? as i64;
        (expected, final_balance, declined)
    } else {
        let initial = i64::try_from(settings.initial)
            .map_err(|_| Error::InvalidAmount { amount: settings.initial })?;
        let delta = i64::try_from(amount).map_err(|_| Error::InvalidAmount { amount })?;
        let balance = UnguardedBalance::new(initial, settings.settle_delay);

        let deposits = join_all((0..settings.deposits).map(|_| balance.deposit(delta)));
        let withdrawals = join_all((0..settings.withdrawals).map(|_| balance.withdraw(delta)));
        futures::join!(deposits, withdrawals);

        let expected = initial + (settings.deposits as i64 - settings.withdrawals as i64) * delta;
        (expected, balance.balance(), 0)
    };

    let report = RaceReport {
        guarded,
        initial: settings.initial,
        expected,
        final_balance,
        declined,
        consistent: expected == final_balance,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        guarded,
        expected,
        final_balance,
        consistent = report.consistent,
        "balance race finished"
    );
    Ok(report)
}

// =============================================================================
// Account Workload
// =============================================================================

/// Parameters for [`account_workload`]
#[derive(Debug, Clone)]
pub struct AccountWorkload {
    pub accounts: usize,
    pub initial: u64,
    pub deposits_per_account: usize,
    pub amount: u64,
}

impl Default for AccountWorkload {
    fn default() -> Self {
        Self {
            accounts: 10,
            initial: 1000,
            deposits_per_account: 5,
            amount: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountReport {
    pub balances: BTreeMap<String, u64>,
    pub expected_each: u64,
    pub consistent: bool,
    pub duration_ms: u64,
}

/// Deposit into many accounts at once; every account is its own key
pub async fn account_workload(
    ledger: Arc<AccountLedger>,
    workload: &AccountWorkload,
) -> Result<AccountReport> {
    let started = Instant::now();
    let ids: Vec<String> = (1..=workload.accounts).map(|i| format!("User{}", i)).collect();
    for id in &ids {
        ledger.open_account(id, workload.initial)?;
    }

    let mut handles = Vec::with_capacity(ids.len() * workload.deposits_per_account);
    for id in &ids {
        for _ in 0..workload.deposits_per_account {
            let ledger = ledger.clone();
            let id = id.clone();
            let amount = workload.amount;
            handles.push(tokio::spawn(async move { ledger.deposit(&id, amount).await }));
        }
    }
    for joined in join_all(handles).await {
        joined.map_err(|e| Error::Internal(format!("deposit task failed: {}", e)))??;
    }

    let balances: BTreeMap<String, u64> = ledger
        .balances()
        .await
        .into_iter()
        .filter(|(id, _)| ids.contains(id))
        .collect();
    let expected_each = workload.initial + workload.amount * workload.deposits_per_account as u64;
    let consistent = balances.values().all(|b| *b == expected_each);

    info!(accounts = ids.len(), consistent, "account workload finished");
    Ok(AccountReport {
        balances,
        expected_each,
        consistent,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}

// =============================================================================
// Project Workload
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectReport {
    pub counts: BTreeMap<String, u64>,
    pub total: u64,
    pub expected_total: u64,
    pub consistent: bool,
    pub duration_ms: u64,
}

/// Spread `tasks` increments round-robin over `projects` project names
pub async fn project_workload(
    counters: Arc<ProjectCounters>,
    projects: usize,
    tasks: usize,
) -> Result<ProjectReport> {
    if projects == 0 {
        return Err(Error::Configuration("at least one project is required".into()));
    }
    let started = Instant::now();

    let handles: Vec<_> = (0..tasks)
        .map(|i| {
            let counters = counters.clone();
            let project = format!("project{}", i % projects);
            tokio::spawn(async move { counters.increment(&project).await })
        })
        .collect();
    for joined in join_all(handles).await {
        joined.map_err(|e| Error::Internal(format!("increment task failed: {}", e)))?;
    }

    let counts = counters.snapshot().await;
    let total = counters.total().await;
    let expected_total = tasks as u64;

    info!(projects, tasks, total, "project workload finished");
    Ok(ProjectReport {
        consistent: total == expected_total,
        counts,
        total,
        expected_total,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}
