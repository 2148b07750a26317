//! Action ledger
//!
//! Durable, idempotent log of staged and executed actions:
//! - Fingerprint uniqueness enforced by the backing store, except that a
//!   failed action may be staged again
//! - Forward-only status transitions, idempotent when repeated
//! - Savings events appended for completed actions
//!
//! Three backends share the [`ActionLedger`] contract: an in-memory map for
//! tests and dry runs, a single-file SQLite database for development and
//! PostgreSQL for clustered deployments.

pub mod fingerprint;
mod memory;
mod postgres;
pub(crate) mod schema;
mod sqlite;


pub use memory::MemoryLedger;
pub use postgres::PostgresLedger;
pub use sqlite::SqliteLedger;

use crate::error::{Error, Result};
use crate::learning::{
    LearningStore, MemoryLearningStore, PostgresLearningStore, SqliteLearningStore,
};
use crate::models::{Action, ActionStatus, NewAction, SavingsEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Message recorded on actions resolved by crash recovery
pub const RECOVERED_MESSAGE: &str = "Recovered";

/// Number of compare-and-set attempts before a transition gives up
const TRANSITION_ATTEMPTS: usize = 3;

/// Durable store for actions and savings events
#[async_trait]
pub trait ActionLedger: Send + Sync {
    /// Insert a new pending action
    ///
    /// Fails with `Duplicate` when the latest action with the same
    /// fingerprint is pending, in progress, completed or skipped. After a
    /// failure the fingerprint is recorded again as attempt `n`, with id
    /// `<base id>-<n>`.
    async fn record(&self, action: NewAction) -> Result<Action>;

    async fn get(&self, id: &str) -> Result<Action>;

    /// Most recent action for a fingerprint, any status
    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Action>>;

    /// Pending and in-progress actions, oldest first
    async fn list_pending(&self) -> Result<Vec<Action>>;

    /// Every action, oldest first
    async fn list_actions(&self) -> Result<Vec<Action>>;

    async fn mark_started(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn mark_completed(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    async fn mark_failed(&self, id: &str, at: DateTime<Utc>, message: &str) -> Result<()>;

    async fn mark_skipped(&self, id: &str, at: DateTime<Utc>, reason: Option<&str>)
        -> Result<()>;

    /// Append a savings event for a completed action; returns the event id
    async fn record_savings(&self, event: SavingsEvent) -> Result<i64>;

    async fn savings_for_action(&self, action_id: &str) -> Result<Vec<SavingsEvent>>;

    async fn stats(&self) -> Result<LedgerStats>;
}

/// Per-status counts plus savings totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerStats {
    pub pending: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub savings_events: u64,
    pub estimated_savings: f64,
    pub actual_savings: f64,
}

impl LedgerStats {
    pub fn count(&self, status: ActionStatus) -> u64 {
        match status {
            ActionStatus::Pending => self.pending,
            ActionStatus::InProgress => self.in_progress,
            ActionStatus::Completed => self.completed,
            ActionStatus::Failed => self.failed,
            ActionStatus::Skipped => self.skipped,
        }
    }

    pub fn total(&self) -> u64 {
        ActionStatus::ALL.iter().map(|s| self.count(*s)).sum()
    }

    pub(crate) fn add(&mut self, status: ActionStatus, count: u64) {
        match status {
            ActionStatus::Pending => self.pending += count,
            ActionStatus::InProgress => self.in_progress += count,
            ActionStatus::Completed => self.completed += count,
            ActionStatus::Failed => self.failed += count,
            ActionStatus::Skipped => self.skipped += count,
        }
    }
}

/// Decide whether moving `from -> to` must be written
///
/// `Ok(false)` means the action is already in the target state.
pub(crate) fn check_transition(id: &str, from: ActionStatus, to: ActionStatus) -> Result<bool> {
    if from == to {
        return Ok(false);
    }
    if from.can_transition_to(to) {
        Ok(true)
    } else {
        Err(Error::InvalidTransition {
            id: id.to_string(),
            from,
            to,
        })
    }
}

/// Fields written alongside a status change
#[derive(Debug, Clone, Copy)]
pub(crate) struct Transition<'a> {
    pub to: ActionStatus,
    pub at: DateTime<Utc>,
    pub message: Option<&'a str>,
}

impl<'a> Transition<'a> {
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            to: ActionStatus::InProgress,
            at,
            message: None,
        }
    }

    pub fn completed(at: DateTime<Utc>) -> Self {
        Self {
            to: ActionStatus::Completed,
            at,
            message: None,
        }
    }

    pub fn failed(at: DateTime<Utc>, message: &'a str) -> Self {
        Self {
            to: ActionStatus::Failed,
            at,
            message: Some(message),
        }
    }

    pub fn skipped(at: DateTime<Utc>, reason: Option<&'a str>) -> Self {
        Self {
            to: ActionStatus::Skipped,
            at,
            message: reason,
        }
    }

    /// `started_at` column value after the transition
    pub fn started_at(&self, current: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        match self.to {
            ActionStatus::InProgress => Some(self.at),
            _ => current,
        }
    }

    /// `completed_at` column value after the transition
    pub fn completed_at(&self, current: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        if self.to.is_terminal() {
            Some(self.at)
        } else {
            current
        }
    }
}

/// Retry a compare-and-set transition a few times against concurrent writers
///
/// `attempt` returns `Ok(true)` once the write landed or turned out to be a
/// no-op, `Ok(false)` when another writer moved the row first.
pub(crate) async fn with_transition_retries<F, Fut>(id: &str, mut attempt: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    for _ in 0..TRANSITION_ATTEMPTS {
        if attempt().await? {
            return Ok(());
        }
    }
    Err(Error::Transient(format!(
        "action {id} kept changing during status update"
    )))
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Memory,
    #[default]
    Sqlite,
    Postgres,
}

/// Open the configured ledger together with a learning store on the same database
pub async fn open(
    backend: LedgerBackend,
    url: &str,
) -> Result<(Arc<dyn ActionLedger>, Arc<dyn LearningStore>)> {
    Ok(match backend {
        LedgerBackend::Memory => (
            Arc::new(MemoryLedger::new()),
            Arc::new(MemoryLearningStore::new()),
        ),
        LedgerBackend::Sqlite => {
            let ledger = SqliteLedger::connect(url).await?;
            let learning = SqliteLearningStore::from_pool(ledger.pool().clone()).await?;
            (Arc::new(ledger), Arc::new(learning))
        }
        LedgerBackend::Postgres => {
            let ledger = PostgresLedger::connect(url).await?;
            let learning = PostgresLearningStore::from_pool(ledger.pool().clone()).await?;
            (Arc::new(ledger), Arc::new(learning))
        }
    })
}
