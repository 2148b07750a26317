//! Learning store
//!
//! Append-only record of decision outcomes. Scoring reads aggregates over
//! resources that share a similarity prefix; the aggregates are copies and
//! may lag the most recent outcome.

mod memory;
mod postgres;
mod sqlite;

pub use memory::MemoryLearningStore;
pub use postgres::PostgresLearningStore;
pub use sqlite::SqliteLearningStore;

use crate::error::{Error, Result};
use crate::models::DecisionOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Success and failure counts for a family of resources
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OutcomeAggregate {
    pub success_count: u64,
    pub failure_count: u64,
    pub last_outcome_at: Option<DateTime<Utc>>,
}

impl OutcomeAggregate {
    pub fn total(&self) -> u64 {
        self.success_count + self.failure_count
    }

    pub fn success_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.success_count as f64 / total as f64),
        }
    }

    pub(crate) fn observe(&mut self, outcome: &DecisionOutcome) {
        if outcome.success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.last_outcome_at = match self.last_outcome_at {
            Some(last) if last >= outcome.created_at => Some(last),
            _ => Some(outcome.created_at),
        };
    }
}

/// Resource id up to and including its first `-`; the whole id when it has none
///
/// `web-prod-01` and `web-prod-02` share the prefix `web-`.
pub fn similarity_prefix(resource_id: &str) -> &str {
    match resource_id.find('-') {
        Some(index) => &resource_id[..=index],
        None => resource_id,
    }
}

/// Outcome log with aggregate queries
#[async_trait]
pub trait LearningStore: Send + Sync {
    /// Append an outcome; returns `false` when the action already has one
    async fn record_outcome(&self, outcome: DecisionOutcome) -> Result<bool>;

    async fn aggregate_for_resource_prefix(&self, prefix: &str) -> Result<OutcomeAggregate>;

    /// All outcomes in insertion order
    async fn outcomes(&self) -> Result<Vec<DecisionOutcome>>;

    /// Newline-delimited JSON of every outcome
    async fn export(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for outcome in self.outcomes().await? {
            serde_json::to_writer(&mut out, &outcome)?;
            out.push(b'\n');
        }
        Ok(out)
    }

    /// Append every outcome in `bytes` whose action has none yet
    ///
    /// The whole input is parsed before anything is written, so a malformed
    /// line leaves the store untouched.
    async fn import(&self, bytes: &[u8]) -> Result<usize> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::Invalid(format!("learning import is not UTF-8: {e}")))?;
        let parsed = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<DecisionOutcome>)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut imported = 0;
        for outcome in parsed {
            if self.record_outcome(outcome).await? {
                imported += 1;
            }
        }
        Ok(imported)
    }
}
