//! In-memory learning store

use super::{LearningStore, OutcomeAggregate};
use crate::error::Result;
use crate::models::DecisionOutcome;
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;

#[derive(Default)]
struct OutcomeLog {
    outcomes: Vec<DecisionOutcome>,
    action_ids: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryLearningStore {
    log: RwLock<OutcomeLog>,
}

impl MemoryLearningStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LearningStore for MemoryLearningStore {
    async fn record_outcome(&self, outcome: DecisionOutcome) -> Result<bool> {
        let mut log = self.log.write().await;
        if !log.action_ids.insert(outcome.action_id.clone()) {
            return Ok(false);
        }
        log.outcomes.push(outcome);
        Ok(true)
    }

    async fn aggregate_for_resource_prefix(&self, prefix: &str) -> Result<OutcomeAggregate> {
        let log = self.log.read().await;
        let mut aggregate = OutcomeAggregate::default();
        for outcome in log
            .outcomes
            .iter()
            .filter(|o| o.resource_id.starts_with(prefix))
        {
            aggregate.observe(outcome);
        }
        Ok(aggregate)
    }

    async fn outcomes(&self) -> Result<Vec<DecisionOutcome>> {
        Ok(self.log.read().await.outcomes.clone())
    }
}
