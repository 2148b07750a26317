//! In-memory ledger backend

use super::{check_transition, ActionLedger, LedgerStats, Transition};
use crate::error::{Error, Result};
use crate::models::{Action, ActionStatus, NewAction, SavingsEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct LedgerState {
    /// Insertion order doubles as created-at order
    actions: Vec<Action>,
    by_id: HashMap<String, usize>,
    /// Every attempt for a fingerprint, oldest first
    by_fingerprint: HashMap<String, Vec<usize>>,
    savings: Vec<SavingsEvent>,
}

/// Ledger held entirely in process memory
///
/// A single write lock serialises inserts, so concurrent `record` calls for
/// one fingerprint resolve to exactly one winner. A fingerprint whose latest
/// attempt failed may be recorded again.
#[derive(Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn apply(&self, id: &str, transition: Transition<'_>) -> Result<()> {
        let mut state = self.state.write().await;
        let index = *state
            .by_id
            .get(id)
            .ok_or_else(|| Error::NotFound(format!("action {id}")))?;
        let action = &mut state.actions[index];

        if !check_transition(id, action.status, transition.to)? {
            return Ok(());
        }

        action.status = transition.to;
        action.started_at = transition.started_at(action.started_at);
        action.completed_at = transition.completed_at(action.completed_at);
        if let Some(message) = transition.message {
            action.error_message = Some(message.to_string());
        }
        Ok(())
    }
}

#[async_trait]
impl ActionLedger for MemoryLedger {
    async fn record(&self, action: NewAction) -> Result<Action> {
        let mut action = Action::pending(action, Utc::now());
        let mut state = self.state.write().await;

        let attempts = match state.by_fingerprint.get(&action.fingerprint) {
            Some(indices) => {
                let retryable = indices
                    .last()
                    .is_some_and(|i| state.actions[*i].status == ActionStatus::Failed);
                if !retryable {
                    return Err(Error::Duplicate(action.fingerprint));
                }
                indices.len()
            }
            None => 0,
        };
        if attempts > 0 {
            action = action.with_attempt(attempts as u32 + 1);
        }
        if state.by_id.contains_key(&action.id) {
            return Err(Error::Duplicate(action.fingerprint));
        }

        let index = state.actions.len();
        state.by_id.insert(action.id.clone(), index);
        state
            .by_fingerprint
            .entry(action.fingerprint.clone())
            .or_default()
            .push(index);
        state.actions.push(action.clone());
        Ok(action)
    }

    async fn get(&self, id: &str) -> Result<Action> {
        let state = self.state.read().await;
        state
            .by_id
            .get(id)
            .map(|index| state.actions[*index].clone())
            .ok_or_else(|| Error::NotFound(format!("action {id}")))
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Action>> {
        let state = self.state.read().await;
        Ok(state
            .by_fingerprint
            .get(fingerprint)
            .and_then(|indices| indices.last())
            .map(|index| state.actions[*index].clone()))
    }

    async fn list_pending(&self) -> Result<Vec<Action>> {
        let state = self.state.read().await;
        Ok(state
            .actions
            .iter()
            .filter(|a| matches!(a.status, ActionStatus::Pending | ActionStatus::InProgress))
            .cloned()
            .collect())
    }

    async fn list_actions(&self) -> Result<Vec<Action>> {
        Ok(self.state.read().await.actions.clone())
    }

    async fn mark_started(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.apply(id, Transition::started(at)).await
    }

    async fn mark_completed(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.apply(id, Transition::completed(at)).await
    }

    async fn mark_failed(&self, id: &str, at: DateTime<Utc>, message: &str) -> Result<()> {
        self.apply(id, Transition::failed(at, message)).await
    }

    async fn mark_skipped(
        &self,
        id: &str,
        at: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<()> {
        self.apply(id, Transition::skipped(at, reason)).await
    }

    async fn record_savings(&self, event: SavingsEvent) -> Result<i64> {
        let mut state = self.state.write().await;
        let index = *state
            .by_id
            .get(&event.action_id)
            .ok_or_else(|| Error::NotFound(format!("action {}", event.action_id)))?;
        if state.actions[index].status != ActionStatus::Completed {
            return Err(Error::Invalid(format!(
                "savings recorded for action {} in state {}",
                event.action_id, state.actions[index].status
            )));
        }
        state.savings.push(event);
        Ok(state.savings.len() as i64)
    }

    async fn savings_for_action(&self, action_id: &str) -> Result<Vec<SavingsEvent>> {
        let state = self.state.read().await;
        Ok(state
            .savings
            .iter()
            .filter(|e| e.action_id == action_id)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> Result<LedgerStats> {
        let state = self.state.read().await;
        let mut stats = LedgerStats::default();
        for action in &state.actions {
            stats.add(action.status, 1);
        }
        stats.savings_events = state.savings.len() as u64;
        for event in &state.savings {
            stats.estimated_savings += event.estimated;
            stats.actual_savings += event.actual.unwrap_or(0.0);
        }
        Ok(stats)
    }
}
