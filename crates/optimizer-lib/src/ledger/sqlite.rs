//! Single-file SQLite ledger backend

use super::{
    check_transition, schema, with_transition_retries, ActionLedger, LedgerStats, Transition,
};
use crate::error::{Error, Result};
use crate::models::{Action, ActionPayload, NewAction, SavingsEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::types::Json;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_ACTION: &str = r#"
    SELECT id, checksum, resource_id, action_kind, payload, risk_score, estimated_savings,
           status, created_at, started_at, completed_at, error_message
    FROM actions
"#;

/// Ledger stored in a SQLite database file
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (creating if missing) the database at `url`, e.g. `sqlite://optimizer.db`
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        info!(url = %url, "Opened SQLite ledger");
        Self::from_pool(pool).await
    }

    /// Private in-memory database; a single connection keeps every query on it
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        for statement in schema::SQLITE {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Underlying pool, shared with the learning store
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Rows already staged for a fingerprint; concurrent inserts are still
    /// settled by the partial unique index
    async fn attempts(&self, fingerprint: &str) -> Result<Attempts> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN status <> 'failed' THEN 1 ELSE 0 END), 0) AS live
            FROM actions
            WHERE checksum = ?
            "#,
        )
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await?;
        Ok(Attempts {
            total: row.try_get("total")?,
            live: row.try_get("live")?,
        })
    }

    async fn try_transition(&self, id: &str, transition: Transition<'_>) -> Result<bool> {
        let current = self.get(id).await?;
        if !check_transition(id, current.status, transition.to)? {
            return Ok(true);
        }

        let message = transition
            .message
            .map(str::to_string)
            .or(current.error_message);
        let result = sqlx::query(
            r#"
            UPDATE actions
            SET status = ?, started_at = ?, completed_at = ?, error_message = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(transition.to.as_str())
        .bind(transition.started_at(current.started_at))
        .bind(transition.completed_at(current.completed_at))
        .bind(message)
        .bind(id)
        .bind(current.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn transition(&self, id: &str, transition: Transition<'_>) -> Result<()> {
        with_transition_retries(id, move || self.try_transition(id, transition)).await
    }
}

struct Attempts {
    total: i64,
    live: i64,
}

fn action_from_row(row: &SqliteRow) -> Result<Action> {
    let kind: String = row.try_get("action_kind")?;
    let status: String = row.try_get("status")?;
    let payload: Json<ActionPayload> = row.try_get("payload")?;
    Ok(Action {
        id: row.try_get("id")?,
        fingerprint: row.try_get("checksum")?,
        resource_id: row.try_get("resource_id")?,
        kind: kind.parse()?,
        payload: payload.0,
        risk_score: row.try_get("risk_score")?,
        estimated_savings: row.try_get("estimated_savings")?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        error_message: row.try_get("error_message")?,
    })
}

fn savings_from_row(row: &SqliteRow) -> Result<SavingsEvent> {
    let kind: String = row.try_get("kind")?;
    Ok(SavingsEvent {
        action_id: row.try_get("action_id")?,
        resource_id: row.try_get("resource_id")?,
        kind: kind.parse()?,
        estimated: row.try_get("estimated")?,
        actual: row.try_get("actual")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl ActionLedger for SqliteLedger {
    async fn record(&self, action: NewAction) -> Result<Action> {
        let mut action = Action::pending(action, Utc::now());
        let attempts = self.attempts(&action.fingerprint).await?;
        if attempts.live > 0 {
            return Err(Error::Duplicate(action.fingerprint));
        }
        if attempts.total > 0 {
            action = action.with_attempt(attempts.total as u32 + 1);
        }
        sqlx::query(
            r#"
            INSERT INTO actions (
                id, resource_id, action_kind, status, checksum, payload,
                risk_score, estimated_savings, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&action.id)
        .bind(&action.resource_id)
        .bind(action.kind.as_str())
        .bind(action.status.as_str())
        .bind(&action.fingerprint)
        .bind(Json(&action.payload))
        .bind(action.risk_score)
        .bind(action.estimated_savings)
        .bind(action.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match Error::from(e) {
            Error::Duplicate(_) => Error::Duplicate(action.fingerprint.clone()),
            other => other,
        })?;
        Ok(action)
    }

    async fn get(&self, id: &str) -> Result<Action> {
        let row = sqlx::query(&format!("{SELECT_ACTION} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("action {id}")))?;
        action_from_row(&row)
    }

    async fn find_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Action>> {
        let row = sqlx::query(&format!(
            "{SELECT_ACTION} WHERE checksum = ? ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(action_from_row).transpose()
    }

    async fn list_pending(&self) -> Result<Vec<Action>> {
        let rows = sqlx::query(&format!(
            "{SELECT_ACTION} WHERE status IN ('pending', 'in-progress') ORDER BY created_at ASC, rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(action_from_row).collect()
    }

    async fn list_actions(&self) -> Result<Vec<Action>> {
        let rows = sqlx::query(&format!("{SELECT_ACTION} ORDER BY created_at ASC, rowid ASC"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(action_from_row).collect()
    }

    async fn mark_started(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.transition(id, Transition::started(at)).await
    }

    async fn mark_completed(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.transition(id, Transition::completed(at)).await
    }

    async fn mark_failed(&self, id: &str, at: DateTime<Utc>, message: &str) -> Result<()> {
        self.transition(id, Transition::failed(at, message)).await
    }

    async fn mark_skipped(
        &self,
        id: &str,
        at: DateTime<Utc>,
        reason: Option<&str>,
    ) -> Result<()> {
        self.transition(id, Transition::skipped(at, reason)).await
    }

    async fn record_savings(&self, event: SavingsEvent) -> Result<i64> {
        let action = self.get(&event.action_id).await?;
        if action.status != crate::models::ActionStatus::Completed {
            return Err(Error::Invalid(format!(
                "savings recorded for action {} in state {}",
                action.id, action.status
            )));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO savings_events (action_id, resource_id, kind, estimated, actual, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.action_id)
        .bind(&event.resource_id)
        .bind(event.kind.as_str())
        .bind(event.estimated)
        .bind(event.actual)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn savings_for_action(&self, action_id: &str) -> Result<Vec<SavingsEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT action_id, resource_id, kind, estimated, actual, created_at
            FROM savings_events
            WHERE action_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(action_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(savings_from_row).collect()
    }

    async fn stats(&self) -> Result<LedgerStats> {
        let mut stats = LedgerStats::default();
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM actions GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            stats.add(status.parse()?, count.max(0) as u64);
        }

        let totals = sqlx::query(
            r#"
            SELECT COUNT(*) AS count,
                   COALESCE(SUM(estimated), 0.0) AS estimated,
                   COALESCE(SUM(actual), 0.0) AS actual
            FROM savings_events
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = totals.try_get("count")?;
        stats.savings_events = count.max(0) as u64;
        stats.estimated_savings = totals.try_get("estimated")?;
        stats.actual_savings = totals.try_get("actual")?;
        Ok(stats)
    }
}
