//! SQLite learning store, usually sharing the ledger's database

use super::{LearningStore, OutcomeAggregate};
use crate::error::Result;
use crate::ledger::schema;
use crate::models::DecisionOutcome;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

#[derive(Clone)]
pub struct SqliteLearningStore {
    pool: SqlitePool,
}

impl SqliteLearningStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::from_pool(pool).await
    }

    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        for statement in schema::SQLITE_OUTCOMES {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }
}

fn outcome_from_row(row: &SqliteRow) -> Result<DecisionOutcome> {
    let kind: String = row.try_get("kind")?;
    Ok(DecisionOutcome {
        action_id: row.try_get("action_id")?,
        resource_id: row.try_get("resource_id")?,
        kind: kind.parse()?,
        risk_score: row.try_get("risk_score")?,
        actual_savings: row.try_get("actual_savings")?,
        success: row.try_get("success")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl LearningStore for SqliteLearningStore {
    async fn record_outcome(&self, outcome: DecisionOutcome) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO outcomes
                (action_id, resource_id, kind, risk_score, actual_savings, success, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&outcome.action_id)
        .bind(&outcome.resource_id)
        .bind(outcome.kind.as_str())
        .bind(outcome.risk_score)
        .bind(outcome.actual_savings)
        .bind(outcome.success)
        .bind(outcome.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn aggregate_for_resource_prefix(&self, prefix: &str) -> Result<OutcomeAggregate> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(success), 0) AS successes,
                   COUNT(*) AS total,
                   MAX(created_at) AS last_outcome_at
            FROM outcomes
            WHERE substr(resource_id, 1, ?) = ?
            "#,
        )
        .bind(prefix.chars().count() as i64)
        .bind(prefix)
        .fetch_one(&self.pool)
        .await?;

        let successes: i64 = row.try_get("successes")?;
        let total: i64 = row.try_get("total")?;
        let last: Option<DateTime<Utc>> = row.try_get("last_outcome_at")?;
        Ok(OutcomeAggregate {
            success_count: successes.max(0) as u64,
            failure_count: (total - successes).max(0) as u64,
            last_outcome_at: last,
        })
    }

    async fn outcomes(&self) -> Result<Vec<DecisionOutcome>> {
        let rows = sqlx::query(
            r#"
            SELECT action_id, resource_id, kind, risk_score, actual_savings, success, created_at
            FROM outcomes
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(outcome_from_row).collect()
    }
}
