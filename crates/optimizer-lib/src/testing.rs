//! Test doubles shared by router and controller tests, plus a scratch
//! PostgreSQL pool for the ignored database suites

use crate::deadline::Deadline;
use crate::engine::{DecisionEngine, DecisionRequest, DecisionResponse, Tier};
use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Engine answering with fixed content after an optional delay, failing
/// the first `failures` calls with a cloned error
pub struct ScriptedEngine {
    tier: Tier,
    model: String,
    content: String,
    confidence: f64,
    delay: Duration,
    failures: AtomicUsize,
    error: Mutex<Option<fn() -> Error>>,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(tier: Tier, model: &str, content: &str) -> Self {
        Self {
            tier,
            model: model.to_string(),
            content: content.to_string(),
            confidence: tier.default_confidence(),
            delay: Duration::ZERO,
            failures: AtomicUsize::new(0),
            error: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    /// Fail the next `count` calls with `Transient`
    pub fn failing(self, count: usize) -> Self {
        self.failing_with(count, || Error::Transient("engine outage".to_string()))
    }

    pub fn failing_with(self, count: usize, error: fn() -> Error) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        *self.error.lock().unwrap() = Some(error);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionEngine for ScriptedEngine {
    async fn analyse(
        &self,
        request: &DecisionRequest,
        _deadline: &Deadline,
    ) -> Result<DecisionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            let make = self.error.lock().unwrap().expect("error factory");
            return Err(make());
        }
        Ok(DecisionResponse {
            content: self.content.clone(),
            model: self.model.clone(),
            tier: self.tier,
            tokens_used: request.estimated_tokens(),
            cost: 0.001 * f64::from(self.tier.get()),
            latency_ms: self.delay.as_millis() as u64,
            confidence: self.confidence,
            reasoning: None,
            alternatives: Vec::new(),
        })
    }

    fn estimated_cost(&self, _request: &DecisionRequest) -> f64 {
        0.001 * f64::from(self.tier.get())
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn tier(&self) -> Tier {
        self.tier
    }

    async fn health_check(&self, _deadline: &Deadline) -> Result<()> {
        Ok(())
    }
}

static SCHEMA_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Pool on a fresh schema of the server named by `DATABASE_URL`
///
/// Each call gets its own schema so ignored suites can run in parallel
/// against one scratch database.
pub async fn scratch_postgres_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must name a scratch database");
    let schema = format!(
        "optimizer_test_{}_{}",
        std::process::id(),
        SCHEMA_SEQ.fetch_add(1, Ordering::SeqCst)
    );

    let admin = PgPoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .expect("connect to DATABASE_URL");
    admin
        .execute(format!("CREATE SCHEMA {schema}").as_str())
        .await
        .expect("create test schema");
    admin.close().await;

    PgPoolOptions::new()
        .max_connections(4)
        .after_connect(move |conn, _meta| {
            let search_path = format!("SET search_path TO {schema}");
            Box::pin(async move {
                conn.execute(search_path.as_str()).await?;
                Ok(())
            })
        })
        .connect(&url)
        .await
        .expect("connect test pool")
}
