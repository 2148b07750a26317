//! Cycle deadlines and per-call timeouts
//!
//! Every suspension point in a cycle goes through [`Deadline::run`] or
//! [`Deadline::sleep`], so a passed deadline or a shutdown request surfaces
//! promptly as [`Error::Cancelled`] while a slow callee surfaces as
//! [`Error::Timeout`].

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Stand-in for budgets too large to add to the current instant
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Absolute deadline paired with a cancellation token
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    token: CancellationToken,
}

impl Deadline {
    /// Deadline `budget` from now with a fresh token
    pub fn after(budget: Duration) -> Self {
        Self::with_token(budget, CancellationToken::new())
    }

    /// Deadline `budget` from now that is also cancelled by `token`
    pub fn with_token(budget: Duration, token: CancellationToken) -> Self {
        let now = Instant::now();
        let at = now
            .checked_add(budget)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        Self { at, token }
    }

    /// Same instant, child token: cancelling the child leaves the parent running
    pub fn child(&self) -> Self {
        Self {
            at: self.at,
            token: self.token.child_token(),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn instant(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.at
    }

    /// Fail with `Cancelled` once the deadline has passed
    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once the deadline passes or the token is cancelled
    pub async fn expired(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = tokio::time::sleep_until(self.at) => {}
        }
    }

    /// Run `fut` bounded by both the per-call `timeout` and this deadline
    ///
    /// When both expire at the same instant the deadline wins.
    pub async fn run<F, T>(&self, timeout: Duration, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep_until(self.at) => Err(Error::Cancelled),
            res = tokio::time::timeout(timeout, fut) => match res {
                Ok(inner) => inner,
                Err(_) => Err(Error::Timeout(timeout)),
            },
        }
    }

    /// Cancellable sleep; returns `Cancelled` if the deadline arrives first
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(duration.saturating_add(Duration::from_millis(1)), async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
