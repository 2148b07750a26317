//! Token and cost accounting for decision engines
//!
//! Totals are kept per model, per tier and per session. The tracker is
//! shared between router and controller behind an `Arc`; updates take a
//! short internal lock that is never held across I/O.
//!
//! Persistence is write-behind: `flush` snapshots the totals under the lock
//! and writes them to disk outside it, through a temp file and a rename so a
//! crash mid-write leaves the previous snapshot intact.

use crate::engine::Tier;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Usage totals for one model or tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub tokens: u64,
    pub cost_usd: f64,
    pub requests: u64,
}

impl UsageTotals {
    fn add(&mut self, tokens: u64, cost: f64) {
        self.tokens += tokens;
        self.cost_usd += cost;
        self.requests += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionTotals {
    pub cost_usd: f64,
    pub savings_usd: f64,
    pub net_roi: f64,
    pub started_at: DateTime<Utc>,
}

/// Point-in-time copy of every total, also the on-disk format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub models: BTreeMap<String, UsageTotals>,
    pub tiers: BTreeMap<u8, UsageTotals>,
    pub session: SessionTotals,
    pub updated_at: DateTime<Utc>,
}

impl UsageSnapshot {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            models: BTreeMap::new(),
            tiers: BTreeMap::new(),
            session: SessionTotals {
                cost_usd: 0.0,
                savings_usd: 0.0,
                net_roi: 0.0,
                started_at: now,
            },
            updated_at: now,
        }
    }

    fn refresh_roi(&mut self) {
        self.session.net_roi = net_roi(self.session.savings_usd, self.session.cost_usd);
    }
}

/// `((savings - cost) / cost) * 100`, zero when nothing was spent
pub fn net_roi(savings: f64, cost: f64) -> f64 {
    if cost > 0.0 {
        (savings - cost) / cost * 100.0
    } else {
        0.0
    }
}

/// Configuration for the tracker
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Snapshot file; `None` keeps totals in memory only
    pub path: Option<PathBuf>,
    pub flush_interval: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            path: None,
            flush_interval: Duration::from_secs(30),
        }
    }
}

pub struct TokenTracker {
    state: Mutex<UsageSnapshot>,
    dirty: AtomicBool,
    settings: TrackerSettings,
}

impl std::fmt::Debug for TokenTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenTracker")
            .field("settings", &self.settings)
            .field("dirty", &self.dirty.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for TokenTracker {
    fn default() -> Self {
        Self::new(TrackerSettings::default())
    }
}

impl TokenTracker {
    pub fn new(settings: TrackerSettings) -> Self {
        Self {
            state: Mutex::new(UsageSnapshot::empty(Utc::now())),
            dirty: AtomicBool::new(false),
            settings,
        }
    }

    /// Restore totals from the configured snapshot file if it exists
    ///
    /// The restored session keeps accumulating; a corrupt file is an error
    /// rather than a silent reset.
    pub fn load(settings: TrackerSettings) -> Result<Self> {
        let tracker = Self::new(settings);
        let Some(path) = tracker.settings.path.clone() else {
            return Ok(tracker);
        };
        if !path.exists() {
            debug!(path = %path.display(), "No token usage snapshot to restore");
            return Ok(tracker);
        }

        let snapshot = read_snapshot(&path)?;
        info!(
            path = %path.display(),
            models = snapshot.models.len(),
            cost_usd = snapshot.session.cost_usd,
            "Restored token usage snapshot"
        );
        *tracker.lock() = snapshot;
        Ok(tracker)
    }

    fn lock(&self) -> MutexGuard<'_, UsageSnapshot> {
        // Totals stay consistent even if a holder panicked mid-update
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_usage(&self, model: &str, tier: Tier, tokens: u64, cost: f64) {
        let cost = if cost.is_finite() { cost.max(0.0) } else { 0.0 };
        let mut state = self.lock();
        state.models.entry(model.to_string()).or_default().add(tokens, cost);
        state.tiers.entry(tier.get()).or_default().add(tokens, cost);
        state.session.cost_usd += cost;
        state.updated_at = Utc::now();
        state.refresh_roi();
        self.dirty.store(true, Ordering::Release);
    }

    pub fn record_savings(&self, amount: f64) {
        if !amount.is_finite() || amount <= 0.0 {
            return;
        }
        let mut state = self.lock();
        state.session.savings_usd += amount;
        state.updated_at = Utc::now();
        state.refresh_roi();
        self.dirty.store(true, Ordering::Release);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        self.lock().clone()
    }

    pub fn session(&self) -> SessionTotals {
        self.lock().session
    }

    pub fn should_flush(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Human-readable multi-line usage report
    pub fn report(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();
        let _ = writeln!(out, "Decision spend since {}", snapshot.session.started_at.to_rfc3339());
        for (model, totals) in &snapshot.models {
            let _ = writeln!(
                out,
                "  {model}: {} requests, {} tokens, ${:.4}",
                totals.requests, totals.tokens, totals.cost_usd
            );
        }
        for (tier, totals) in &snapshot.tiers {
            let _ = writeln!(
                out,
                "  tier-{tier}: {} requests, ${:.4}",
                totals.requests, totals.cost_usd
            );
        }
        let _ = write!(
            out,
            "Cost ${:.4}, savings ${:.2}, net ROI {:.1}%",
            snapshot.session.cost_usd, snapshot.session.savings_usd, snapshot.session.net_roi
        );
        out
    }

    /// Write the snapshot to disk if anything changed since the last flush
    pub fn flush(&self) -> Result<()> {
        let Some(path) = self.settings.path.as_deref() else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let snapshot = self.snapshot();
        if let Err(err) = save_to_disk(path, &snapshot) {
            self.dirty.store(true, Ordering::Release);
            return Err(err);
        }
        debug!(path = %path.display(), "Flushed token usage snapshot");
        Ok(())
    }

    /// Flush every interval while dirty, and once more on shutdown
    pub async fn run_flush_loop(&self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.settings.flush_interval.max(Duration::from_millis(10));
        info!(interval_secs = period.as_secs(), "Starting token usage flush loop");

        let mut ticker = interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.should_flush() {
                        if let Err(e) = self.flush() {
                            warn!(error = %e, "Failed to flush token usage");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    if let Err(e) = self.flush() {
                        warn!(error = %e, "Failed to flush token usage on shutdown");
                    }
                    info!("Shutting down token usage flush loop");
                    break;
                }
            }
        }
    }
}

fn save_to_disk(path: &Path, snapshot: &UsageSnapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_vec_pretty(snapshot)?;

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)?;
    file.write_all(&json)?;
    file.sync_all()?;

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

fn read_snapshot(path: &Path) -> Result<UsageSnapshot> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;
    serde_json::from_slice(&data)
        .map_err(|e| Error::Invalid(format!("token usage snapshot {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_roi_formula() {
        assert_eq!(net_roi(300.0, 100.0), 200.0);
        assert_eq!(net_roi(50.0, 100.0), -50.0);
        assert_eq!(net_roi(500.0, 0.0), 0.0);
    }

    #[test]
    fn test_usage_totals_by_model_and_tier() {
        let tracker = TokenTracker::default();
        tracker.record_usage("small", Tier::SMALL, 100, 0.01);
        tracker.record_usage("small", Tier::SMALL, 50, 0.01);
        tracker.record_usage("heuristic-v1", Tier::HEURISTIC, 0, 0.0);
        tracker.record_savings(0.06);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.models["small"].tokens, 150);
        assert_eq!(snapshot.models["small"].requests, 2);
        assert_eq!(snapshot.tiers[&1].requests, 1);
        assert!((snapshot.session.cost_usd - 0.02).abs() < 1e-12);
        assert!((snapshot.session.net_roi - 200.0).abs() < 1e-6);
        assert!(tracker.report().contains("small: 2 requests"));
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let tracker = Arc::new(TokenTracker::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        tracker.record_usage("m", Tier::MEDIUM, 10, 0.001);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.models["m"].requests, 800);
        assert_eq!(snapshot.models["m"].tokens, 8000);
    }

    #[test]
    fn test_flush_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("usage").join("token_usage.json");
        let settings = TrackerSettings {
            path: Some(path.clone()),
            ..Default::default()
        };

        let tracker = TokenTracker::new(settings.clone());
        assert!(!tracker.should_flush());
        tracker.record_usage("large", Tier::LARGE, 1000, 0.5);
        assert!(tracker.should_flush());
        tracker.flush().unwrap();
        assert!(!tracker.should_flush());
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        let restored = TokenTracker::load(settings).unwrap();
        assert_eq!(restored.snapshot().models["large"].tokens, 1000);
        restored.record_usage("large", Tier::LARGE, 1, 0.0);
        assert_eq!(restored.snapshot().models["large"].requests, 2);
    }

    #[test]
    fn test_corrupt_snapshot_is_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token_usage.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = TokenTracker::load(TrackerSettings {
            path: Some(path),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[tokio::test]
    async fn test_flush_loop_flushes_on_shutdown() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token_usage.json");
        let tracker = Arc::new(TokenTracker::new(TrackerSettings {
            path: Some(path.clone()),
            flush_interval: Duration::from_secs(3600),
        }));
        let (tx, rx) = broadcast::channel(1);

        let looping = tracker.clone();
        let handle = tokio::spawn(async move { looping.run_flush_loop(rx).await });
        tracker.record_usage("m", Tier::SMALL, 5, 0.001);
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert!(path.exists());
        assert!(!tracker.should_flush());
    }
}
