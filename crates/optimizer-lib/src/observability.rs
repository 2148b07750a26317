//! Observability infrastructure for the optimizer
//!
//! Provides:
//! - Prometheus metrics (cycle duration, engine latency, action counters, ROI)
//! - Structured JSON logging with tracing

use crate::engine::Tier;
use crate::models::Action;
use crate::ooda::CycleSummary;
use prometheus::{
    register_gauge, register_histogram, register_histogram_vec, register_int_counter,
    register_int_gauge, Gauge, Histogram, HistogramVec, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Buckets for whole-cycle durations (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 240.0];

/// Buckets for decision engine latencies (in seconds)
const ENGINE_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

static GLOBAL_METRICS: OnceLock<OptimizerMetricsInner> = OnceLock::new();

struct OptimizerMetricsInner {
    cycle_duration_seconds: Histogram,
    engine_latency_seconds: HistogramVec,
    resources_scanned: IntCounter,
    opportunities: IntCounter,
    actions_recorded: IntCounter,
    actions_duplicate: IntCounter,
    actions_applied: IntCounter,
    actions_failed: IntCounter,
    actions_skipped: IntCounter,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    tier_cascades: IntCounter,
    pending_actions: IntGauge,
    net_roi_percent: Gauge,
}

impl OptimizerMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "cost_optimizer_cycle_duration_seconds",
                "Wall time of one observe-orient-decide-act cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            engine_latency_seconds: register_histogram_vec!(
                "cost_optimizer_engine_latency_seconds",
                "Latency of decision engine calls by tier",
                &["tier"],
                ENGINE_BUCKETS.to_vec()
            )
            .expect("Failed to register engine_latency_seconds"),

            resources_scanned: register_int_counter!(
                "cost_optimizer_resources_scanned_total",
                "Resources returned by the cloud adapter"
            )
            .expect("Failed to register resources_scanned"),

            opportunities: register_int_counter!(
                "cost_optimizer_opportunities_total",
                "Opportunities produced by the orient phase"
            )
            .expect("Failed to register opportunities"),

            actions_recorded: register_int_counter!(
                "cost_optimizer_actions_recorded_total",
                "Actions newly staged in the ledger"
            )
            .expect("Failed to register actions_recorded"),

            actions_duplicate: register_int_counter!(
                "cost_optimizer_actions_duplicate_total",
                "Actions rejected because their fingerprint already exists"
            )
            .expect("Failed to register actions_duplicate"),

            actions_applied: register_int_counter!(
                "cost_optimizer_actions_applied_total",
                "Actions applied successfully"
            )
            .expect("Failed to register actions_applied"),

            actions_failed: register_int_counter!(
                "cost_optimizer_actions_failed_total",
                "Actions whose application failed"
            )
            .expect("Failed to register actions_failed"),

            actions_skipped: register_int_counter!(
                "cost_optimizer_actions_skipped_total",
                "Actions skipped by dry run or recovery"
            )
            .expect("Failed to register actions_skipped"),

            cache_hits: register_int_counter!(
                "cost_optimizer_decision_cache_hits_total",
                "Decision cache hits"
            )
            .expect("Failed to register cache_hits"),

            cache_misses: register_int_counter!(
                "cost_optimizer_decision_cache_misses_total",
                "Decision cache misses"
            )
            .expect("Failed to register cache_misses"),

            tier_cascades: register_int_counter!(
                "cost_optimizer_tier_cascades_total",
                "Times the router fell back to a cheaper tier"
            )
            .expect("Failed to register tier_cascades"),

            pending_actions: register_int_gauge!(
                "cost_optimizer_pending_actions",
                "Actions pending or in progress in the ledger"
            )
            .expect("Failed to register pending_actions"),

            net_roi_percent: register_gauge!(
                "cost_optimizer_net_roi_percent",
                "Net return on decision spend for this session"
            )
            .expect("Failed to register net_roi_percent"),
        }
    }
}

/// Optimizer metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the same
/// collectors.
#[derive(Clone)]
pub struct OptimizerMetrics {
    _private: (),
}

impl Default for OptimizerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OptimizerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OptimizerMetrics")
    }
}

impl OptimizerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OptimizerMetricsInner {
        GLOBAL_METRICS.get_or_init(OptimizerMetricsInner::new)
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }

    pub fn observe_engine_latency(&self, tier: Tier, duration_secs: f64) {
        self.inner()
            .engine_latency_seconds
            .with_label_values(&[&tier.to_string()])
            .observe(duration_secs);
    }

    pub fn add_resources_scanned(&self, count: usize) {
        self.inner().resources_scanned.inc_by(count as u64);
    }

    pub fn add_opportunities(&self, count: usize) {
        self.inner().opportunities.inc_by(count as u64);
    }

    pub fn inc_actions_recorded(&self) {
        self.inner().actions_recorded.inc();
    }

    pub fn inc_actions_duplicate(&self) {
        self.inner().actions_duplicate.inc();
    }

    pub fn inc_actions_applied(&self) {
        self.inner().actions_applied.inc();
    }

    pub fn inc_actions_failed(&self) {
        self.inner().actions_failed.inc();
    }

    pub fn inc_actions_skipped(&self) {
        self.inner().actions_skipped.inc();
    }

    pub fn inc_cache_hits(&self) {
        self.inner().cache_hits.inc();
    }

    pub fn inc_cache_misses(&self) {
        self.inner().cache_misses.inc();
    }

    pub fn inc_tier_cascades(&self) {
        self.inner().tier_cascades.inc();
    }

    pub fn set_pending_actions(&self, count: u64) {
        self.inner().pending_actions.set(count as i64);
    }

    pub fn set_net_roi(&self, percent: f64) {
        self.inner().net_roi_percent.set(percent);
    }
}

/// Structured logger for controller events
///
/// Every event carries the instance name so logs from several optimizers
/// sharing a ledger can be told apart.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_startup(&self, version: &str, adapter: &str, dry_run: bool) {
        info!(
            event = "controller_started",
            instance = %self.instance,
            version = %version,
            adapter = %adapter,
            dry_run = dry_run,
            "Cost optimizer started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Cost optimizer shutting down"
        );
    }

    pub fn log_cycle_completed(&self, summary: &CycleSummary) {
        info!(
            event = "cycle_completed",
            instance = %self.instance,
            cycle = summary.cycle,
            scanned = summary.scanned,
            analysed = summary.analysed,
            committed = summary.committed,
            applied = summary.applied,
            failed = summary.failed,
            cost_usd = summary.cost_usd,
            savings_usd = summary.savings_usd,
            roi_percent = summary.roi_percent,
            duration_ms = summary.duration_ms,
            "{summary}"
        );
    }

    pub fn log_action_recorded(&self, action: &Action) {
        info!(
            event = "action_recorded",
            instance = %self.instance,
            action_id = %action.id,
            resource_id = %action.resource_id,
            kind = %action.kind,
            risk_score = action.risk_score,
            estimated_savings = action.estimated_savings,
            "Staged optimization action"
        );
    }

    pub fn log_action_applied(&self, action: &Action, actual_savings: f64) {
        info!(
            event = "action_applied",
            instance = %self.instance,
            action_id = %action.id,
            resource_id = %action.resource_id,
            kind = %action.kind,
            estimated_savings = action.estimated_savings,
            actual_savings = actual_savings,
            "Applied optimization action"
        );
    }

    pub fn log_action_failed(&self, action: &Action, error: &str) {
        warn!(
            event = "action_failed",
            instance = %self.instance,
            action_id = %action.id,
            resource_id = %action.resource_id,
            kind = %action.kind,
            error = %error,
            "Optimization action failed"
        );
    }

    pub fn log_action_skipped(&self, action: &Action, reason: &str) {
        info!(
            event = "action_skipped",
            instance = %self.instance,
            action_id = %action.id,
            resource_id = %action.resource_id,
            kind = %action.kind,
            reason = %reason,
            "Skipped optimization action"
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_decision_routed(
        &self,
        resource_id: &str,
        requested_tier: Tier,
        served_tier: Tier,
        model: &str,
        cached: bool,
        confidence: f64,
        cost_usd: f64,
    ) {
        info!(
            event = "decision_routed",
            instance = %self.instance,
            resource_id = %resource_id,
            requested_tier = requested_tier.get(),
            served_tier = served_tier.get(),
            model = %model,
            cached = cached,
            confidence = confidence,
            cost_usd = cost_usd,
            "Decision obtained"
        );
    }

    pub fn log_tier_cascade(&self, from: Tier, to: Option<Tier>, error: &str) {
        warn!(
            event = "tier_cascade",
            instance = %self.instance,
            from_tier = from.get(),
            to_tier = ?to.map(|t| t.get()),
            error = %error,
            "Decision tier exhausted, falling back"
        );
    }

    pub fn log_recovery(&self, action: &Action, outcome: &str) {
        info!(
            event = "recovery",
            instance = %self.instance,
            action_id = %action.id,
            resource_id = %action.resource_id,
            previous_status = %action.status,
            outcome = %outcome,
            "Recovered interrupted action"
        );
    }
}
