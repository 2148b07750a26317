//! Optimizer configuration
//!
//! Every recognised option is a typed field with a default, so an empty
//! configuration is a valid dry-run setup using only the local engine.

use crate::engine::{HttpEngineConfig, Tier};
use crate::error::{Error, Result};
use crate::ledger::LedgerBackend;
use crate::router::RouterConfig;
use crate::scoring::ScoringConfig;
use crate::tracker::TrackerSettings;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// What crash recovery does with actions left unfinished by a previous run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Re-apply through the adapter, which tolerates re-delivery
    #[default]
    Reapply,
    MarkFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub backend: LedgerBackend,

    #[serde(default = "default_ledger_url")]
    pub url: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::default(),
            url: default_ledger_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackerConfig {
    /// Snapshot file for token usage; unset keeps totals in memory
    #[serde(default = "default_tracker_path")]
    pub path: Option<PathBuf>,

    #[serde(default = "default_tracker_flush_interval")]
    pub flush_interval_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            path: default_tracker_path(),
            flush_interval_secs: default_tracker_flush_interval(),
        }
    }
}

impl TrackerConfig {
    pub fn settings(&self) -> TrackerSettings {
        TrackerSettings {
            path: self.path.clone(),
            flush_interval: Duration::from_secs(self.flush_interval_secs),
        }
    }
}

/// A network-hosted decision engine
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineSpec {
    pub tier: Tier,
    pub model: String,
    pub endpoint: String,

    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default)]
    pub price_per_million_tokens: f64,
}

impl EngineSpec {
    /// Resolve into an engine configuration, reading the API key from the environment
    pub fn to_engine_config(&self, timeout: Duration) -> Result<HttpEngineConfig> {
        let api_key = match &self.api_key_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                Error::Invalid(format!("engine {}: environment variable {var} is not set", self.model))
            })?),
            None => None,
        };
        Ok(HttpEngineConfig {
            tier: self.tier,
            model: self.model.clone(),
            endpoint: self.endpoint.clone(),
            api_key,
            price_per_million_tokens: self.price_per_million_tokens,
            timeout,
        })
    }
}

/// Optimizer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerConfig {
    /// Name carried on every structured log event
    #[serde(default = "default_instance")]
    pub instance: String,

    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,

    #[serde(default = "default_cycle_deadline")]
    pub cycle_deadline_secs: u64,

    /// Orient fan-out
    #[serde(default = "default_observe_workers")]
    pub max_observe_workers: usize,

    /// Act fan-out
    #[serde(default = "default_decide_workers")]
    pub max_decide_workers: usize,

    #[serde(default = "default_risk_threshold")]
    pub risk_threshold: f64,

    #[serde(default = "default_min_savings")]
    pub min_savings_threshold: f64,

    #[serde(default = "default_dry_run")]
    pub dry_run: bool,

    #[serde(default = "default_cache_ttl")]
    pub decision_cache_ttl_secs: u64,

    #[serde(default = "default_cache_max_entries")]
    pub decision_cache_max_entries: usize,

    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_tier_thresholds")]
    pub tier_thresholds: [f64; 4],

    /// Monthly cost at or above which Orient asks the decision router
    #[serde(default = "default_decision_cost_threshold")]
    pub decision_cost_threshold: f64,

    #[serde(default = "default_min_decision_confidence")]
    pub min_decision_confidence: f64,

    #[serde(default)]
    pub recovery_policy: RecoveryPolicy,

    #[serde(default = "default_adapter_timeout")]
    pub adapter_timeout_secs: u64,

    #[serde(default = "default_ledger_timeout")]
    pub ledger_timeout_secs: u64,

    #[serde(default = "default_cache_timeout")]
    pub cache_timeout_ms: u64,

    #[serde(default = "default_engine_timeouts")]
    pub engine_timeouts_secs: [u64; 5],

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub engines: Vec<EngineSpec>,
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "cost-optimizer".to_string())
}

fn default_cycle_interval() -> u64 {
    300
}

fn default_cycle_deadline() -> u64 {
    240
}

fn default_observe_workers() -> usize {
    10
}

fn default_decide_workers() -> usize {
    4
}

fn default_risk_threshold() -> f64 {
    7.0
}

fn default_min_savings() -> f64 {
    10.0
}

fn default_dry_run() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_cache_max_entries() -> usize {
    crate::cache::DEFAULT_MAX_ENTRIES
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    1000
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_tier_thresholds() -> [f64; 4] {
    [3.0, 5.0, 7.0, 9.0]
}

fn default_decision_cost_threshold() -> f64 {
    50.0
}

fn default_min_decision_confidence() -> f64 {
    0.5
}

fn default_adapter_timeout() -> u64 {
    30
}

fn default_ledger_timeout() -> u64 {
    5
}

fn default_cache_timeout() -> u64 {
    1000
}

fn default_engine_timeouts() -> [u64; 5] {
    [30, 45, 60, 90, 120]
}

fn default_ledger_url() -> String {
    "sqlite://optimizer.db".to_string()
}

fn default_tracker_path() -> Option<PathBuf> {
    Some(PathBuf::from("token_usage.json"))
}

fn default_tracker_flush_interval() -> u64 {
    30
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            instance: default_instance(),
            cycle_interval_secs: default_cycle_interval(),
            cycle_deadline_secs: default_cycle_deadline(),
            max_observe_workers: default_observe_workers(),
            max_decide_workers: default_decide_workers(),
            risk_threshold: default_risk_threshold(),
            min_savings_threshold: default_min_savings(),
            dry_run: default_dry_run(),
            decision_cache_ttl_secs: default_cache_ttl(),
            decision_cache_max_entries: default_cache_max_entries(),
            retry_max_attempts: default_retry_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            tier_thresholds: default_tier_thresholds(),
            decision_cost_threshold: default_decision_cost_threshold(),
            min_decision_confidence: default_min_decision_confidence(),
            recovery_policy: RecoveryPolicy::default(),
            adapter_timeout_secs: default_adapter_timeout(),
            ledger_timeout_secs: default_ledger_timeout(),
            cache_timeout_ms: default_cache_timeout(),
            engine_timeouts_secs: default_engine_timeouts(),
            scoring: ScoringConfig::default(),
            ledger: LedgerConfig::default(),
            tracker: TrackerConfig::default(),
            engines: Vec::new(),
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        let thresholds = &self.tier_thresholds;
        if thresholds.iter().any(|t| !t.is_finite())
            || thresholds.windows(2).any(|pair| pair[0] >= pair[1])
        {
            return Err(Error::Invalid(format!(
                "tier_thresholds must be finite and strictly increasing, got {thresholds:?}"
            )));
        }
        if self.max_observe_workers == 0 || self.max_decide_workers == 0 {
            return Err(Error::Invalid("worker counts must be at least 1".to_string()));
        }
        if self.retry_max_attempts == 0 {
            return Err(Error::Invalid("retry_max_attempts must be at least 1".to_string()));
        }
        let non_negative = [
            ("risk_threshold", self.risk_threshold),
            ("min_savings_threshold", self.min_savings_threshold),
            ("decision_cost_threshold", self.decision_cost_threshold),
            ("min_decision_confidence", self.min_decision_confidence),
        ];
        if let Some((name, value)) = non_negative.iter().find(|(_, v)| !(*v >= 0.0)) {
            return Err(Error::Invalid(format!("{name} must be non-negative, got {value}")));
        }
        if self.cycle_interval_secs == 0 || self.cycle_deadline_secs == 0 {
            return Err(Error::Invalid("cycle interval and deadline must be positive".to_string()));
        }
        for spec in &self.engines {
            if spec.tier == Tier::HEURISTIC {
                return Err(Error::Invalid(format!(
                    "engine {} cannot replace the local heuristic tier",
                    spec.model
                )));
            }
        }
        self.scoring.validate()
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_secs(self.cycle_deadline_secs)
    }

    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger_timeout_secs)
    }

    pub fn engine_timeout(&self, tier: Tier) -> Duration {
        Duration::from_secs(self.engine_timeouts_secs[tier.index()])
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            tier_thresholds: self.tier_thresholds,
            retry_max_attempts: self.retry_max_attempts,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            cache_ttl: Duration::from_secs(self.decision_cache_ttl_secs),
            cache_timeout: Duration::from_millis(self.cache_timeout_ms),
            engine_timeouts: self.engine_timeouts_secs.map(Duration::from_secs),
            ..RouterConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = OptimizerConfig::default();
        config.validate().unwrap();
        assert!(config.dry_run);
        assert_eq!(config.ledger.backend, LedgerBackend::Sqlite);
        assert_eq!(config.recovery_policy, RecoveryPolicy::Reapply);
        assert_eq!(config.router_config(), RouterConfig::default());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config: OptimizerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.cycle_interval_secs, 300);
        assert_eq!(config.engine_timeouts_secs, [30, 45, 60, 90, 120]);
        assert_eq!(config.tracker.path, Some(PathBuf::from("token_usage.json")));
        assert!(config.engines.is_empty());
    }

    #[test]
    fn test_nested_sections_deserialize() {
        let config: OptimizerConfig = serde_json::from_str(
            r#"{
                "dry_run": false,
                "recovery_policy": "mark_failed",
                "ledger": { "backend": "memory" },
                "scoring": { "max_risk": 6.0 },
                "engines": [
                    { "tier": 3, "model": "medium", "endpoint": "http://localhost:8000" }
                ]
            }"#,
        )
        .unwrap();
        assert!(!config.dry_run);
        assert_eq!(config.recovery_policy, RecoveryPolicy::MarkFailed);
        assert_eq!(config.ledger.backend, LedgerBackend::Memory);
        assert_eq!(config.ledger.url, "sqlite://optimizer.db");
        assert_eq!(config.scoring.max_risk, 6.0);
        assert_eq!(config.scoring.cost_threshold, 100.0);
        assert_eq!(config.engines[0].tier, Tier::MEDIUM);
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = OptimizerConfig {
            tier_thresholds: [3.0, 3.0, 7.0, 9.0],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Invalid(_))));

        config.tier_thresholds = default_tier_thresholds();
        config.max_observe_workers = 0;
        assert!(config.validate().is_err());

        config.max_observe_workers = 1;
        config.retry_max_attempts = 0;
        assert!(config.validate().is_err());

        config.retry_max_attempts = 1;
        config.min_savings_threshold = -1.0;
        assert!(config.validate().is_err());

        config.min_savings_threshold = 0.0;
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_api_key_env_is_invalid() {
        let spec = EngineSpec {
            tier: Tier::SMALL,
            model: "small".into(),
            endpoint: "http://localhost".into(),
            api_key_env: Some("COST_OPTIMIZER_TEST_KEY_THAT_IS_NOT_SET".into()),
            price_per_million_tokens: 0.5,
        };
        assert!(spec.to_engine_config(Duration::from_secs(1)).is_err());
    }
}
