//! In-process cloud simulator
//!
//! Backs local runs and the controller tests. Applying the same
//! (resource, kind) twice returns the savings of the first delivery.

use super::CloudAdapter;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::models::{ActionKind, ActionPayload, ResourceSnapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tracing::debug;

/// Base hourly spot price used when no override is configured
const BASE_SPOT_PRICE: f64 = 0.10;

/// Zone suffix multipliers applied to the base spot price
const ZONE_PRICE_FACTORS: &[(&str, f64)] = &[("a", 1.0), ("b", 0.7), ("c", 0.85)];

/// Simulated cloud provider
pub struct SimulatorAdapter {
    resources: RwLock<Vec<ResourceSnapshot>>,
    applied: Mutex<HashMap<(String, ActionKind), f64>>,
    failures: Mutex<HashMap<String, String>>,
    spot_overrides: HashMap<String, f64>,
    latency: Option<Duration>,
    apply_calls: AtomicUsize,
}

impl SimulatorAdapter {
    pub fn new(resources: Vec<ResourceSnapshot>) -> Self {
        Self {
            resources: RwLock::new(resources),
            applied: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            spot_overrides: HashMap::new(),
            latency: None,
            apply_calls: AtomicUsize::new(0),
        }
    }

    /// A small fleet for local runs
    pub fn sample_fleet() -> Self {
        Self::new(vec![
            ResourceSnapshot::new("aws", "us-east-1", "db-prod-01", "rds")
                .with_utilisation(0.155, 0.220)
                .with_monthly_cost(450.0)
                .with_label("env", "production"),
            ResourceSnapshot::new("aws", "us-east-1", "web-prod-01", "ec2")
                .with_utilisation(0.452, 0.678)
                .with_monthly_cost(125.0)
                .with_label("env", "production"),
            ResourceSnapshot::new("aws", "us-east-1", "batch-dev-01", "ec2")
                .with_utilisation(0.08, 0.12)
                .with_monthly_cost(220.0)
                .with_label("env", "dev")
                .with_label("zone", "us-east-1a"),
        ])
    }

    /// Delay every fetch and apply by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_spot_price(mut self, zone: impl Into<String>, price: f64) -> Self {
        self.spot_overrides.insert(zone.into(), price);
        self
    }

    /// Make every apply against `resource_id` fail with a transient error
    pub fn fail_resource(&self, resource_id: impl Into<String>, message: impl Into<String>) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(resource_id.into(), message.into());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }

    /// Replace the fleet wholesale, as a fresh scan would
    pub fn set_resources(&self, resources: Vec<ResourceSnapshot>) {
        if let Ok(mut current) = self.resources.write() {
            *current = resources;
        }
    }

    /// Number of apply deliveries, including re-deliveries
    pub fn apply_count(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    /// Distinct (resource, kind) pairs that have been applied
    pub fn applied(&self) -> Vec<(String, ActionKind)> {
        let mut pairs: Vec<_> = self
            .applied
            .lock()
            .map(|applied| applied.keys().cloned().collect())
            .unwrap_or_default();
        pairs.sort();
        pairs
    }

    fn savings_ratio(kind: ActionKind) -> f64 {
        match kind {
            ActionKind::Rightsize => 0.40,
            ActionKind::MigrateZone => 0.20,
            ActionKind::Stop | ActionKind::Terminate => 1.0,
            ActionKind::Monitor | ActionKind::NoOp => 0.0,
        }
    }

    async fn simulate_latency(&self, deadline: &Deadline) -> Result<()> {
        match self.latency {
            Some(latency) => deadline.sleep(latency).await,
            None => Ok(()),
        }
    }

    fn poisoned() -> Error {
        Error::Fatal("simulator state lock poisoned".to_string())
    }
}

#[async_trait]
impl CloudAdapter for SimulatorAdapter {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn fetch_resources(&self, deadline: &Deadline) -> Result<Vec<ResourceSnapshot>> {
        self.simulate_latency(deadline).await?;
        let resources = self.resources.read().map_err(|_| Self::poisoned())?;
        Ok(resources.clone())
    }

    async fn get_resource(
        &self,
        resource_id: &str,
        deadline: &Deadline,
    ) -> Result<ResourceSnapshot> {
        self.simulate_latency(deadline).await?;
        let resources = self.resources.read().map_err(|_| Self::poisoned())?;
        resources
            .iter()
            .find(|r| r.resource_id() == resource_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("resource {resource_id}")))
    }

    async fn apply_optimization(
        &self,
        snapshot: &ResourceSnapshot,
        payload: &ActionPayload,
        deadline: &Deadline,
    ) -> Result<f64> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency(deadline).await?;

        let failure = self
            .failures
            .lock()
            .map_err(|_| Self::poisoned())?
            .get(snapshot.resource_id())
            .cloned();
        if let Some(message) = failure {
            return Err(Error::Transient(message));
        }

        let key = (snapshot.resource_id().to_string(), payload.kind);
        let mut applied = self.applied.lock().map_err(|_| Self::poisoned())?;
        let savings = *applied
            .entry(key)
            .or_insert_with(|| snapshot.monthly_cost.max(0.0) * Self::savings_ratio(payload.kind));

        debug!(
            resource_id = %snapshot.resource_id(),
            kind = %payload.kind,
            savings = savings,
            "Simulated optimization applied"
        );
        Ok(savings)
    }

    async fn list_zones(&self, region: &str) -> Result<Vec<String>> {
        Ok(ZONE_PRICE_FACTORS
            .iter()
            .map(|(suffix, _)| format!("{region}{suffix}"))
            .collect())
    }

    async fn spot_price(&self, zone: &str, _kind: &str) -> Result<Option<f64>> {
        if let Some(price) = self.spot_overrides.get(zone) {
            return Ok(Some(*price));
        }
        let factor = ZONE_PRICE_FACTORS
            .iter()
            .find(|(suffix, _)| zone.ends_with(suffix))
            .map(|(_, factor)| *factor)
            .unwrap_or(1.0);
        Ok(Some(BASE_SPOT_PRICE * factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::quote_spot;
    use crate::models::ActionParameters;

    fn vm(id: &str) -> ResourceSnapshot {
        ResourceSnapshot::new("aws", "us-east-1", id, "vm")
            .with_utilisation(0.1, 0.15)
            .with_monthly_cost(100.0)
    }

    #[tokio::test]
    async fn test_reapply_does_not_double_count() {
        let sim = SimulatorAdapter::new(vec![vm("vm-1")]);
        let deadline = Deadline::after(Duration::from_secs(5));
        let payload = ActionPayload::new(ActionParameters::Rightsize { size_factor: 0.5 }, 0.8);
        let snapshot = sim.get_resource("vm-1", &deadline).await.unwrap();

        let first = sim.apply_optimization(&snapshot, &payload, &deadline).await.unwrap();
        let second = sim.apply_optimization(&snapshot, &payload, &deadline).await.unwrap();
        assert_eq!(first, 40.0);
        assert_eq!(second, 40.0);
        assert_eq!(sim.apply_count(), 2);
        assert_eq!(sim.applied().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let sim = SimulatorAdapter::new(vec![vm("vm-1")]);
        sim.fail_resource("vm-1", "api throttled");
        let deadline = Deadline::after(Duration::from_secs(5));
        let payload = ActionPayload::new(ActionParameters::Stop, 0.9);
        let err = sim
            .apply_optimization(&vm("vm-1"), &payload, &deadline)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(sim.applied().is_empty());
    }

    #[tokio::test]
    async fn test_missing_resource_is_not_found() {
        let sim = SimulatorAdapter::new(vec![]);
        let deadline = Deadline::after(Duration::from_secs(5));
        let err = sim.get_resource("gone", &deadline).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_spot_quote_prefers_cheapest_zone() {
        let sim = SimulatorAdapter::new(vec![]);
        let snapshot = vm("vm-1").with_label("zone", "us-east-1a");
        let quote = quote_spot(&sim, &snapshot).await.unwrap().unwrap();
        assert_eq!(quote.current_zone, "us-east-1a");
        assert_eq!(quote.best_zone, "us-east-1b");
        assert!(quote.has_cheaper_zone());
        assert!((quote.discount() - 0.3).abs() < 1e-9);
    }
}
