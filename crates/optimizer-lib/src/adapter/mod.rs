//! Cloud provider adapters
//!
//! The optimizer talks to a provider only through [`CloudAdapter`]. Spot
//! capabilities are optional; adapters that lack them inherit the default
//! methods and scoring treats the spot vector as unpriced.

mod simulator;

pub use simulator::SimulatorAdapter;

use crate::deadline::Deadline;
use crate::error::Result;
use crate::models::{ActionPayload, ResourceSnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Label that pins a resource to an availability zone
pub const ZONE_LABEL: &str = "zone";

/// Capability set of a cloud provider
#[async_trait]
pub trait CloudAdapter: Send + Sync {
    /// Provider name used in logs
    fn name(&self) -> &str;

    /// List every resource the optimizer may act on
    async fn fetch_resources(&self, deadline: &Deadline) -> Result<Vec<ResourceSnapshot>>;

    /// Fetch a single resource, `NotFound` if it no longer exists
    async fn get_resource(&self, resource_id: &str, deadline: &Deadline)
        -> Result<ResourceSnapshot>;

    /// Apply a remediation and return the realised monthly savings
    ///
    /// Must tolerate re-delivery of the same (resource, kind) pair.
    async fn apply_optimization(
        &self,
        snapshot: &ResourceSnapshot,
        payload: &ActionPayload,
        deadline: &Deadline,
    ) -> Result<f64>;

    async fn list_zones(&self, _region: &str) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn spot_price(&self, _zone: &str, _kind: &str) -> Result<Option<f64>> {
        Ok(None)
    }
}

/// Cheapest spot capacity relative to the zone a resource runs in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotQuote {
    pub current_zone: String,
    pub current_price: f64,
    pub best_zone: String,
    pub best_price: f64,
}

impl SpotQuote {
    /// Fractional discount of the best zone over the current one
    pub fn discount(&self) -> f64 {
        if self.current_price <= 0.0 {
            return 0.0;
        }
        ((self.current_price - self.best_price) / self.current_price).max(0.0)
    }

    pub fn has_cheaper_zone(&self) -> bool {
        self.best_zone != self.current_zone && self.best_price < self.current_price
    }
}

/// Build a spot quote for `snapshot` from the adapter's optional capabilities
///
/// Returns `None` when the adapter exposes no zones or prices.
pub async fn quote_spot(
    adapter: &dyn CloudAdapter,
    snapshot: &ResourceSnapshot,
) -> Result<Option<SpotQuote>> {
    let zones = adapter.list_zones(&snapshot.identity.region).await?;
    if zones.is_empty() {
        return Ok(None);
    }

    let mut priced = Vec::with_capacity(zones.len());
    for zone in zones {
        if let Some(price) = adapter.spot_price(&zone, snapshot.kind()).await? {
            priced.push((zone, price));
        }
    }

    let current_zone = snapshot
        .labels
        .get(ZONE_LABEL)
        .cloned()
        .or_else(|| priced.first().map(|(zone, _)| zone.clone()));
    let Some(current_zone) = current_zone else {
        return Ok(None);
    };
    let Some(current_price) = priced
        .iter()
        .find(|(zone, _)| *zone == current_zone)
        .map(|(_, price)| *price)
    else {
        return Ok(None);
    };
    let Some((best_zone, best_price)) = priced
        .into_iter()
        .min_by(|a, b| a.1.total_cmp(&b.1))
    else {
        return Ok(None);
    };

    Ok(Some(SpotQuote {
        current_zone,
        current_price,
        best_zone,
        best_price,
    }))
}
