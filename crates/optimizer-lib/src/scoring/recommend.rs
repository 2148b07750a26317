//! Savings estimate and the recommendation rule table

use super::vectors::SPOT_ARBITRAGE;
use super::ScoringConfig;
use crate::adapter::SpotQuote;
use crate::models::{ActionParameters, AnalysisVector, ResourceSnapshot, ResourceState};

/// Utilisation the rightsized instance should run at
const TARGET_UTILISATION: f64 = 0.6;

pub(crate) fn estimate_savings(snapshot: &ResourceSnapshot, config: &ScoringConfig) -> f64 {
    let cost = snapshot.monthly_cost.max(0.0);
    let ratio = match (snapshot.utilisation.cpu, snapshot.utilisation.memory) {
        (Some(cpu), Some(memory)) if cpu < 0.20 && memory < 0.30 => config.savings_ratio_idle,
        (Some(cpu), Some(memory)) if cpu < 0.50 && memory < 0.60 => {
            config.savings_ratio_underused
        }
        _ => config.savings_ratio_floor,
    };
    cost * ratio
}

/// Fraction of the current size to keep, in steps of 0.05
pub(crate) fn size_factor(snapshot: &ResourceSnapshot) -> f64 {
    let peak = snapshot
        .utilisation
        .cpu
        .into_iter()
        .chain(snapshot.utilisation.memory)
        .fold(0.0_f64, f64::max);
    let factor = (peak / TARGET_UTILISATION).clamp(0.25, 1.0);
    (factor * 20.0).round() / 20.0
}

/// First matching rule wins
pub(crate) fn recommend(
    snapshot: &ResourceSnapshot,
    vectors: &[AnalysisVector],
    risk: f64,
    spot: Option<&SpotQuote>,
    config: &ScoringConfig,
) -> ActionParameters {
    let weight_sum: f64 = vectors
        .iter()
        .filter(|v| v.is_included())
        .map(|v| v.weight)
        .sum();
    if weight_sum <= 0.0 {
        return ActionParameters::Monitor;
    }
    if risk > config.max_risk {
        return ActionParameters::NoOp;
    }
    if snapshot.state == ResourceState::Stopped {
        return ActionParameters::Terminate;
    }

    let cpu = snapshot.utilisation.cpu;
    let memory = snapshot.utilisation.memory;
    if matches!(cpu, Some(c) if c < 0.02) && !snapshot.is_production() {
        return ActionParameters::Stop;
    }
    if matches!((cpu, memory), (Some(c), Some(m)) if c < 0.20 && m < 0.30) {
        return ActionParameters::Rightsize {
            size_factor: size_factor(snapshot),
        };
    }

    let spot_score = vectors
        .iter()
        .find(|v| v.name == SPOT_ARBITRAGE && v.is_included())
        .map(|v| v.score)
        .unwrap_or(0.0);
    if let Some(quote) = spot.filter(|q| q.has_cheaper_zone()) {
        if spot_score >= 0.9 {
            return ActionParameters::MigrateZone {
                target_zone: quote.best_zone.clone(),
            };
        }
    }

    ActionParameters::Monitor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(cpu: f64, memory: f64) -> ResourceSnapshot {
        ResourceSnapshot::new("aws", "us-east-1", "vm-1", "vm")
            .with_utilisation(cpu, memory)
            .with_monthly_cost(100.0)
    }

    #[test]
    fn test_savings_bands() {
        let config = ScoringConfig::default();
        assert!((estimate_savings(&snapshot(0.10, 0.15), &config) - 60.0).abs() < 1e-9);
        assert!((estimate_savings(&snapshot(0.40, 0.50), &config) - 30.0).abs() < 1e-9);
        assert!((estimate_savings(&snapshot(0.90, 0.90), &config) - 10.0).abs() < 1e-9);

        let unknown = ResourceSnapshot::new("aws", "us-east-1", "vm-1", "vm").with_monthly_cost(100.0);
        assert!((estimate_savings(&unknown, &config) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_size_factor_is_clamped_and_stepped() {
        assert_eq!(size_factor(&snapshot(0.10, 0.15)), 0.25);
        assert_eq!(size_factor(&snapshot(0.33, 0.10)), 0.55);
        assert_eq!(size_factor(&snapshot(0.95, 0.10)), 1.0);
    }
}
