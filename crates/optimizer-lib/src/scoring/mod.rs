//! Scoring engine
//!
//! Turns a resource snapshot into an [`Opportunity`]:
//! 1. Four analysis vectors (rightsizing, spot arbitrage, scheduling, cost pattern)
//! 2. Weighted aggregate rescaled to a 0..10 risk score
//! 3. Learning adjustment from outcomes of similar resources
//! 4. Contextual additions for weekends and production workloads
//! 5. Savings estimate and a preliminary recommendation
//!
//! Scoring is deterministic: the scoring instant is an explicit input.

mod recommend;
pub mod vectors;

use crate::adapter::SpotQuote;
use crate::error::{Error, Result};
use crate::learning::OutcomeAggregate;
use crate::models::{AnalysisVector, Opportunity, ResourceSnapshot};
use chrono::{DateTime, Datelike, Utc, Weekday};
use serde::Deserialize;
use std::sync::Arc;

/// Tunable scoring constants
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub rightsizing_weight: f64,
    pub spot_weight: f64,
    pub scheduling_weight: f64,
    pub cost_weight: f64,
    /// Monthly cost above which the cost-pattern vector scores high
    pub cost_threshold: f64,
    /// Risk above which the recommendation is forced to `no-op`
    pub max_risk: f64,
    pub weekend_risk_bonus: f64,
    pub production_risk_bonus: f64,
    /// Risk removed per successful outcome of a similar resource
    pub success_risk_relief: f64,
    /// Risk added per failed outcome of a similar resource
    pub failure_risk_penalty: f64,
    pub savings_ratio_idle: f64,
    pub savings_ratio_underused: f64,
    pub savings_ratio_floor: f64,
    /// Minimum spot discount that counts as a cheaper zone
    pub spot_discount_threshold: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            rightsizing_weight: 0.30,
            spot_weight: 0.25,
            scheduling_weight: 0.20,
            cost_weight: 0.25,
            cost_threshold: 100.0,
            max_risk: 7.0,
            weekend_risk_bonus: 0.5,
            production_risk_bonus: 1.0,
            success_risk_relief: 0.5,
            failure_risk_penalty: 1.0,
            savings_ratio_idle: 0.60,
            savings_ratio_underused: 0.30,
            savings_ratio_floor: 0.10,
            spot_discount_threshold: 0.20,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = [
            self.rightsizing_weight,
            self.spot_weight,
            self.scheduling_weight,
            self.cost_weight,
        ];
        if weights.iter().any(|w| !(0.0..=1.0).contains(w)) {
            return Err(Error::Invalid("vector weights must be within 0..1".to_string()));
        }
        let ratios = [
            self.savings_ratio_idle,
            self.savings_ratio_underused,
            self.savings_ratio_floor,
        ];
        if ratios.iter().any(|r| !(0.0..=1.0).contains(r)) {
            return Err(Error::Invalid("savings ratios must be within 0..1".to_string()));
        }
        if self.cost_threshold < 0.0 || !(0.0..=10.0).contains(&self.max_risk) {
            return Err(Error::Invalid(
                "cost threshold must be non-negative and max risk within 0..10".to_string(),
            ));
        }
        Ok(())
    }
}

/// Everything scoring needs besides the snapshot
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    pub history: Option<&'a OutcomeAggregate>,
    pub spot: Option<&'a SpotQuote>,
    pub now: DateTime<Utc>,
}

impl<'a> ScoringContext<'a> {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            history: None,
            spot: None,
            now,
        }
    }

    pub fn with_history(mut self, history: &'a OutcomeAggregate) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_spot(mut self, spot: &'a SpotQuote) -> Self {
        self.spot = Some(spot);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(
        &self,
        snapshot: Arc<ResourceSnapshot>,
        context: ScoringContext<'_>,
    ) -> Result<Opportunity> {
        validate_snapshot(&snapshot)?;
        let config = &self.config;

        let vectors = vec![
            vectors::rightsizing(&snapshot, config),
            vectors::spot_arbitrage(&snapshot, context.spot, config),
            vectors::scheduling(&snapshot, config),
            vectors::cost_pattern(&snapshot, config),
        ];

        let base_risk = aggregate_risk(&vectors);
        let risk = match base_risk {
            Some(risk) => {
                let learned = (risk + self.learning_adjustment(context.history)).clamp(0.0, 10.0);
                (learned + self.contextual_addition(&snapshot, context.now)).clamp(0.0, 10.0)
            }
            None => 0.0,
        };

        let parameters = recommend::recommend(&snapshot, &vectors, risk, context.spot, config);
        let estimated_savings = recommend::estimate_savings(&snapshot, config);
        let confidence = aggregate_confidence(&vectors);

        Ok(Opportunity {
            snapshot,
            vectors,
            risk_score: risk,
            estimated_savings,
            parameters,
            confidence,
            model: None,
            reasoning: None,
        })
    }

    fn learning_adjustment(&self, history: Option<&OutcomeAggregate>) -> f64 {
        history.map_or(0.0, |h| {
            h.failure_count as f64 * self.config.failure_risk_penalty
                - h.success_count as f64 * self.config.success_risk_relief
        })
    }

    fn contextual_addition(&self, snapshot: &ResourceSnapshot, now: DateTime<Utc>) -> f64 {
        let mut addition = 0.0;
        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            addition += self.config.weekend_risk_bonus;
        }
        if snapshot.is_production() {
            addition += self.config.production_risk_bonus;
        }
        addition
    }
}

/// `(1 - weighted mean score) * 10` over included vectors; `None` with no weight
fn aggregate_risk(vectors: &[AnalysisVector]) -> Option<f64> {
    let (weighted, weight_sum) = vectors
        .iter()
        .filter(|v| v.is_included())
        .fold((0.0, 0.0), |(weighted, sum), v| {
            (weighted + v.score * v.weight, sum + v.weight)
        });
    (weight_sum > 0.0).then(|| ((1.0 - weighted / weight_sum) * 10.0).clamp(0.0, 10.0))
}

fn aggregate_confidence(vectors: &[AnalysisVector]) -> f64 {
    let (weighted, weight_sum) = vectors
        .iter()
        .filter(|v| v.is_included())
        .fold((0.0, 0.0), |(weighted, sum), v| {
            (weighted + v.confidence * v.weight, sum + v.weight)
        });
    if weight_sum > 0.0 {
        (weighted / weight_sum).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn validate_snapshot(snapshot: &ResourceSnapshot) -> Result<()> {
    let in_range = |value: Option<f64>| value.map_or(true, |v| (0.0..=1.0).contains(&v));
    if !in_range(snapshot.utilisation.cpu) || !in_range(snapshot.utilisation.memory) {
        return Err(Error::Invalid(format!(
            "utilisation of {} outside 0..1",
            snapshot.resource_id()
        )));
    }
    if !snapshot.monthly_cost.is_finite() || snapshot.monthly_cost < 0.0 {
        return Err(Error::Invalid(format!(
            "monthly cost of {} is not a non-negative number",
            snapshot.resource_id()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionKind, ActionParameters, ResourceState};
    use chrono::TimeZone;

    fn wednesday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap()
    }

    fn saturday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 6, 12, 0, 0).unwrap()
    }

    fn underutilised() -> Arc<ResourceSnapshot> {
        Arc::new(
            ResourceSnapshot::new("aws", "us-east-1", "vm-1", "vm")
                .with_utilisation(0.10, 0.15)
                .with_monthly_cost(100.0)
                .with_label("env", "staging"),
        )
    }

    fn busy_production() -> Arc<ResourceSnapshot> {
        Arc::new(
            ResourceSnapshot::new("aws", "us-east-1", "db-1", "vm")
                .with_utilisation(0.85, 0.82)
                .with_monthly_cost(500.0)
                .with_label("env", "production"),
        )
    }

    #[test]
    fn test_underutilised_instance_is_rightsized() {
        let engine = ScoringEngine::default();
        for now in [wednesday(), saturday()] {
            let opp = engine.score(underutilised(), ScoringContext::at(now)).unwrap();
            assert!(opp.risk_score <= 5.0, "risk {}", opp.risk_score);
            assert_eq!(opp.recommendation(), ActionKind::Rightsize);
            assert_eq!(opp.recommendation().recommendation_label(), "rightsize-smaller");
            assert!((opp.estimated_savings - 60.0).abs() < 1e-9);
        }
        let weekday = engine.score(underutilised(), ScoringContext::at(wednesday())).unwrap();
        assert!((weekday.risk_score - 3.9).abs() < 1e-9);
        assert_eq!(
            weekday.parameters,
            ActionParameters::Rightsize { size_factor: 0.25 }
        );
    }

    #[test]
    fn test_busy_production_is_no_op() {
        let engine = ScoringEngine::default();
        let opp = engine.score(busy_production(), ScoringContext::at(wednesday())).unwrap();
        assert!(opp.risk_score >= 7.0, "risk {}", opp.risk_score);
        assert_eq!(opp.recommendation(), ActionKind::NoOp);
    }

    #[test]
    fn test_weekend_adds_risk() {
        let engine = ScoringEngine::default();
        let weekday = engine.score(underutilised(), ScoringContext::at(wednesday())).unwrap();
        let weekend = engine.score(underutilised(), ScoringContext::at(saturday())).unwrap();
        assert!((weekend.risk_score - weekday.risk_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_learning_adjustment_is_bounded() {
        let engine = ScoringEngine::default();
        let successes = OutcomeAggregate {
            success_count: 20,
            failure_count: 0,
            last_outcome_at: None,
        };
        let opp = engine
            .score(underutilised(), ScoringContext::at(wednesday()).with_history(&successes))
            .unwrap();
        assert_eq!(opp.risk_score, 0.0);

        let failures = OutcomeAggregate {
            success_count: 1,
            failure_count: 2,
            last_outcome_at: None,
        };
        let opp = engine
            .score(underutilised(), ScoringContext::at(wednesday()).with_history(&failures))
            .unwrap();
        assert!((opp.risk_score - 5.4).abs() < 1e-9);
    }

    #[test]
    fn test_missing_utilisation_excludes_vectors() {
        let engine = ScoringEngine::default();
        let snapshot = Arc::new(
            ResourceSnapshot::new("aws", "us-east-1", "vm-1", "vm")
                .with_monthly_cost(50.0)
                .with_label("env", "dev"),
        );
        let opp = engine.score(snapshot, ScoringContext::at(wednesday())).unwrap();
        let excluded: Vec<_> = opp
            .vectors
            .iter()
            .filter(|v| !v.is_included())
            .map(|v| v.name.as_str())
            .collect();
        assert_eq!(excluded, vec![vectors::RIGHTSIZING, vectors::SPOT_ARBITRAGE]);
        // (0.6 * 0.2 + 0.3 * 0.25) / 0.45
        let expected = (1.0 - 0.195 / 0.45) * 10.0;
        assert!((opp.risk_score - expected).abs() < 1e-9);
        assert_eq!(opp.recommendation(), ActionKind::Monitor);
    }

    #[test]
    fn test_zero_weight_sum_is_monitor() {
        let engine = ScoringEngine::new(ScoringConfig {
            scheduling_weight: 0.0,
            cost_weight: 0.0,
            ..Default::default()
        });
        let snapshot = Arc::new(ResourceSnapshot::new("aws", "us-east-1", "vm-1", "vm"));
        let opp = engine.score(snapshot, ScoringContext::at(wednesday())).unwrap();
        assert_eq!(opp.risk_score, 0.0);
        assert_eq!(opp.recommendation(), ActionKind::Monitor);
    }

    #[test]
    fn test_stopped_resource_is_terminated() {
        let engine = ScoringEngine::default();
        let snapshot = Arc::new(
            ResourceSnapshot::new("aws", "us-east-1", "vm-9", "vm")
                .with_utilisation(0.0, 0.0)
                .with_monthly_cost(40.0)
                .with_state(ResourceState::Stopped)
                .with_label("env", "dev"),
        );
        let opp = engine.score(snapshot, ScoringContext::at(wednesday())).unwrap();
        assert_eq!(opp.recommendation(), ActionKind::Terminate);
    }

    #[test]
    fn test_cheaper_zone_suggests_migration() {
        let engine = ScoringEngine::default();
        let snapshot = Arc::new(
            ResourceSnapshot::new("aws", "us-east-1", "vm-2", "vm")
                .with_utilisation(0.45, 0.55)
                .with_monthly_cost(80.0)
                .with_label("env", "dev"),
        );
        let quote = SpotQuote {
            current_zone: "us-east-1a".into(),
            current_price: 0.10,
            best_zone: "us-east-1b".into(),
            best_price: 0.07,
        };
        let opp = engine
            .score(snapshot, ScoringContext::at(wednesday()).with_spot(&quote))
            .unwrap();
        assert_eq!(
            opp.parameters,
            ActionParameters::MigrateZone {
                target_zone: "us-east-1b".into()
            }
        );
    }

    #[test]
    fn test_out_of_range_input_is_invalid() {
        let engine = ScoringEngine::default();
        let snapshot = Arc::new(
            ResourceSnapshot::new("aws", "us-east-1", "vm-1", "vm").with_utilisation(1.5, 0.2),
        );
        let err = engine.score(snapshot, ScoringContext::at(wednesday())).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Invalid);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let engine = ScoringEngine::default();
        let a = engine.score(underutilised(), ScoringContext::at(saturday())).unwrap();
        let b = engine.score(underutilised(), ScoringContext::at(saturday())).unwrap();
        assert_eq!(a.risk_score, b.risk_score);
        assert_eq!(a.parameters, b.parameters);
        assert_eq!(a.vectors, b.vectors);
    }
}
