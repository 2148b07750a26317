//! Deterministic prompt rendering for opportunities
//!
//! The rendered text is the cache key input, so it never includes
//! timestamps or anything else that varies between scans of an unchanged
//! resource.

use crate::models::Opportunity;
use std::fmt::Write;

pub const RISK_PREFIX: &str = "Risk score:";
pub const RECOMMENDATION_PREFIX: &str = "Preliminary recommendation:";

const INSTRUCTIONS: &str = "Review the preliminary recommendation. Answer with a `Decision:` \
line, a `Confidence:` line between 0 and 1, a `Reasoning:` line and optional `Alternative:` \
lines.";

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| format!("{:.1}%", v * 100.0))
}

pub fn render(opportunity: &Opportunity) -> String {
    let snapshot = &opportunity.snapshot;
    let identity = &snapshot.identity;
    let mut out = String::new();

    // Writing into a String cannot fail
    let _ = writeln!(
        out,
        "Resource: {}/{}/{} ({})",
        identity.provider, identity.region, identity.resource_id, identity.kind
    );
    let _ = writeln!(out, "State: {:?}", snapshot.state);
    let _ = writeln!(
        out,
        "Environment: {}",
        snapshot.environment().unwrap_or("unlabelled")
    );
    let _ = writeln!(out, "CPU utilisation: {}", percent(snapshot.utilisation.cpu));
    let _ = writeln!(
        out,
        "Memory utilisation: {}",
        percent(snapshot.utilisation.memory)
    );
    let _ = writeln!(out, "Monthly cost: {:.2}", snapshot.monthly_cost);
    let _ = writeln!(out, "{RISK_PREFIX} {:.2}", opportunity.risk_score);
    let _ = writeln!(out, "Estimated savings: {:.2}", opportunity.estimated_savings);
    let _ = writeln!(
        out,
        "{RECOMMENDATION_PREFIX} {}",
        opportunity.recommendation().recommendation_label()
    );
    if let Ok(parameters) = serde_json::to_string(&opportunity.parameters) {
        let _ = writeln!(out, "Parameters: {parameters}");
    }

    let _ = writeln!(out, "Analysis vectors:");
    for vector in &opportunity.vectors {
        let _ = write!(
            out,
            "- {}: score {:.2}, weight {:.2}, confidence {:.2}",
            vector.name, vector.score, vector.weight, vector.confidence
        );
        if !vector.findings.is_empty() {
            let _ = write!(out, "; {}", vector.findings.join("; "));
        }
        out.push('\n');
    }

    out.push_str(INSTRUCTIONS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceSnapshot;
    use crate::scoring::{ScoringContext, ScoringEngine};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn opportunity(observed_offset_secs: i64) -> Opportunity {
        let mut snapshot = ResourceSnapshot::new("aws", "us-east-1", "vm-1", "vm")
            .with_utilisation(0.10, 0.15)
            .with_monthly_cost(100.0)
            .with_label("env", "staging");
        snapshot.observed_at = Utc.timestamp_opt(1_700_000_000 + observed_offset_secs, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap();
        ScoringEngine::default()
            .score(Arc::new(snapshot), ScoringContext::at(now))
            .unwrap()
    }

    #[test]
    fn test_prompt_ignores_observation_time() {
        assert_eq!(render(&opportunity(0)), render(&opportunity(3600)));
    }

    #[test]
    fn test_prompt_carries_risk_and_recommendation() {
        let prompt = render(&opportunity(0));
        assert!(prompt.contains("Risk score: 3.90"));
        assert!(prompt.contains("Preliminary recommendation: rightsize-smaller"));
        assert!(prompt.contains("- rightsizing: score 0.80"));
        assert!(prompt.contains("Environment: staging"));
    }
}
