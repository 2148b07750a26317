//! The four analysis vectors
//!
//! Each vector scores opportunity strength in 0..1: higher means a safer,
//! more rewarding optimisation.

use super::ScoringConfig;
use crate::adapter::SpotQuote;
use crate::models::{AnalysisVector, ResourceSnapshot, ResourceState};

pub const RIGHTSIZING: &str = "rightsizing";
pub const SPOT_ARBITRAGE: &str = "spot-arbitrage";
pub const SCHEDULING: &str = "scheduling";
pub const COST_PATTERN: &str = "cost-pattern";

const COMPUTE_KINDS: &[&str] = &["vm", "ec2", "instance", "compute"];

pub(crate) fn is_compute(kind: &str) -> bool {
    COMPUTE_KINDS.iter().any(|k| kind.eq_ignore_ascii_case(k))
}

fn excluded(name: &str, weight: f64, reason: &str) -> AnalysisVector {
    AnalysisVector {
        name: name.to_string(),
        score: 0.0,
        weight,
        confidence: 0.0,
        findings: vec![reason.to_string()],
    }
}

pub(crate) fn rightsizing(snapshot: &ResourceSnapshot, config: &ScoringConfig) -> AnalysisVector {
    let cpu = snapshot.utilisation.cpu;
    let memory = snapshot.utilisation.memory;
    let mut findings = Vec::new();

    let cpu_part = cpu.map(|cpu| {
        if cpu < 0.20 {
            findings.push(format!("CPU utilisation {:.0}% is low", cpu * 100.0));
            0.8
        } else if cpu > 0.80 {
            findings.push(format!("CPU utilisation {:.0}% is high", cpu * 100.0));
            0.2
        } else {
            0.5
        }
    });
    let memory_part = memory.and_then(|memory| {
        if memory < 0.30 {
            findings.push(format!("memory utilisation {:.0}% is low", memory * 100.0));
            Some(0.8)
        } else if memory > 0.90 {
            findings.push(format!("memory utilisation {:.0}% is high", memory * 100.0));
            Some(0.1)
        } else {
            None
        }
    });

    let (score, confidence) = match (cpu_part, memory_part) {
        (None, None) if memory.is_none() => {
            return excluded(RIGHTSIZING, config.rightsizing_weight, "no utilisation data");
        }
        (Some(c), Some(m)) => ((c + m) / 2.0, 0.7),
        (Some(c), None) if memory.is_some() => (c, 0.7),
        (Some(c), None) => (c, 0.5),
        (None, Some(m)) => (m, 0.5),
        (None, None) => (0.5, 0.5),
    };

    AnalysisVector {
        name: RIGHTSIZING.to_string(),
        score,
        weight: config.rightsizing_weight,
        confidence,
        findings,
    }
}

pub(crate) fn spot_arbitrage(
    snapshot: &ResourceSnapshot,
    spot: Option<&SpotQuote>,
    config: &ScoringConfig,
) -> AnalysisVector {
    let weight = config.spot_weight;
    let Some(cpu) = snapshot.utilisation.cpu else {
        return excluded(SPOT_ARBITRAGE, weight, "no CPU data");
    };

    let eligible = is_compute(snapshot.kind())
        && snapshot.state == ResourceState::Running
        && cpu < 0.70;
    if !eligible {
        return AnalysisVector {
            name: SPOT_ARBITRAGE.to_string(),
            score: 0.2,
            weight,
            confidence: 0.8,
            findings: vec!["workload is not a spot candidate".to_string()],
        };
    }

    match spot.filter(|q| q.has_cheaper_zone() && q.discount() >= config.spot_discount_threshold) {
        Some(quote) => AnalysisVector {
            name: SPOT_ARBITRAGE.to_string(),
            score: 0.9,
            weight,
            confidence: 0.8,
            findings: vec![format!(
                "{} is {:.0}% cheaper than {}",
                quote.best_zone,
                quote.discount() * 100.0,
                quote.current_zone
            )],
        },
        None => AnalysisVector {
            name: SPOT_ARBITRAGE.to_string(),
            score: 0.7,
            weight,
            confidence: 0.6,
            findings: vec!["interruptible capacity fits this workload".to_string()],
        },
    }
}

pub(crate) fn scheduling(snapshot: &ResourceSnapshot, config: &ScoringConfig) -> AnalysisVector {
    let (score, confidence, finding) = match snapshot.environment() {
        Some(_) if snapshot.is_production() => (0.1, 0.9, "production workload".to_string()),
        Some(env) => (0.6, 0.5, format!("{env} workload can follow a schedule")),
        None => (0.3, 0.3, "no environment label".to_string()),
    };
    AnalysisVector {
        name: SCHEDULING.to_string(),
        score,
        weight: config.scheduling_weight,
        confidence,
        findings: vec![finding],
    }
}

pub(crate) fn cost_pattern(snapshot: &ResourceSnapshot, config: &ScoringConfig) -> AnalysisVector {
    let (score, finding) = if snapshot.monthly_cost > config.cost_threshold {
        (
            0.6,
            format!(
                "monthly cost {:.2} exceeds {:.2}",
                snapshot.monthly_cost, config.cost_threshold
            ),
        )
    } else {
        (0.3, format!("monthly cost {:.2}", snapshot.monthly_cost))
    };
    AnalysisVector {
        name: COST_PATTERN.to_string(),
        score,
        weight: config.cost_weight,
        confidence: 0.4,
        findings: vec![finding],
    }
}
