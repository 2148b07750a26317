//! Local rule-based engine for the cheapest tier

use super::{line_value, DecisionEngine, DecisionRequest, DecisionResponse, Tier};
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::models::ActionKind;
use crate::router::prompt::{RECOMMENDATION_PREFIX, RISK_PREFIX};
use async_trait::async_trait;
use std::time::Instant;

const MODEL: &str = "heuristic-v1";

/// Risk at or above which the heuristic refuses to act
const VETO_RISK: f64 = 7.0;

/// Zero-cost engine that reads the scored opportunity back out of the prompt
#[derive(Debug, Clone, Default)]
pub struct HeuristicEngine;

impl HeuristicEngine {
    pub fn new() -> Self {
        Self
    }

    fn confidence_for(risk: f64) -> f64 {
        (0.95 - risk * 0.07).clamp(0.3, 0.95)
    }
}

#[async_trait]
impl DecisionEngine for HeuristicEngine {
    async fn analyse(
        &self,
        request: &DecisionRequest,
        deadline: &Deadline,
    ) -> Result<DecisionResponse> {
        deadline.check()?;
        let start = Instant::now();

        let risk = line_value(&request.prompt, RISK_PREFIX)
            .and_then(|v| v.parse::<f64>().ok())
            .ok_or_else(|| Error::Invalid("prompt carries no risk score".to_string()))?;
        let preliminary = line_value(&request.prompt, RECOMMENDATION_PREFIX)
            .unwrap_or(ActionKind::Monitor.as_str());

        let (decision, reasoning) = if risk >= VETO_RISK {
            (
                ActionKind::NoOp.recommendation_label(),
                format!("risk {risk:.2} is too high to act without review"),
            )
        } else {
            (
                preliminary,
                format!("risk {risk:.2} supports the preliminary recommendation"),
            )
        };
        let confidence = Self::confidence_for(risk);

        Ok(DecisionResponse {
            content: format!(
                "Decision: {decision}\nConfidence: {confidence:.2}\nReasoning: {reasoning}"
            ),
            model: MODEL.to_string(),
            tier: Tier::HEURISTIC,
            tokens_used: 0,
            cost: 0.0,
            latency_ms: start.elapsed().as_millis() as u64,
            confidence,
            reasoning: Some(reasoning),
            alternatives: Vec::new(),
        })
    }

    fn estimated_cost(&self, _request: &DecisionRequest) -> f64 {
        0.0
    }

    fn model(&self) -> &str {
        MODEL
    }

    fn tier(&self) -> Tier {
        Tier::HEURISTIC
    }

    async fn health_check(&self, _deadline: &Deadline) -> Result<()> {
        Ok(())
    }
}
