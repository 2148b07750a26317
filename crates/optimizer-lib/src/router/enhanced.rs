//! Post-processing wrapper around the core router
//!
//! Engines answer in loosely structured text. `EnhancedRouter` runs the core
//! router unchanged and then normalises the answer: confidence clamped to
//! 0..1, a `Reasoning:` section lifted into `reasoning`, and `Alternative:`
//! lines collected into `alternatives`.

use super::{DecisionRouter, OpportunityRouter, RoutedDecision};
use crate::deadline::Deadline;
use crate::engine::DecisionResponse;
use crate::error::Result;
use crate::models::Opportunity;
use async_trait::async_trait;

const REASONING_PREFIX: &str = "Reasoning:";
const ALTERNATIVE_PREFIX: &str = "Alternative:";

/// Lines that end a multi-line reasoning section
const SECTION_PREFIXES: &[&str] = &["Decision:", "Confidence:", ALTERNATIVE_PREFIX];

pub struct EnhancedRouter {
    inner: DecisionRouter,
}

impl EnhancedRouter {
    pub fn new(inner: DecisionRouter) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &DecisionRouter {
        &self.inner
    }

    pub async fn route(&self, prompt: &str, risk: f64, deadline: &Deadline) -> Result<RoutedDecision> {
        let mut routed = self.inner.route(prompt, risk, deadline).await?;
        routed.response = post_process(routed.response);
        Ok(routed)
    }
}

#[async_trait]
impl OpportunityRouter for EnhancedRouter {
    async fn decide(
        &self,
        opportunity: &Opportunity,
        deadline: &Deadline,
    ) -> Result<RoutedDecision> {
        let mut routed = self.inner.route_opportunity(opportunity, deadline).await?;
        routed.response = post_process(routed.response);
        Ok(routed)
    }
}

pub fn post_process(mut response: DecisionResponse) -> DecisionResponse {
    response.confidence = if response.confidence.is_finite() {
        response.confidence.clamp(0.0, 1.0)
    } else {
        response.tier.default_confidence()
    };

    if response.reasoning.as_deref().map_or(true, |r| r.trim().is_empty()) {
        response.reasoning = reasoning_section(&response.content);
    }

    if response.alternatives.is_empty() {
        response.alternatives = response
            .content
            .lines()
            .filter_map(|line| line.trim().strip_prefix(ALTERNATIVE_PREFIX))
            .map(str::trim)
            .filter(|alt| !alt.is_empty())
            .map(str::to_string)
            .collect();
    }

    response
}

/// Text after `Reasoning:` up to the next recognised section line
fn reasoning_section(content: &str) -> Option<String> {
    let mut lines = content.lines().map(str::trim);
    let first = lines.find_map(|line| line.strip_prefix(REASONING_PREFIX))?;

    let mut section = vec![first.trim()];
    section.extend(
        lines
            .take_while(|line| !SECTION_PREFIXES.iter().any(|p| line.starts_with(p)))
            .filter(|line| !line.is_empty()),
    );
    let text = section
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}
