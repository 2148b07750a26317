//! Decision engines
//!
//! An engine turns a rendered opportunity prompt into a structured decision.
//! Engines are grouped into five tiers of increasing cost and capability;
//! tier 1 is the local heuristic, tiers 2-5 are network-hosted models.

mod heuristic;
mod http;

pub use heuristic::HeuristicEngine;
pub use http::{HttpDecisionEngine, HttpEngineConfig};

use crate::deadline::Deadline;
use crate::error::Result;
use crate::models::ActionKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Risk band selecting a decision engine, 1 (cheapest) to 5
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Tier(u8);

impl Tier {
    pub const HEURISTIC: Tier = Tier(1);
    pub const SMALL: Tier = Tier(2);
    pub const MEDIUM: Tier = Tier(3);
    pub const LARGE: Tier = Tier(4);
    pub const REASONING: Tier = Tier(5);

    pub const ALL: [Tier; 5] = [
        Tier::HEURISTIC,
        Tier::SMALL,
        Tier::MEDIUM,
        Tier::LARGE,
        Tier::REASONING,
    ];

    pub fn new(value: u8) -> Option<Self> {
        (1..=5).contains(&value).then_some(Tier(value))
    }

    pub fn get(&self) -> u8 {
        self.0
    }

    /// Zero-based position, for per-tier tables
    pub fn index(&self) -> usize {
        usize::from(self.0 - 1)
    }

    /// Next cheaper tier, `None` below tier 1
    pub fn lower(&self) -> Option<Tier> {
        Tier::new(self.0 - 1)
    }

    pub fn label(&self) -> &'static str {
        match self.0 {
            1 => "heuristic-local",
            2 => "network-hosted-small",
            3 => "network-hosted-medium",
            4 => "network-hosted-large",
            _ => "network-hosted-reasoning",
        }
    }

    /// Confidence assumed when an engine's answer does not state one
    pub fn default_confidence(&self) -> f64 {
        match self.0 {
            1 => 0.6,
            2 => 0.7,
            3 => 0.8,
            4 => 0.85,
            _ => 0.9,
        }
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        Tier::new(value).ok_or_else(|| format!("tier must be within 1..=5, got {value}"))
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> u8 {
        tier.0
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tier-{}", self.0)
    }
}

/// Input to a decision engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl DecisionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: 512,
            temperature: 0.2,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Rough token estimate: four characters per token plus the answer budget
    pub fn estimated_tokens(&self) -> u64 {
        (self.prompt.len() as u64).div_ceil(4) + u64::from(self.max_tokens)
    }
}

/// Structured answer of a decision engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub content: String,
    pub model: String,
    pub tier: Tier,
    pub tokens_used: u64,
    pub cost: f64,
    pub latency_ms: u64,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub alternatives: Vec<String>,
}

impl DecisionResponse {
    /// Action kind named on a `Decision:` line, if any
    pub fn verdict(&self) -> Option<ActionKind> {
        line_value(&self.content, "Decision:").and_then(|value| {
            let value = value.trim().to_ascii_lowercase();
            if value == ActionKind::Rightsize.recommendation_label() {
                Some(ActionKind::Rightsize)
            } else {
                value.parse().ok()
            }
        })
    }
}

/// Value after `prefix` on the first line that starts with it
pub(crate) fn line_value<'a>(content: &'a str, prefix: &str) -> Option<&'a str> {
    content
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix(prefix))
        .map(str::trim)
}

/// `Confidence: <float>` from engine output, clamped to 0..1
pub(crate) fn parse_confidence(content: &str) -> Option<f64> {
    line_value(content, "Confidence:")
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(0.0, 1.0))
}

/// Capability set every decision engine provides
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn analyse(&self, request: &DecisionRequest, deadline: &Deadline)
        -> Result<DecisionResponse>;

    /// Expected cost in USD of answering `request`
    fn estimated_cost(&self, request: &DecisionRequest) -> f64;

    fn model(&self) -> &str;

    fn tier(&self) -> Tier;

    async fn health_check(&self, deadline: &Deadline) -> Result<()>;
}
