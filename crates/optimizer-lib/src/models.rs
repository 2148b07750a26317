//! Core data models for the optimizer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Error;
use crate::ledger::fingerprint;

/// Current version of the structured action payload schema
pub const PAYLOAD_VERSION: u32 = 1;

/// Label keys that carry the deployment environment of a resource
const ENVIRONMENT_LABELS: &[&str] = &["env", "environment"];

/// Identity of a cloud resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub provider: String,
    pub region: String,
    pub resource_id: String,
    pub kind: String,
}

/// Observed utilisation as fractions in 0..1; `None` when the adapter had no data
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Utilisation {
    pub cpu: Option<f64>,
    pub memory: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    Running,
    Stopped,
    Other,
}

/// Latest observed state of a cloud resource, replaced wholesale on each scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub identity: ResourceIdentity,
    pub utilisation: Utilisation,
    pub monthly_cost: f64,
    pub state: ResourceState,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub observed_at: DateTime<Utc>,
}

impl ResourceSnapshot {
    /// Create a running snapshot with no utilisation data and zero cost
    pub fn new(
        provider: impl Into<String>,
        region: impl Into<String>,
        resource_id: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            identity: ResourceIdentity {
                provider: provider.into(),
                region: region.into(),
                resource_id: resource_id.into(),
                kind: kind.into(),
            },
            utilisation: Utilisation::default(),
            monthly_cost: 0.0,
            state: ResourceState::Running,
            labels: BTreeMap::new(),
            observed_at: Utc::now(),
        }
    }

    pub fn with_utilisation(mut self, cpu: f64, memory: f64) -> Self {
        self.utilisation = Utilisation {
            cpu: Some(cpu),
            memory: Some(memory),
        };
        self
    }

    pub fn with_monthly_cost(mut self, cost: f64) -> Self {
        self.monthly_cost = cost;
        self
    }

    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.state = state;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn resource_id(&self) -> &str {
        &self.identity.resource_id
    }

    pub fn kind(&self) -> &str {
        &self.identity.kind
    }

    /// Value of the `env`/`environment` label, if any
    pub fn environment(&self) -> Option<&str> {
        ENVIRONMENT_LABELS
            .iter()
            .find_map(|key| self.labels.get(*key))
            .map(String::as_str)
    }

    pub fn is_production(&self) -> bool {
        matches!(
            self.environment().map(str::to_ascii_lowercase).as_deref(),
            Some("production") | Some("prod")
        )
    }
}

/// Remediation kinds the optimizer can stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Rightsize,
    MigrateZone,
    Stop,
    Terminate,
    Monitor,
    NoOp,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Rightsize => "rightsize",
            ActionKind::MigrateZone => "migrate-zone",
            ActionKind::Stop => "stop",
            ActionKind::Terminate => "terminate",
            ActionKind::Monitor => "monitor",
            ActionKind::NoOp => "no-op",
        }
    }

    /// Human-facing recommendation label
    pub fn recommendation_label(&self) -> &'static str {
        match self {
            ActionKind::Rightsize => "rightsize-smaller",
            other => other.as_str(),
        }
    }

    /// Whether this kind changes anything in the cloud
    pub fn is_actionable(&self) -> bool {
        !matches!(self, ActionKind::Monitor | ActionKind::NoOp)
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rightsize" => Ok(ActionKind::Rightsize),
            "migrate-zone" => Ok(ActionKind::MigrateZone),
            "stop" => Ok(ActionKind::Stop),
            "terminate" => Ok(ActionKind::Terminate),
            "monitor" => Ok(ActionKind::Monitor),
            "no-op" => Ok(ActionKind::NoOp),
            other => Err(Error::Invalid(format!("unknown action kind: {other}"))),
        }
    }
}

/// Lifecycle of a staged action
///
/// Transitions form a DAG: pending -> in-progress -> {completed | failed},
/// pending -> skipped. Nothing moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl ActionStatus {
    pub const ALL: [ActionStatus; 5] = [
        ActionStatus::Pending,
        ActionStatus::InProgress,
        ActionStatus::Completed,
        ActionStatus::Failed,
        ActionStatus::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::InProgress => "in-progress",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Completed | ActionStatus::Failed | ActionStatus::Skipped
        )
    }

    pub fn can_transition_to(&self, next: ActionStatus) -> bool {
        matches!(
            (self, next),
            (ActionStatus::Pending, ActionStatus::InProgress)
                | (ActionStatus::Pending, ActionStatus::Skipped)
                | (ActionStatus::InProgress, ActionStatus::Completed)
                | (ActionStatus::InProgress, ActionStatus::Failed)
        )
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Invalid(format!("unknown action status: {s}")))
    }
}

/// Kind-specific structured parameters of a recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ActionParameters {
    Rightsize { size_factor: f64 },
    MigrateZone { target_zone: String },
    Stop,
    Terminate,
    Monitor,
    NoOp,
}

impl ActionParameters {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionParameters::Rightsize { .. } => ActionKind::Rightsize,
            ActionParameters::MigrateZone { .. } => ActionKind::MigrateZone,
            ActionParameters::Stop => ActionKind::Stop,
            ActionParameters::Terminate => ActionKind::Terminate,
            ActionParameters::Monitor => ActionKind::Monitor,
            ActionParameters::NoOp => ActionKind::NoOp,
        }
    }
}

/// Versioned action payload; free text only lives in `reasoning`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    pub version: u32,
    pub kind: ActionKind,
    pub recommendation: String,
    pub parameters: ActionParameters,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ActionPayload {
    pub fn new(parameters: ActionParameters, confidence: f64) -> Self {
        let kind = parameters.kind();
        Self {
            version: PAYLOAD_VERSION,
            kind,
            recommendation: kind.recommendation_label().to_string(),
            parameters,
            confidence,
            model: None,
            reasoning: None,
        }
    }
}

/// One dimension of the multi-vector analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisVector {
    pub name: String,
    pub score: f64,
    pub weight: f64,
    pub confidence: f64,
    pub findings: Vec<String>,
}

impl AnalysisVector {
    /// Vectors with zero confidence carry no usable signal
    pub fn is_included(&self) -> bool {
        self.confidence > 0.0
    }
}

/// Scored optimisation candidate; derived in memory, never persisted
#[derive(Debug, Clone)]
pub struct Opportunity {
    pub snapshot: Arc<ResourceSnapshot>,
    pub vectors: Vec<AnalysisVector>,
    pub risk_score: f64,
    pub estimated_savings: f64,
    pub parameters: ActionParameters,
    pub confidence: f64,
    /// Model that produced the routed decision, if the router was consulted
    pub model: Option<String>,
    pub reasoning: Option<String>,
}

impl Opportunity {
    pub fn recommendation(&self) -> ActionKind {
        self.parameters.kind()
    }

    pub fn resource_id(&self) -> &str {
        self.snapshot.resource_id()
    }

    pub fn payload(&self) -> ActionPayload {
        let mut payload = ActionPayload::new(self.parameters.clone(), self.confidence);
        payload.model = self.model.clone();
        payload.reasoning = self.reasoning.clone();
        payload
    }
}

/// Input for staging a new action
#[derive(Debug, Clone)]
pub struct NewAction {
    pub resource_id: String,
    pub payload: ActionPayload,
    pub risk_score: f64,
    pub estimated_savings: f64,
}

impl NewAction {
    pub fn from_opportunity(opportunity: &Opportunity) -> Self {
        Self {
            resource_id: opportunity.resource_id().to_string(),
            payload: opportunity.payload(),
            risk_score: opportunity.risk_score,
            estimated_savings: opportunity.estimated_savings,
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.payload.kind
    }

    pub fn fingerprint(&self) -> String {
        fingerprint::compute(&self.resource_id, &self.payload)
    }
}

/// Persisted unit of remediation work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub fingerprint: String,
    pub resource_id: String,
    pub kind: ActionKind,
    pub payload: ActionPayload,
    pub risk_score: f64,
    pub estimated_savings: f64,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Action {
    /// Build the pending row for a new action
    pub fn pending(new: NewAction, created_at: DateTime<Utc>) -> Self {
        let fingerprint = new.fingerprint();
        Self {
            id: fingerprint::action_id(&fingerprint),
            fingerprint,
            resource_id: new.resource_id,
            kind: new.payload.kind,
            payload: new.payload,
            risk_score: new.risk_score,
            estimated_savings: new.estimated_savings,
            status: ActionStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }

    /// Re-key a pending row as the `attempt`-th try of its fingerprint
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.id = fingerprint::attempt_id(&self.fingerprint, attempt);
        self
    }
}

/// Savings attributed to a completed action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavingsEvent {
    pub action_id: String,
    pub resource_id: String,
    pub kind: ActionKind,
    pub estimated: f64,
    pub actual: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Learning record for one executed action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub action_id: String,
    pub resource_id: String,
    pub kind: ActionKind,
    pub risk_score: f64,
    pub actual_savings: f64,
    pub success: bool,
    pub created_at: DateTime<Utc>,
}
