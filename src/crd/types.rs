//! Status types shared by the EndpointPolicy CRD

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reported on every EndpointPolicy
pub const READY_CONDITION: &str = "Ready";

/// Reason when every endpoint converged
pub const REASON_ALL_READY: &str = "AllEndpointsReady";

/// Reason when at least one endpoint failed
pub const REASON_NOT_READY: &str = "EndpointsNotReady";

/// Reason when the spec was rejected before any child was touched
pub const REASON_VALIDATION_FAILED: &str = "ValidationFailed";

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Generation of the spec the condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the condition status changed
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation: None,
            last_transition_time: Utc::now(),
        }
    }

    /// Record the spec generation this condition describes
    pub fn with_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }
}

/// Insert or replace a condition by type
///
/// The previous `lastTransitionTime` is kept when the status did not change,
/// so re-reporting an unchanged condition does not look like a transition.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
        }
        None => conditions.push(condition),
    }
}

/// Outcome of the last convergence pass for one endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    /// Endpoint id from the spec
    pub id: String,

    /// True when every child of the endpoint converged
    pub ready: bool,

    /// Name of the endpoint Deployment
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deployment_name: String,

    /// Name of the endpoint Service
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,

    /// Name of the endpoint route
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub route_name: String,

    /// Failure detail when not ready
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}
