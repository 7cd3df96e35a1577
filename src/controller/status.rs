//! Status aggregation
//!
//! Builds the policy status from the endpoint outcomes of one pass, or from a
//! validation failure. Conditions are merged into the previous status so an
//! unchanged `Ready` value keeps its transition time.

use kube::ResourceExt;

use super::converge::EndpointOutcome;
use crate::compiler::ChildKind;
use crate::crd::{
    Condition, ConditionStatus, EndpointPolicy, EndpointPolicyStatus, EndpointStatus,
    ValidationErrors, READY_CONDITION, REASON_ALL_READY, REASON_NOT_READY,
    REASON_VALIDATION_FAILED,
};

/// Per-endpoint status line for one outcome
pub fn endpoint_status(outcome: &EndpointOutcome) -> EndpointStatus {
    let name = |kind| outcome.child_name(kind).unwrap_or_default().to_string();
    let route_name = outcome
        .child_name(ChildKind::HttpRoute)
        .or_else(|| outcome.child_name(ChildKind::GrpcRoute))
        .unwrap_or_default()
        .to_string();

    EndpointStatus {
        id: outcome.endpoint_id().to_string(),
        ready: outcome.is_ready(),
        deployment_name: name(ChildKind::Deployment),
        service_name: name(ChildKind::Service),
        route_name,
        message: outcome.message().unwrap_or_default(),
    }
}

fn previous_status(policy: &EndpointPolicy) -> EndpointPolicyStatus {
    policy.status.clone().unwrap_or_default()
}

/// Status after a full pass
pub fn aggregate_status(policy: &EndpointPolicy, outcomes: &[EndpointOutcome]) -> EndpointPolicyStatus {
    let total = policy.spec.endpoints.len();
    let endpoint_statuses: Vec<EndpointStatus> = outcomes.iter().map(endpoint_status).collect();
    let ready = endpoint_statuses.iter().filter(|s| s.ready).count();

    let condition = if ready == total {
        Condition::new(
            READY_CONDITION,
            ConditionStatus::True,
            REASON_ALL_READY,
            format!("All {total} endpoints ready"),
        )
    } else {
        Condition::new(
            READY_CONDITION,
            ConditionStatus::False,
            REASON_NOT_READY,
            format!("{ready}/{total} endpoints ready"),
        )
    };

    EndpointPolicyStatus {
        endpoint_count: total,
        observed_generation: policy.metadata.generation,
        endpoint_statuses,
        ..previous_status(policy)
    }
    .condition(condition.with_generation(policy.metadata.generation))
}

/// Status after the spec failed validation
///
/// Only the `Ready` condition changes; endpoint statuses from the last
/// successful pass stay visible.
pub fn validation_failed_status(policy: &EndpointPolicy, errors: &ValidationErrors) -> EndpointPolicyStatus {
    let condition = Condition::new(
        READY_CONDITION,
        ConditionStatus::False,
        REASON_VALIDATION_FAILED,
        errors.to_string(),
    )
    .with_generation(policy.metadata.generation);

    tracing::debug!(policy = %policy.name_any(), errors = errors.len(), "recording validation failure");
    previous_status(policy).condition(condition)
}
