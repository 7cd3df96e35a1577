//! Converger: drives each endpoint's children toward their desired state
//!
//! A child is fetched by name, created when absent, and replaced when its
//! labels or spec drifted. Every write records the spec it was built from in
//! [`LAST_APPLIED_ANNOTATION`]; a child whose record differs from the desired
//! spec is replaced even if the live spec still covers the desired one, so
//! fields dropped from the policy are dropped from the child. Endpoints are
//! independent: a failure is recorded on the endpoint's outcome and the pass
//! moves on. Garbage collection reads the outcomes directly; a failed endpoint
//! keeps every child it already had.

use std::collections::BTreeSet;

use kube::api::DynamicObject;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::Context;
use crate::compiler::{BuildContext, ChildKind, CompiledEndpoint, DesiredChild, EndpointCompiler};
use crate::crd::quantity::same_quantity;
use crate::crd::{EndpointSpec, RoutingStrategy};
use crate::error::BuildError;
use crate::labels::{main_service_name, ChildRef, OwnedChildren};
use crate::retry::retry_if;
use crate::Error;

/// Deployment spec field left to the autoscaler when one is attached
const AUTOSCALED_FIELDS: &[&str] = &["replicas"];

/// Annotation holding the desired spec a child was last written with
pub const LAST_APPLIED_ANNOTATION: &str = "endpointscaler.io/last-applied-spec";

/// Key under which every string value is a resource quantity
const QUANTITY_SCOPE: &str = "resources";

/// Step of an endpoint's convergence, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Deployment
    Workload,
    /// Endpoint Service
    Service,
    /// HTTPRoute / GRPCRoute, including the canary main-service check
    Route,
    /// HorizontalPodAutoscaler
    Autoscaler,
}

impl Stage {
    /// Prefix used in the endpoint status message
    pub fn label(self) -> &'static str {
        match self {
            Self::Workload => "Deployment",
            Self::Service => "Service",
            Self::Route => "Route",
            Self::Autoscaler => "HPA",
        }
    }

    /// Error type reported to the metrics sink
    pub fn error_type(self) -> &'static str {
        match self {
            Self::Workload => "deployment",
            Self::Service => "service",
            Self::Route => "route",
            Self::Autoscaler => "hpa",
        }
    }
}

/// What converging one child did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildAction {
    /// The child did not exist and was created
    Created,
    /// The child drifted and was replaced
    Updated,
    /// The child already matched
    Unchanged,
}

/// Result of converging one endpoint
#[derive(Clone, Debug, PartialEq)]
pub enum EndpointOutcome {
    /// Every child converged
    Converged {
        /// Endpoint id
        endpoint_id: String,
        /// Desired children, in convergence order
        children: Vec<ChildRef>,
    },
    /// A stage failed; later stages were not attempted
    Failed {
        /// Endpoint id
        endpoint_id: String,
        /// Stage that failed
        stage: Stage,
        /// Error text
        reason: String,
        /// Children converged before the failure
        converged: Vec<ChildRef>,
    },
}

impl EndpointOutcome {
    /// Endpoint id
    pub fn endpoint_id(&self) -> &str {
        match self {
            Self::Converged { endpoint_id, .. } | Self::Failed { endpoint_id, .. } => endpoint_id,
        }
    }

    /// True when every stage succeeded
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Converged { .. })
    }

    /// Children converged in this pass
    pub fn children(&self) -> &[ChildRef] {
        match self {
            Self::Converged { children, .. } => children,
            Self::Failed { converged, .. } => converged,
        }
    }

    /// Status message, set only for a failed endpoint
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Converged { .. } => None,
            Self::Failed { stage, reason, .. } => Some(format!("{} error: {reason}", stage.label())),
        }
    }

    /// Name of the first converged child of `kind`
    pub fn child_name(&self, kind: ChildKind) -> Option<&str> {
        self.children()
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.name.as_str())
    }

    fn failed(endpoint_id: &str, stage: Stage, err: Error, converged: Vec<ChildRef>) -> Self {
        Self::Failed {
            endpoint_id: endpoint_id.to_string(),
            stage,
            reason: err.to_string(),
            converged,
        }
    }
}

/// True when every field of `desired` is present and equal in `actual`
///
/// Objects match key by key, arrays element by element with equal length.
/// Extra fields in `actual` (server defaults) are ignored. Strings under a
/// `resources` key are compared as quantities.
fn contains(actual: &Value, desired: &Value) -> bool {
    contains_scoped(actual, desired, false)
}

fn contains_scoped(actual: &Value, desired: &Value, quantities: bool) -> bool {
    match (actual, desired) {
        (Value::Object(actual), Value::Object(desired)) => desired.iter().all(|(k, v)| {
            actual
                .get(k)
                .is_some_and(|a| contains_scoped(a, v, quantities || k == QUANTITY_SCOPE))
        }),
        (Value::Array(actual), Value::Array(desired)) => {
            actual.len() == desired.len()
                && actual
                    .iter()
                    .zip(desired)
                    .all(|(a, d)| contains_scoped(a, d, quantities))
        }
        (Value::String(actual), Value::String(desired)) if quantities => {
            same_quantity(actual, desired)
        }
        _ => actual == desired,
    }
}

fn last_applied(object: &DynamicObject) -> Option<&str> {
    object
        .metadata
        .annotations
        .as_ref()?
        .get(LAST_APPLIED_ANNOTATION)
        .map(String::as_str)
}

/// `desired` annotated with its own spec, as written on create and replace
fn stamp_last_applied(desired: &DynamicObject) -> Result<DynamicObject, Error> {
    let spec = desired.data.get("spec").cloned().unwrap_or(Value::Null);
    let mut stamped = desired.clone();
    stamped
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(LAST_APPLIED_ANNOTATION.to_string(), serde_json::to_string(&spec)?);
    Ok(stamped)
}

/// Desired spec with the preserved fields carried over from `existing`
fn merged_spec(existing: &DynamicObject, desired: &DynamicObject, preserved: &[&str]) -> Value {
    let mut spec = desired.data.get("spec").cloned().unwrap_or(Value::Null);
    if let (Some(current), Value::Object(target)) = (existing.data.get("spec"), &mut spec) {
        for field in preserved {
            if let Some(value) = current.get(*field) {
                target.insert((*field).to_string(), value.clone());
            }
        }
    }
    spec
}

fn owners_present(existing: &DynamicObject, desired: &DynamicObject) -> bool {
    let Some(wanted) = &desired.metadata.owner_references else {
        return true;
    };
    let current = existing.metadata.owner_references.as_deref().unwrap_or_default();
    wanted
        .iter()
        .all(|w| current.iter().any(|c| c.uid == w.uid && c.controller == w.controller))
}

/// True when `existing` already carries the desired labels, owner and spec
///
/// The live spec must cover the desired one and the spec recorded at the
/// last write must equal the desired one; the second check catches fields
/// that were removed from the desired spec.
pub fn spec_converged(existing: &DynamicObject, desired: &DynamicObject, preserved: &[&str]) -> bool {
    existing.metadata.labels == desired.metadata.labels
        && owners_present(existing, desired)
        && last_applied(existing) == last_applied(desired)
        && existing
            .data
            .get("spec")
            .is_some_and(|spec| contains(spec, &merged_spec(existing, desired, preserved)))
}

/// `existing` with desired labels and owner, and its spec replaced wholesale
fn apply_desired(existing: &DynamicObject, desired: &DynamicObject, preserved: &[&str]) -> DynamicObject {
    let mut updated = existing.clone();
    updated.metadata.labels = desired.metadata.labels.clone();
    if desired.metadata.owner_references.is_some() {
        updated.metadata.owner_references = desired.metadata.owner_references.clone();
    }
    if let Some(annotations) = &desired.metadata.annotations {
        updated
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .extend(annotations.clone());
    }
    let spec = merged_spec(existing, desired, preserved);
    match &mut updated.data {
        Value::Object(data) => {
            data.insert("spec".to_string(), spec);
        }
        other => *other = serde_json::json!({ "spec": spec }),
    }
    updated
}

/// Converge one child, re-fetching and retrying on write conflicts
pub(crate) async fn converge_child(
    ctx: &Context,
    namespace: &str,
    desired: &DesiredChild,
    preserved: &[&str],
) -> Result<ChildAction, Error> {
    let kind = desired.kind;
    let name = desired.name.as_str();
    let operation = format!("converge {kind} {namespace}/{name}");
    let object = &stamp_last_applied(&desired.object)?;

    retry_if(&ctx.config.conflict_retry, &operation, Error::is_conflict, || async move {
        match ctx.kube.get(kind, namespace, name).await? {
            None => {
                info!(%kind, name, "creating child");
                ctx.kube.create(kind, namespace, object).await?;
                Ok(ChildAction::Created)
            }
            Some(existing) if spec_converged(&existing, object, preserved) => {
                debug!(%kind, name, "child up to date");
                Ok(ChildAction::Unchanged)
            }
            Some(existing) => {
                info!(%kind, name, "updating child");
                let updated = apply_desired(&existing, object, preserved);
                ctx.kube.replace(kind, namespace, &updated).await?;
                Ok(ChildAction::Updated)
            }
        }
    })
    .await
}

async fn converge_stage(
    ctx: &Context,
    namespace: &str,
    child: Result<DesiredChild, Error>,
    preserved: &[&str],
) -> Result<ChildRef, Error> {
    let child = child?;
    converge_child(ctx, namespace, &child, preserved).await?;
    Ok(ChildRef {
        kind: child.kind,
        name: child.name,
    })
}

/// Fail unless the application's main service exists
async fn ensure_main_service(ctx: &Context, namespace: &str, app: &str) -> Result<(), Error> {
    let name = main_service_name(app);
    match ctx.kube.get(ChildKind::Service, namespace, &name).await? {
        Some(_) => Ok(()),
        None => Err(BuildError::MissingMainService {
            namespace: namespace.to_string(),
            name,
        }
        .into()),
    }
}

/// Converge every child of one endpoint in stage order
pub(crate) async fn converge_endpoint(
    ctx: &Context,
    build: &BuildContext<'_>,
    endpoint: &EndpointSpec,
) -> EndpointOutcome {
    let id = endpoint.id.as_str();
    let namespace = build.namespace.as_str();

    let compiled: CompiledEndpoint = match EndpointCompiler::compile(build, endpoint) {
        Ok(compiled) => compiled,
        Err(e) => return EndpointOutcome::failed(id, Stage::Workload, e.into(), Vec::new()),
    };
    let workload_preserved: &[&str] = if compiled.autoscaler.is_some() {
        AUTOSCALED_FIELDS
    } else {
        &[]
    };
    let mut converged = Vec::with_capacity(4);

    match converge_stage(ctx, namespace, compiled.workload_child(), workload_preserved).await {
        Ok(child) => converged.push(child),
        Err(e) => return EndpointOutcome::failed(id, Stage::Workload, e, converged),
    }

    match converge_stage(
        ctx,
        namespace,
        compiled.service_child(),
        ChildKind::Service.preserved_spec_fields(),
    )
    .await
    {
        Ok(child) => converged.push(child),
        Err(e) => return EndpointOutcome::failed(id, Stage::Service, e, converged),
    }

    if let RoutingStrategy::Canary { .. } = endpoint.routing() {
        if let Err(e) = ensure_main_service(ctx, namespace, &build.spec.app_ref.name).await {
            return EndpointOutcome::failed(id, Stage::Route, e, converged);
        }
    }
    match converge_stage(ctx, namespace, compiled.route_child(), &[]).await {
        Ok(child) => converged.push(child),
        Err(e) => return EndpointOutcome::failed(id, Stage::Route, e, converged),
    }

    match compiled.autoscaler_child() {
        Ok(Some(hpa)) => match converge_stage(ctx, namespace, Ok(hpa), &[]).await {
            Ok(child) => converged.push(child),
            Err(e) => return EndpointOutcome::failed(id, Stage::Autoscaler, e, converged),
        },
        Ok(None) => {}
        Err(e) => return EndpointOutcome::failed(id, Stage::Autoscaler, e, converged),
    }

    EndpointOutcome::Converged {
        endpoint_id: id.to_string(),
        children: converged,
    }
}

/// Children to delete given what exists and how each endpoint fared
///
/// - endpoint absent from the outcomes: every child goes
/// - failed endpoint: nothing goes
/// - converged endpoint: children outside its desired set go
pub fn plan_deletions(owned: &OwnedChildren, outcomes: &[EndpointOutcome]) -> Vec<ChildRef> {
    let mut doomed = Vec::new();
    for endpoint_id in owned.endpoint_ids() {
        let existing = owned.children(endpoint_id);
        match outcomes.iter().find(|o| o.endpoint_id() == endpoint_id) {
            None => doomed.extend_from_slice(existing),
            Some(EndpointOutcome::Failed { .. }) => {}
            Some(EndpointOutcome::Converged { children, .. }) => {
                let wanted: BTreeSet<&ChildRef> = children.iter().collect();
                doomed.extend(existing.iter().filter(|c| !wanted.contains(c)).cloned());
            }
        }
    }
    doomed
}

/// Delete children no endpoint wants anymore; returns how many were deleted
pub(crate) async fn collect_garbage(
    ctx: &Context,
    namespace: &str,
    policy_name: &str,
    outcomes: &[EndpointOutcome],
) -> Result<usize, Error> {
    let scheme = &ctx.config.labels;
    let selector = scheme.policy_selector(policy_name);

    let mut owned = OwnedChildren::default();
    for kind in ChildKind::ALL {
        let objects = ctx.kube.list(kind, namespace, &selector).await?;
        owned.extend(scheme, kind, &objects);
    }

    let doomed = plan_deletions(&owned, outcomes);
    for child in &doomed {
        warn!(kind = %child.kind, name = %child.name, "deleting orphaned child");
        ctx.kube.delete(child.kind, namespace, &child.name).await?;
    }
    Ok(doomed.len())
}
