//! Endpoint compiler
//!
//! Turns one endpoint of an [`EndpointPolicy`] into its desired child objects
//! by delegating to the specialized compilers:
//! - [`WorkloadCompiler`]: Deployment, Service, HorizontalPodAutoscaler
//! - [`RouteCompiler`]: HTTPRoute or GRPCRoute
//!
//! Compilation is pure. The only failure is a missing image; the canary
//! main-service check needs the cluster and is left to the converger.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DynamicObject};
use kube::core::GroupVersionKind;
use kube::{Resource, ResourceExt};
use serde::Serialize;

use crate::config::LabelScheme;
use crate::crd::{EndpointPolicy, EndpointPolicySpec, EndpointSpec};
use crate::error::BuildError;
use crate::labels::ChildNames;
use crate::route::{Route, RouteCompiler};
use crate::workload::{Deployment, HorizontalPodAutoscaler, ObjectMeta, Service, WorkloadCompiler};
use crate::Error;

/// Kinds of child objects an endpoint can own
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildKind {
    /// apps/v1 Deployment
    Deployment,
    /// v1 Service
    Service,
    /// gateway.networking.k8s.io/v1 HTTPRoute
    HttpRoute,
    /// gateway.networking.k8s.io/v1 GRPCRoute
    GrpcRoute,
    /// autoscaling/v2 HorizontalPodAutoscaler
    HorizontalPodAutoscaler,
}

impl ChildKind {
    /// Every kind, in garbage-collection order
    pub const ALL: [ChildKind; 5] = [
        ChildKind::Deployment,
        ChildKind::Service,
        ChildKind::HttpRoute,
        ChildKind::GrpcRoute,
        ChildKind::HorizontalPodAutoscaler,
    ];

    /// Gateway API kinds; not every cluster serves both
    pub fn is_route(self) -> bool {
        matches!(self, Self::HttpRoute | Self::GrpcRoute)
    }

    /// Kubernetes kind name
    pub fn kind(self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::HttpRoute => "HTTPRoute",
            Self::GrpcRoute => "GRPCRoute",
            Self::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
        }
    }

    /// API resource used by the dynamic client
    pub fn api_resource(self) -> ApiResource {
        let (group, version, plural) = match self {
            Self::Deployment => ("apps", "v1", "deployments"),
            Self::Service => ("", "v1", "services"),
            Self::HttpRoute => ("gateway.networking.k8s.io", "v1", "httproutes"),
            Self::GrpcRoute => ("gateway.networking.k8s.io", "v1", "grpcroutes"),
            Self::HorizontalPodAutoscaler => ("autoscaling", "v2", "horizontalpodautoscalers"),
        };
        ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(group, version, self.kind()), plural)
    }

    /// Server-assigned spec fields kept when the spec is replaced
    pub fn preserved_spec_fields(self) -> &'static [&'static str] {
        match self {
            Self::Service => &["clusterIP", "clusterIPs", "ipFamilies", "ipFamilyPolicy"],
            _ => &[],
        }
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Policy-wide inputs shared by every builder
#[derive(Clone, Debug)]
pub struct BuildContext<'a> {
    /// Policy name, stamped on every child as a label
    pub policy_name: String,
    /// Namespace of the policy and all its children
    pub namespace: String,
    /// Policy spec
    pub spec: &'a EndpointPolicySpec,
    /// Controller reference to the policy, when it has a uid
    pub owner: Option<OwnerReference>,
    /// Label keys and values
    pub labels: &'a LabelScheme,
}

impl<'a> BuildContext<'a> {
    /// Context for a policy read from the cluster (or a manifest)
    pub fn for_policy(policy: &'a EndpointPolicy, labels: &'a LabelScheme) -> Result<Self, Error> {
        let namespace = policy.namespace().ok_or(Error::MissingNamespace)?;
        Ok(Self {
            policy_name: policy.name_any(),
            namespace,
            spec: &policy.spec,
            owner: policy.controller_owner_ref(&()),
            labels,
        })
    }

    /// Deterministic child names for an endpoint
    pub fn names(&self, endpoint: &EndpointSpec) -> ChildNames {
        ChildNames::new(&self.spec.app_ref.name, &endpoint.id)
    }

    /// Label set for every child of an endpoint
    pub fn child_labels(&self, endpoint: &EndpointSpec) -> BTreeMap<String, String> {
        self.labels
            .child_labels(&self.policy_name, &self.spec.app_ref.name, &endpoint.id)
    }

    /// Metadata for a child of an endpoint
    pub fn metadata(&self, name: &str, endpoint: &EndpointSpec) -> ObjectMeta {
        ObjectMeta::new(name, self.namespace.as_str())
            .with_labels(self.child_labels(endpoint))
            .with_owner(self.owner.clone())
    }
}

/// A desired child in the shape the dynamic client writes
#[derive(Clone, Debug)]
pub struct DesiredChild {
    /// Kind of the child
    pub kind: ChildKind,
    /// Object name
    pub name: String,
    /// Full object including apiVersion and kind
    pub object: DynamicObject,
}

impl DesiredChild {
    fn from_typed<T: Serialize>(kind: ChildKind, name: &str, typed: &T) -> Result<Self, Error> {
        Ok(Self {
            kind,
            name: name.to_string(),
            object: to_dynamic(typed)?,
        })
    }
}

/// Convert a typed manifest into a [`DynamicObject`]
pub fn to_dynamic<T: Serialize>(typed: &T) -> Result<DynamicObject, Error> {
    Ok(serde_json::from_value(serde_json::to_value(typed)?)?)
}

/// All desired children of one endpoint
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledEndpoint {
    /// Endpoint id
    pub endpoint_id: String,
    /// Child names
    pub names: ChildNames,
    /// Endpoint Deployment
    pub deployment: Deployment,
    /// Endpoint Service
    pub service: Service,
    /// Endpoint route
    pub route: Route,
    /// Endpoint HPA, when `hpa` is set
    pub autoscaler: Option<HorizontalPodAutoscaler>,
}

impl CompiledEndpoint {
    /// The Deployment as a dynamic child
    pub fn workload_child(&self) -> Result<DesiredChild, Error> {
        DesiredChild::from_typed(ChildKind::Deployment, &self.names.workload, &self.deployment)
    }

    /// The Service as a dynamic child
    pub fn service_child(&self) -> Result<DesiredChild, Error> {
        DesiredChild::from_typed(ChildKind::Service, &self.names.service, &self.service)
    }

    /// The route as a dynamic child
    pub fn route_child(&self) -> Result<DesiredChild, Error> {
        match &self.route {
            Route::Http(r) => DesiredChild::from_typed(ChildKind::HttpRoute, &self.names.route, r),
            Route::Grpc(r) => DesiredChild::from_typed(ChildKind::GrpcRoute, &self.names.route, r),
        }
    }

    /// The HPA as a dynamic child, if any
    pub fn autoscaler_child(&self) -> Result<Option<DesiredChild>, Error> {
        self.autoscaler
            .as_ref()
            .map(|hpa| {
                DesiredChild::from_typed(
                    ChildKind::HorizontalPodAutoscaler,
                    &self.names.autoscaler,
                    hpa,
                )
            })
            .transpose()
    }

    /// Every desired child in convergence order: workload, service, route, autoscaler
    pub fn children(&self) -> Result<Vec<DesiredChild>, Error> {
        let mut children = vec![self.workload_child()?, self.service_child()?, self.route_child()?];
        children.extend(self.autoscaler_child()?);
        Ok(children)
    }
}

/// Composes the workload and route compilers for one endpoint
pub struct EndpointCompiler;

impl EndpointCompiler {
    /// Compile every desired child of an endpoint
    pub fn compile(
        ctx: &BuildContext<'_>,
        endpoint: &EndpointSpec,
    ) -> Result<CompiledEndpoint, BuildError> {
        let deployment = WorkloadCompiler::compile_deployment(ctx, endpoint)?;

        Ok(CompiledEndpoint {
            endpoint_id: endpoint.id.clone(),
            names: ctx.names(endpoint),
            deployment,
            service: WorkloadCompiler::compile_service(ctx, endpoint),
            route: RouteCompiler::compile(ctx, endpoint),
            autoscaler: WorkloadCompiler::compile_hpa(ctx, endpoint),
        })
    }

    /// Compile every endpoint of the policy, in spec order
    pub fn compile_all(ctx: &BuildContext<'_>) -> Vec<Result<CompiledEndpoint, BuildError>> {
        ctx.spec
            .endpoints
            .iter()
            .map(|endpoint| Self::compile(ctx, endpoint))
            .collect()
    }
}
