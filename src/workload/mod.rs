//! Workload types for endpoint deployments
//!
//! This module defines the Kubernetes resources built for every endpoint:
//! - Deployment: runs the application image for one endpoint
//! - Service: exposes only that endpoint's pods
//! - HorizontalPodAutoscaler: scales the Deployment (when `hpa` is set)
//!
//! For the full per-endpoint child set, use [`crate::compiler::EndpointCompiler`].

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::{Deserialize, Serialize};

use crate::compiler::BuildContext;
use crate::config::GUARD_ENV_VAR;
use crate::crd::{EndpointSpec, ResourceSpec};
use crate::error::BuildError;

// =============================================================================
// Kubernetes Resource Types
// =============================================================================

/// Object metadata for generated children
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name
    pub name: String,
    /// Resource namespace
    pub namespace: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Controller reference back to the policy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
}

impl ObjectMeta {
    /// Create metadata with no labels
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            owner_references: Vec::new(),
        }
    }

    /// Replace the label set
    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Attach a controller owner reference
    pub fn with_owner(mut self, owner: Option<OwnerReference>) -> Self {
        self.owner_references = owner.into_iter().collect();
        self
    }
}

// =============================================================================
// Deployment
// =============================================================================

/// Kubernetes Deployment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: DeploymentSpec,
}

/// Deployment spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    /// Number of replicas
    pub replicas: i32,
    /// Label selector
    pub selector: LabelSelector,
    /// Pod template
    pub template: PodTemplateSpec,
}

/// Label selector
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Match labels
    pub match_labels: BTreeMap<String, String>,
}

/// Pod template spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodTemplateSpec {
    /// Pod metadata
    pub metadata: PodMeta,
    /// Pod spec
    pub spec: PodSpec,
}

/// Pod metadata (labels only)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodMeta {
    /// Labels
    pub labels: BTreeMap<String, String>,
}

/// Pod spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Containers
    pub containers: Vec<Container>,
}

/// Container spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    /// Container name
    pub name: String,
    /// Image
    pub image: String,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ContainerPort>,
    /// Resource requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

/// Environment variable
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Variable value
    pub value: String,
}

/// Container port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPort {
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Port number
    pub container_port: i32,
    /// Protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// Resource requirements
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    /// Requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<ResourceQuantity>,
    /// Limits
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceQuantity>,
}

/// Resource quantity
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuantity {
    /// CPU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    /// Memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

impl ResourceQuantity {
    fn into_option(self) -> Option<Self> {
        (self.cpu.is_some() || self.memory.is_some()).then_some(self)
    }
}

// =============================================================================
// Service
// =============================================================================

/// Kubernetes Service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: ServiceSpec,
}

/// Service spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    /// Service type
    #[serde(rename = "type")]
    pub type_: String,
    /// Selector
    pub selector: BTreeMap<String, String>,
    /// Ports
    pub ports: Vec<ServicePort>,
}

/// Service port
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServicePort {
    /// Port name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Port number
    pub port: i32,
    /// Target port on the pod
    pub target_port: i32,
    /// Protocol
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

// =============================================================================
// HorizontalPodAutoscaler
// =============================================================================

/// Kubernetes HorizontalPodAutoscaler (v2)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HorizontalPodAutoscaler {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: AutoscalerSpec,
}

/// HPA spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerSpec {
    /// Scale target ref
    pub scale_target_ref: ScaleTargetRef,
    /// Min replicas
    pub min_replicas: i32,
    /// Max replicas
    pub max_replicas: i32,
    /// Metrics
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<MetricSpec>,
}

/// Scale target reference
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleTargetRef {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Name
    pub name: String,
}

/// Metric specification
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpec {
    /// Metric type
    #[serde(rename = "type")]
    pub type_: String,
    /// Resource metric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceMetricSource>,
}

impl MetricSpec {
    /// Average utilization target for a container resource
    fn utilization(resource: &str, percent: i32) -> Self {
        Self {
            type_: "Resource".to_string(),
            resource: Some(ResourceMetricSource {
                name: resource.to_string(),
                target: MetricTarget {
                    type_: "Utilization".to_string(),
                    average_utilization: Some(percent),
                },
            }),
        }
    }
}

/// Resource metric source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMetricSource {
    /// Resource name (cpu, memory)
    pub name: String,
    /// Target
    pub target: MetricTarget,
}

/// Metric target
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricTarget {
    /// Target type
    #[serde(rename = "type")]
    pub type_: String,
    /// Average utilization percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_utilization: Option<i32>,
}

// =============================================================================
// Workload Compiler
// =============================================================================

/// Builds the Deployment, Service and HPA for one endpoint
pub struct WorkloadCompiler;

impl WorkloadCompiler {
    /// Compile the endpoint Deployment
    ///
    /// Fails with [`BuildError::MissingImage`] when `appRef.image` is empty.
    pub fn compile_deployment(
        ctx: &BuildContext<'_>,
        endpoint: &EndpointSpec,
    ) -> Result<Deployment, BuildError> {
        let app = &ctx.spec.app_ref;
        if app.image.is_empty() {
            return Err(BuildError::MissingImage);
        }

        let names = ctx.names(endpoint);
        let labels = ctx.child_labels(endpoint);

        let container = Container {
            name: endpoint.id.clone(),
            image: app.image.clone(),
            env: vec![EnvVar {
                name: GUARD_ENV_VAR.to_string(),
                value: endpoint.id.clone(),
            }],
            ports: vec![ContainerPort {
                name: Some(endpoint.type_.port_name().to_string()),
                container_port: app.container_port(),
                protocol: Some("TCP".to_string()),
            }],
            resources: endpoint.resources.as_ref().and_then(compile_resources),
        };

        Ok(Deployment {
            api_version: "apps/v1".to_string(),
            kind: "Deployment".to_string(),
            metadata: ctx.metadata(&names.workload, endpoint),
            spec: DeploymentSpec {
                replicas: endpoint.desired_replicas(),
                selector: LabelSelector {
                    match_labels: labels.clone(),
                },
                template: PodTemplateSpec {
                    metadata: PodMeta { labels },
                    spec: PodSpec {
                        containers: vec![container],
                    },
                },
            },
        })
    }

    /// Compile the endpoint Service, selecting only this endpoint's pods
    pub fn compile_service(ctx: &BuildContext<'_>, endpoint: &EndpointSpec) -> Service {
        let app = &ctx.spec.app_ref;
        let names = ctx.names(endpoint);

        Service {
            api_version: "v1".to_string(),
            kind: "Service".to_string(),
            metadata: ctx.metadata(&names.service, endpoint),
            spec: ServiceSpec {
                type_: "ClusterIP".to_string(),
                selector: ctx.child_labels(endpoint),
                ports: vec![ServicePort {
                    name: Some(endpoint.type_.port_name().to_string()),
                    port: app.service_port(),
                    target_port: app.container_port(),
                    protocol: Some("TCP".to_string()),
                }],
            },
        }
    }

    /// Compile the endpoint HPA; `None` when the endpoint has no `hpa`
    pub fn compile_hpa(
        ctx: &BuildContext<'_>,
        endpoint: &EndpointSpec,
    ) -> Option<HorizontalPodAutoscaler> {
        let hpa = endpoint.hpa.as_ref()?;
        let names = ctx.names(endpoint);

        let metrics = [("cpu", hpa.cpu_target), ("memory", hpa.memory_target)]
            .into_iter()
            .filter_map(|(resource, target)| target.map(|t| MetricSpec::utilization(resource, t)))
            .collect();

        Some(HorizontalPodAutoscaler {
            api_version: "autoscaling/v2".to_string(),
            kind: "HorizontalPodAutoscaler".to_string(),
            metadata: ctx.metadata(&names.autoscaler, endpoint),
            spec: AutoscalerSpec {
                scale_target_ref: ScaleTargetRef {
                    api_version: "apps/v1".to_string(),
                    kind: "Deployment".to_string(),
                    name: names.workload,
                },
                min_replicas: hpa.min,
                max_replicas: hpa.max,
                metrics,
            },
        })
    }
}

/// Map endpoint resources to container requirements
///
/// A limit without a request also sets the request. Unparsable quantities
/// are dropped.
fn compile_resources(res: &ResourceSpec) -> Option<ResourceRequirements> {
    let parsed = |q: &Option<String>| {
        q.as_deref()
            .filter(|v| !v.is_empty() && crate::crd::quantity::validate_quantity(v).is_ok())
            .map(str::to_string)
    };

    let cpu_limit = parsed(&res.cpu_limit);
    let mem_limit = parsed(&res.mem_limit);
    let cpu_request = parsed(&res.cpu_request).or_else(|| cpu_limit.clone());
    let mem_request = parsed(&res.mem_request).or_else(|| mem_limit.clone());

    let requirements = ResourceRequirements {
        requests: ResourceQuantity {
            cpu: cpu_request,
            memory: mem_request,
        }
        .into_option(),
        limits: ResourceQuantity {
            cpu: cpu_limit,
            memory: mem_limit,
        }
        .into_option(),
    };

    (requirements.requests.is_some() || requirements.limits.is_some()).then_some(requirements)
}

// =============================================================================
// Tests
// =============================================================================
