//! EndpointPolicy Custom Resource Definition
//!
//! An EndpointPolicy breaks selected endpoints (HTTP paths or gRPC methods) of
//! an application out into their own Deployment, Service, optional
//! HorizontalPodAutoscaler and Gateway API route.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, EndpointStatus};

/// Default service port of the application when `appRef.port` is unset
pub const DEFAULT_SERVICE_PORT: i32 = 80;

/// Default container port of the application when `appRef.containerPort` is unset
pub const DEFAULT_CONTAINER_PORT: i32 = 8080;

/// Default route backend port for gRPC endpoints when `appRef.port` is unset
pub const DEFAULT_GRPC_ROUTE_PORT: i32 = 9090;

/// Default canary weight (percent of matched traffic sent to the endpoint)
pub const DEFAULT_CANARY_WEIGHT: i32 = 5;

/// Lowercase RFC 1123 label; endpoint ids become child names and label values
pub const ENDPOINT_ID_PATTERN: &str = "^[a-z0-9]([-a-z0-9]*[a-z0-9])?$";

/// Specification for an EndpointPolicy
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "endpointscaler.io",
    version = "v1alpha1",
    kind = "EndpointPolicy",
    plural = "endpointpolicies",
    shortname = "ep",
    status = "EndpointPolicyStatus",
    namespaced,
    printcolumn = r#"{"name":"App","type":"string","jsonPath":".spec.appRef.name"}"#,
    printcolumn = r#"{"name":"Endpoints","type":"integer","jsonPath":".status.endpointCount"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EndpointPolicySpec {
    /// The primary application this policy augments
    #[serde(default)]
    pub app_ref: AppReference,

    /// The Gateway that routes traffic to the endpoints
    #[serde(default)]
    pub gateway_ref: GatewayReference,

    /// Endpoints broken out of the application, in reconciliation order
    #[serde(default)]
    #[schemars(length(min = 1))]
    pub endpoints: Vec<EndpointSpec>,
}

/// Identifies the primary application
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppReference {
    /// Name of the application; the main service is `{name}-svc`
    #[serde(default)]
    pub name: String,

    /// Namespace of the application (defaults to the policy namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Service port (defaults to 80)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0, max = 65535))]
    pub port: Option<i32>,

    /// Port the container listens on (defaults to 8080)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0, max = 65535))]
    pub container_port: Option<i32>,

    /// Image run by every endpoint deployment
    #[serde(default)]
    pub image: String,
}

impl AppReference {
    /// Service port with the default applied
    pub fn service_port(&self) -> i32 {
        match self.port {
            Some(port) if port > 0 => port,
            _ => DEFAULT_SERVICE_PORT,
        }
    }

    /// Container port with the default applied
    pub fn container_port(&self) -> i32 {
        match self.container_port {
            Some(port) if port > 0 => port,
            _ => DEFAULT_CONTAINER_PORT,
        }
    }
}

/// Identifies the routing front-end
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayReference {
    /// Gateway name
    #[serde(default)]
    pub name: String,

    /// Gateway namespace (defaults to the policy namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Hostname attached to every route (e.g. "api.example.com")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// A single routable endpoint
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    /// Identifier, unique within the policy and DNS-label safe
    #[serde(default)]
    #[schemars(regex(pattern = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$"), length(max = 63))]
    pub id: String,

    /// Protocol of the endpoint
    #[serde(rename = "type", default)]
    pub type_: EndpointType,

    /// Traffic that belongs to this endpoint
    #[serde(rename = "match", default)]
    pub match_: MatchSpec,

    /// How matched traffic is split between the application and the endpoint
    #[serde(default)]
    pub strategy: Strategy,

    /// Percent of matched traffic sent to the endpoint under canary (1-100, default 5)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1, max = 100))]
    pub canary_weight: Option<i32>,

    /// Compute resources for the endpoint container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSpec>,

    /// Autoscaling; when set, `hpa.min` replaces `replicas`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hpa: Option<HpaSpec>,

    /// Fixed replica count (ignored when `hpa` is set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1))]
    pub replicas: Option<i32>,
}

impl EndpointSpec {
    /// Resolved routing strategy
    ///
    /// `Strategy::Unknown` is rejected by validation; should it reach here it
    /// routes like primary, sending all matched traffic to the endpoint.
    pub fn routing(&self) -> RoutingStrategy {
        match self.strategy {
            Strategy::Canary => RoutingStrategy::Canary {
                weight: self.canary_weight.unwrap_or(DEFAULT_CANARY_WEIGHT),
            },
            Strategy::Primary | Strategy::Unknown => RoutingStrategy::Primary,
        }
    }

    /// Replica count for the endpoint workload: hpa.min, then replicas, then 1
    pub fn desired_replicas(&self) -> i32 {
        match (&self.hpa, self.replicas) {
            (Some(hpa), _) => hpa.min,
            (None, Some(replicas)) => replicas,
            (None, None) => 1,
        }
    }
}

/// Endpoint protocol
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EndpointType {
    /// HTTP path routing (HTTPRoute)
    #[default]
    Http,
    /// gRPC method routing (GRPCRoute)
    Grpc,
    /// Any value outside the schema; rejected by validation
    #[serde(other)]
    #[schemars(skip)]
    Unknown,
}

impl EndpointType {
    /// Lowercase name as written in the spec
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Grpc => "grpc",
            Self::Unknown => "unknown",
        }
    }

    /// Port name used on container and service ports
    pub fn port_name(&self) -> &'static str {
        match self {
            Self::Grpc => "grpc",
            Self::Http | Self::Unknown => "http",
        }
    }
}

impl std::fmt::Display for EndpointType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing strategy as written in the spec
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// The endpoint serves all matched traffic
    #[default]
    Primary,
    /// Matched traffic is split between the application and the endpoint
    Canary,
    /// Any value outside the schema; rejected by validation
    #[serde(other)]
    #[schemars(skip)]
    Unknown,
}

impl Strategy {
    /// Lowercase name as written in the spec
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Canary => "canary",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved routing strategy used by the route builder
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutingStrategy {
    /// Single backend at full weight
    Primary,
    /// Main service at `100 - weight`, endpoint service at `weight`
    Canary {
        /// Percent of matched traffic for the endpoint
        weight: i32,
    },
}

/// Traffic matching rules
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchSpec {
    /// Path prefix for HTTP endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Fully qualified gRPC service (e.g. "payments.Payments")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// gRPC method (e.g. "Authorize")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// Compute resources, in Kubernetes quantity syntax
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// CPU limit (e.g. "1", "500m")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_limit: Option<String>,

    /// CPU request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_request: Option<String>,

    /// Memory limit (e.g. "512Mi", "1Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_limit: Option<String>,

    /// Memory request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mem_request: Option<String>,
}

/// Horizontal autoscaling for an endpoint
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HpaSpec {
    /// Minimum replicas (default 1)
    #[serde(default = "default_hpa_min")]
    #[schemars(range(min = 1))]
    pub min: i32,

    /// Maximum replicas
    #[serde(default)]
    #[schemars(range(min = 1))]
    pub max: i32,

    /// Target average CPU utilization percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1, max = 100))]
    pub cpu_target: Option<i32>,

    /// Target average memory utilization percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1, max = 100))]
    pub memory_target: Option<i32>,
}

fn default_hpa_min() -> i32 {
    1
}

/// Observed state of an EndpointPolicy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointPolicyStatus {
    /// Number of endpoints in the spec
    #[serde(default)]
    pub endpoint_count: usize,

    /// Generation of the spec this status describes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Conditions (currently `Ready`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Per-endpoint outcome of the last pass, in spec order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoint_statuses: Vec<EndpointStatus>,
}

impl EndpointPolicyStatus {
    /// Set a condition, keeping its transition time if the status is unchanged
    pub fn condition(mut self, condition: Condition) -> Self {
        super::types::set_condition(&mut self.conditions, condition);
        self
    }

    /// Look up a condition by type
    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}
