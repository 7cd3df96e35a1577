//! Gateway API routes for endpoints
//!
//! Every endpoint gets one route attached to the policy's Gateway:
//! - **HTTPRoute** for `http` endpoints, matching a path prefix
//! - **GRPCRoute** for `grpc` endpoints, matching a service and method
//!
//! Each route has a single rule whose backends come from [`weights`].
//!
//! # Example
//!
//! ```yaml
//! apiVersion: gateway.networking.k8s.io/v1
//! kind: HTTPRoute
//! metadata:
//!   name: my-app-lookup
//! spec:
//!   parentRefs:
//!     - group: gateway.networking.k8s.io
//!       kind: Gateway
//!       name: main-gateway
//!       namespace: shop
//!   rules:
//!     - matches:
//!         - path: {type: PathPrefix, value: /api/lookup}
//!       backendRefs:
//!         - {kind: Service, name: my-app-svc, port: 80, weight: 90}
//!         - {kind: Service, name: my-app-lookup-svc, port: 80, weight: 10}
//! ```

pub mod weights;

use serde::{Deserialize, Serialize};

use crate::compiler::BuildContext;
use crate::crd::{
    EndpointSpec, EndpointType, DEFAULT_GRPC_ROUTE_PORT, DEFAULT_SERVICE_PORT,
};
use crate::labels::main_service_name;
use crate::workload::ObjectMeta;

use self::weights::backend_weights;

const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";
const GATEWAY_API_VERSION: &str = "gateway.networking.k8s.io/v1";

// =============================================================================
// Shared Gateway API Types
// =============================================================================

/// Reference to a parent Gateway
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParentRef {
    /// Group (gateway.networking.k8s.io)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Kind (Gateway)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Gateway name
    pub name: String,
    /// Namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Reference to a backend service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendRef {
    /// Kind (Service)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Service name
    pub name: String,
    /// Port
    pub port: i32,
    /// Share of traffic relative to the other backends of the rule
    pub weight: i32,
}

// =============================================================================
// HTTPRoute Types
// =============================================================================

/// Kubernetes Gateway API HTTPRoute resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: HttpRouteSpec,
}

/// HTTPRoute spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteSpec {
    /// Parent references (Gateway)
    pub parent_refs: Vec<ParentRef>,
    /// Hostnames to match
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,
    /// Routing rules
    pub rules: Vec<HttpRouteRule>,
}

/// HTTPRoute routing rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteRule {
    /// Match conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpRouteMatch>,
    /// Backend references
    pub backend_refs: Vec<BackendRef>,
}

/// HTTPRoute match condition
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteMatch {
    /// Path match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<HttpPathMatch>,
}

/// HTTP path match configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpPathMatch {
    /// Match type (Exact, PathPrefix)
    #[serde(rename = "type")]
    pub type_: String,
    /// Path value
    pub value: String,
}

// =============================================================================
// GRPCRoute Types
// =============================================================================

/// Kubernetes Gateway API GRPCRoute resource
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrpcRoute {
    /// API version
    pub api_version: String,
    /// Kind
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: GrpcRouteSpec,
}

/// GRPCRoute spec
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrpcRouteSpec {
    /// Parent references (Gateway)
    pub parent_refs: Vec<ParentRef>,
    /// Hostnames to match
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,
    /// Routing rules
    pub rules: Vec<GrpcRouteRule>,
}

/// GRPCRoute routing rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrpcRouteRule {
    /// Match conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<GrpcRouteMatch>,
    /// Backend references
    pub backend_refs: Vec<BackendRef>,
}

/// GRPCRoute match condition
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrpcRouteMatch {
    /// Method match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<GrpcMethodMatch>,
}

/// gRPC service/method match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrpcMethodMatch {
    /// Fully qualified service name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Method name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

// =============================================================================
// Route Compiler
// =============================================================================

/// The route built for one endpoint
#[derive(Clone, Debug, PartialEq)]
pub enum Route {
    /// Route for an `http` endpoint
    Http(HttpRoute),
    /// Route for a `grpc` endpoint
    Grpc(GrpcRoute),
}

impl Route {
    /// Route name
    pub fn name(&self) -> &str {
        match self {
            Self::Http(r) => &r.metadata.name,
            Self::Grpc(r) => &r.metadata.name,
        }
    }

    /// Backends of the single rule
    pub fn backend_refs(&self) -> &[BackendRef] {
        let rules = match self {
            Self::Http(r) => r.spec.rules.first().map(|rule| rule.backend_refs.as_slice()),
            Self::Grpc(r) => r.spec.rules.first().map(|rule| rule.backend_refs.as_slice()),
        };
        rules.unwrap_or_default()
    }
}

/// Compiler for endpoint routes
pub struct RouteCompiler;

impl RouteCompiler {
    /// Compile the route for an endpoint, HTTPRoute or GRPCRoute by type
    pub fn compile(ctx: &BuildContext<'_>, endpoint: &EndpointSpec) -> Route {
        match endpoint.type_ {
            EndpointType::Grpc => Route::Grpc(Self::compile_grpc_route(ctx, endpoint)),
            EndpointType::Http | EndpointType::Unknown => {
                Route::Http(Self::compile_http_route(ctx, endpoint))
            }
        }
    }

    /// Backend port used by routes; defaults differ per protocol
    pub fn backend_port(ctx: &BuildContext<'_>, endpoint: &EndpointSpec) -> i32 {
        match ctx.spec.app_ref.port {
            Some(port) if port > 0 => port,
            _ => match endpoint.type_ {
                EndpointType::Grpc => DEFAULT_GRPC_ROUTE_PORT,
                EndpointType::Http | EndpointType::Unknown => DEFAULT_SERVICE_PORT,
            },
        }
    }

    fn compile_http_route(ctx: &BuildContext<'_>, endpoint: &EndpointSpec) -> HttpRoute {
        let names = ctx.names(endpoint);

        HttpRoute {
            api_version: GATEWAY_API_VERSION.to_string(),
            kind: "HTTPRoute".to_string(),
            metadata: ctx.metadata(&names.route, endpoint),
            spec: HttpRouteSpec {
                parent_refs: vec![Self::parent_ref(ctx)],
                hostnames: Self::hostnames(ctx),
                rules: vec![HttpRouteRule {
                    matches: vec![HttpRouteMatch {
                        path: Some(HttpPathMatch {
                            type_: "PathPrefix".to_string(),
                            value: endpoint.match_.path.clone().unwrap_or_default(),
                        }),
                    }],
                    backend_refs: Self::backend_refs(ctx, endpoint),
                }],
            },
        }
    }

    fn compile_grpc_route(ctx: &BuildContext<'_>, endpoint: &EndpointSpec) -> GrpcRoute {
        let names = ctx.names(endpoint);
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());

        GrpcRoute {
            api_version: GATEWAY_API_VERSION.to_string(),
            kind: "GRPCRoute".to_string(),
            metadata: ctx.metadata(&names.route, endpoint),
            spec: GrpcRouteSpec {
                parent_refs: vec![Self::parent_ref(ctx)],
                hostnames: Self::hostnames(ctx),
                rules: vec![GrpcRouteRule {
                    matches: vec![GrpcRouteMatch {
                        method: Some(GrpcMethodMatch {
                            service: non_empty(&endpoint.match_.service),
                            method: non_empty(&endpoint.match_.method),
                        }),
                    }],
                    backend_refs: Self::backend_refs(ctx, endpoint),
                }],
            },
        }
    }

    fn parent_ref(ctx: &BuildContext<'_>) -> ParentRef {
        let gateway = &ctx.spec.gateway_ref;
        let namespace = gateway
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| ctx.namespace.clone());

        ParentRef {
            group: Some(GATEWAY_API_GROUP.to_string()),
            kind: Some("Gateway".to_string()),
            name: gateway.name.clone(),
            namespace: Some(namespace),
        }
    }

    fn hostnames(ctx: &BuildContext<'_>) -> Vec<String> {
        ctx.spec
            .gateway_ref
            .hostname
            .iter()
            .filter(|h| !h.is_empty())
            .cloned()
            .collect()
    }

    fn backend_refs(ctx: &BuildContext<'_>, endpoint: &EndpointSpec) -> Vec<BackendRef> {
        let port = Self::backend_port(ctx, endpoint);
        let main_service = main_service_name(&ctx.spec.app_ref.name);
        let endpoint_service = ctx.names(endpoint).service;

        backend_weights(endpoint.routing(), &main_service, &endpoint_service)
            .into_iter()
            .map(|b| BackendRef {
                kind: Some("Service".to_string()),
                name: b.service,
                port,
                weight: b.weight,
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
