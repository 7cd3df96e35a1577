//! Custom Resource Definitions for endpoint-scaler
//!
//! The `EndpointPolicy` CRD, its status types, and semantic validation.

mod policy;
pub mod quantity;
mod types;
mod validation;

pub use policy::{
    AppReference, EndpointPolicy, EndpointPolicySpec, EndpointPolicyStatus, EndpointSpec,
    EndpointType, GatewayReference, HpaSpec, MatchSpec, ResourceSpec, RoutingStrategy, Strategy,
    DEFAULT_CANARY_WEIGHT, DEFAULT_CONTAINER_PORT, DEFAULT_GRPC_ROUTE_PORT, DEFAULT_SERVICE_PORT,
    ENDPOINT_ID_PATTERN,
};
pub use types::{
    set_condition, Condition, ConditionStatus, EndpointStatus, READY_CONDITION, REASON_ALL_READY,
    REASON_NOT_READY, REASON_VALIDATION_FAILED,
};
pub use validation::{FieldError, FieldErrorKind, FieldPath, ValidationErrors};
