//! Controller configuration
//!
//! Everything the reconciler would otherwise read from process-wide constants
//! lives here and is passed in through the controller [`Context`](crate::controller::Context).

use std::time::Duration;

use crate::retry::RetryConfig;

/// Environment variable injected into every endpoint container; its value is
/// the endpoint id, read by the request-time guard in the application.
pub const GUARD_ENV_VAR: &str = "ENDPOINTSCALER_GUARDRAIL";

/// Default field manager for server-side apply and status patches
pub const DEFAULT_FIELD_MANAGER: &str = "endpoint-scaler";

/// Label keys and values stamped on every child object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelScheme {
    /// Key carrying the owning policy name
    pub policy_key: String,
    /// Key carrying the endpoint id
    pub endpoint_key: String,
    /// Key carrying the managed-by marker
    pub managed_by_key: String,
    /// Value of the managed-by marker
    pub managed_by_value: String,
    /// Key carrying the application name
    pub app_key: String,
    /// Key carrying the component (endpoint id)
    pub component_key: String,
}

impl Default for LabelScheme {
    fn default() -> Self {
        Self {
            policy_key: "endpointscaler.io/policy".to_string(),
            endpoint_key: "endpointscaler.io/endpoint".to_string(),
            managed_by_key: "app.kubernetes.io/managed-by".to_string(),
            managed_by_value: "endpoint-scaler".to_string(),
            app_key: "app.kubernetes.io/name".to_string(),
            component_key: "app.kubernetes.io/component".to_string(),
        }
    }
}

/// Runtime settings for the reconciler
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Requeue interval after a successful pass
    pub resync_interval: Duration,
    /// Requeue interval after a failed pass
    pub error_requeue: Duration,
    /// Field manager used for status patches
    pub field_manager: String,
    /// Backoff for write conflicts on child objects
    pub conflict_retry: RetryConfig,
    /// Label keys and values for child objects
    pub labels: LabelScheme,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_interval: Duration::from_secs(300),
            error_requeue: Duration::from_secs(30),
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            conflict_retry: RetryConfig::default(),
            labels: LabelScheme::default(),
        }
    }
}
