//! Metrics for endpoint-scaler observability
//!
//! The reconciler reports through the [`MetricsSink`] held by its context.
//! [`OtelMetrics`] records OpenTelemetry instruments built from a meter the
//! binary supplies; [`NoopMetrics`] drops everything.

#[cfg(test)]
use mockall::automock;
use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;

/// Destination for reconciler metrics
#[cfg_attr(test, automock)]
pub trait MetricsSink: Send + Sync {
    /// Endpoint totals for a policy after a pass
    fn record_endpoints(&self, namespace: &str, policy: &str, total: usize, ready: usize);

    /// An endpoint converged; `type_` and `strategy` as written in the spec
    fn record_endpoint_info(
        &self,
        namespace: &str,
        policy: &str,
        endpoint: &str,
        type_: &str,
        strategy: &str,
    );

    /// A reconcile step failed
    ///
    /// `error_type` is `validation`, a failed stage (`deployment`, `service`,
    /// `route`, `hpa`), `garbage_collection`, or `status`.
    fn record_reconcile_error(&self, namespace: &str, policy: &str, error_type: &str);
}

/// OpenTelemetry-backed metrics
pub struct OtelMetrics {
    endpoints_total: Gauge<i64>,
    endpoints_ready: Gauge<i64>,
    endpoint_info: Gauge<i64>,
    reconcile_errors: Counter<u64>,
}

impl OtelMetrics {
    /// Build every instrument from `meter`
    pub fn new(meter: &Meter) -> Self {
        Self {
            endpoints_total: meter
                .i64_gauge("endpointscaler_endpoints_total")
                .with_description("Total number of endpoints per policy")
                .with_unit("{endpoints}")
                .build(),
            endpoints_ready: meter
                .i64_gauge("endpointscaler_endpoints_ready")
                .with_description("Number of ready endpoints per policy")
                .with_unit("{endpoints}")
                .build(),
            endpoint_info: meter
                .i64_gauge("endpointscaler_endpoint_info")
                .with_description("Information about individual endpoints")
                .build(),
            reconcile_errors: meter
                .u64_counter("endpointscaler_reconcile_errors_total")
                .with_description("Total number of reconciliation errors by type")
                .with_unit("{errors}")
                .build(),
        }
    }
}

fn policy_attrs(namespace: &str, policy: &str) -> Vec<KeyValue> {
    vec![
        KeyValue::new("namespace", namespace.to_string()),
        KeyValue::new("policy", policy.to_string()),
    ]
}

impl MetricsSink for OtelMetrics {
    fn record_endpoints(&self, namespace: &str, policy: &str, total: usize, ready: usize) {
        let attrs = policy_attrs(namespace, policy);
        self.endpoints_total.record(total as i64, &attrs);
        self.endpoints_ready.record(ready as i64, &attrs);
    }

    fn record_endpoint_info(
        &self,
        namespace: &str,
        policy: &str,
        endpoint: &str,
        type_: &str,
        strategy: &str,
    ) {
        let mut attrs = policy_attrs(namespace, policy);
        attrs.extend([
            KeyValue::new("endpoint", endpoint.to_string()),
            KeyValue::new("type", type_.to_string()),
            KeyValue::new("strategy", strategy.to_string()),
        ]);
        self.endpoint_info.record(1, &attrs);
    }

    fn record_reconcile_error(&self, namespace: &str, policy: &str, error_type: &str) {
        let mut attrs = policy_attrs(namespace, policy);
        attrs.push(KeyValue::new("error_type", error_type.to_string()));
        self.reconcile_errors.add(1, &attrs);
    }
}

/// Metrics sink that records nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_endpoints(&self, _: &str, _: &str, _: usize, _: usize) {}

    fn record_endpoint_info(&self, _: &str, _: &str, _: &str, _: &str, _: &str) {}

    fn record_reconcile_error(&self, _: &str, _: &str, _: &str) {}
}
