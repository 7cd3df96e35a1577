//! EndpointPolicy reconcile entry points

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{error, info, instrument, warn};

use super::converge::{collect_garbage, converge_endpoint, EndpointOutcome};
use super::status::{aggregate_status, validation_failed_status};
use super::Context;
use crate::compiler::BuildContext;
use crate::crd::EndpointPolicy;
use crate::Error;

/// Reconcile an EndpointPolicy
///
/// Validation failures are written to the `Ready` condition and wait for a
/// spec change. Otherwise every endpoint is converged independently, orphaned
/// children are deleted, and the aggregated status is written. Only garbage
/// collection and the status write fail the pass.
#[instrument(skip(policy, ctx), fields(policy = %policy.name_any(), namespace = ?policy.namespace()))]
pub async fn reconcile(policy: Arc<EndpointPolicy>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = policy.name_any();
    let namespace = policy.namespace().ok_or(Error::MissingNamespace)?;

    if let Err(errors) = policy.spec.validate() {
        warn!(error = %errors, "policy validation failed");
        ctx.metrics
            .record_reconcile_error(&namespace, &name, "validation");
        let status = validation_failed_status(&policy, &errors);
        ctx.kube.patch_status(&namespace, &name, &status).await?;
        return Ok(Action::await_change());
    }

    info!(endpoints = policy.spec.endpoints.len(), "reconciling endpoint policy");

    let build = BuildContext::for_policy(&policy, &ctx.config.labels)?;
    let mut outcomes = Vec::with_capacity(policy.spec.endpoints.len());
    for endpoint in &policy.spec.endpoints {
        let outcome = converge_endpoint(&ctx, &build, endpoint).await;
        match &outcome {
            EndpointOutcome::Converged { .. } => {
                ctx.metrics.record_endpoint_info(
                    &namespace,
                    &name,
                    &endpoint.id,
                    endpoint.type_.as_str(),
                    endpoint.strategy.as_str(),
                );
            }
            EndpointOutcome::Failed { stage, reason, .. } => {
                warn!(endpoint = %endpoint.id, stage = stage.label(), %reason, "endpoint failed to converge");
                ctx.metrics
                    .record_reconcile_error(&namespace, &name, stage.error_type());
            }
        }
        outcomes.push(outcome);
    }

    match collect_garbage(&ctx, &namespace, &name, &outcomes).await {
        Ok(0) => {}
        Ok(deleted) => info!(deleted, "deleted orphaned children"),
        Err(e) => {
            ctx.metrics
                .record_reconcile_error(&namespace, &name, "garbage_collection");
            return Err(e);
        }
    }

    let status = aggregate_status(&policy, &outcomes);
    let ready = status.endpoint_statuses.iter().filter(|s| s.ready).count();
    ctx.metrics
        .record_endpoints(&namespace, &name, status.endpoint_count, ready);

    if let Err(e) = ctx.kube.patch_status(&namespace, &name, &status).await {
        ctx.metrics.record_reconcile_error(&namespace, &name, "status");
        return Err(e);
    }

    info!(ready, total = status.endpoint_count, "reconciled endpoint policy");
    Ok(Action::requeue(ctx.config.resync_interval))
}

/// Error policy for the controller
///
/// Requeues after the configured error backoff.
pub fn error_policy(policy: Arc<EndpointPolicy>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        policy = %policy.name_any(),
        "reconciliation failed"
    );
    Action::requeue(ctx.config.error_requeue)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc as StdArc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::compiler::test_fixtures::{endpoint_policy, http_endpoint};
    use crate::controller::MockKubeClient;
    use crate::crd::{
        ConditionStatus, EndpointPolicyStatus, READY_CONDITION, REASON_ALL_READY,
        REASON_VALIDATION_FAILED,
    };
    use crate::metrics::MockMetricsSink;

    /// Captures status patches for later verification
    #[derive(Clone, Default)]
    struct StatusCapture {
        updates: StdArc<Mutex<Vec<EndpointPolicyStatus>>>,
    }

    impl StatusCapture {
        fn record(&self, status: EndpointPolicyStatus) {
            self.updates.lock().unwrap().push(status);
        }

        fn last(&self) -> Option<EndpointPolicyStatus> {
            self.updates.lock().unwrap().last().cloned()
        }

        fn count(&self) -> usize {
            self.updates.lock().unwrap().len()
        }
    }

    /// Mock where nothing exists yet and every write succeeds
    fn empty_cluster(capture: &StatusCapture) -> MockKubeClient {
        let capture = capture.clone();
        let mut mock = MockKubeClient::new();
        mock.expect_get().returning(|_, _, _| Ok(None));
        mock.expect_create().returning(|_, _, obj| Ok(obj.clone()));
        mock.expect_list().returning(|_, _, _| Ok(Vec::new()));
        mock.expect_patch_status().returning(move |_, _, status| {
            capture.record(status.clone());
            Ok(())
        });
        mock
    }

    mod reconcile_flow {
        use super::*;

        /// Story: a fresh valid policy converges and reports Ready
        #[tokio::test]
        async fn story_fresh_policy_becomes_ready() {
            let capture = StatusCapture::default();
            let ctx = Arc::new(Context::for_testing(Arc::new(empty_cluster(&capture))));
            let policy = Arc::new(endpoint_policy(vec![http_endpoint("lookup", "/api/lookup")]));

            let action = reconcile(policy, ctx).await.unwrap();

            assert_eq!(action, Action::requeue(Duration::from_secs(300)));
            let status = capture.last().unwrap();
            assert_eq!(status.endpoint_count, 1);
            assert!(status.endpoint_statuses[0].ready);
            assert_eq!(status.endpoint_statuses[0].deployment_name, "my-app-lookup");
            assert_eq!(status.endpoint_statuses[0].service_name, "my-app-lookup-svc");
            assert_eq!(status.endpoint_statuses[0].route_name, "my-app-lookup");
            let ready = status.get_condition(READY_CONDITION).unwrap();
            assert_eq!(ready.status, ConditionStatus::True);
            assert_eq!(ready.reason, REASON_ALL_READY);
        }

        /// Story: an invalid policy writes no children and waits for a spec change
        #[tokio::test]
        async fn story_invalid_policy_waits_for_change() {
            let capture = StatusCapture::default();
            let capture_clone = capture.clone();
            let mut mock = MockKubeClient::new();
            mock.expect_get().never();
            mock.expect_create().never();
            mock.expect_list().never();
            mock.expect_patch_status().returning(move |_, _, status| {
                capture_clone.record(status.clone());
                Ok(())
            });
            let ctx = Arc::new(Context::for_testing(Arc::new(mock)));

            let mut policy = endpoint_policy(vec![http_endpoint("lookup", "/api/lookup")]);
            policy.spec.gateway_ref.name.clear();

            let action = reconcile(Arc::new(policy), ctx).await.unwrap();

            assert_eq!(action, Action::await_change());
            let status = capture.last().unwrap();
            let ready = status.get_condition(READY_CONDITION).unwrap();
            assert_eq!(ready.status, ConditionStatus::False);
            assert_eq!(ready.reason, REASON_VALIDATION_FAILED);
            assert!(ready.message.contains("spec.gatewayRef.name"));
        }

        /// Story: a duplicate id is rejected before any cluster access
        #[tokio::test]
        async fn story_duplicate_ids_rejected() {
            let capture = StatusCapture::default();
            let capture_clone = capture.clone();
            let mut mock = MockKubeClient::new();
            mock.expect_get().never();
            mock.expect_patch_status().returning(move |_, _, status| {
                capture_clone.record(status.clone());
                Ok(())
            });
            let ctx = Arc::new(Context::for_testing(Arc::new(mock)));
            let policy = endpoint_policy(vec![http_endpoint("dup", "/a"), http_endpoint("dup", "/b")]);

            reconcile(Arc::new(policy), ctx).await.unwrap();

            let message = capture.last().unwrap().conditions[0].message.clone();
            assert!(message.contains("spec.endpoints[1].id"), "{message}");
            assert!(message.contains("Duplicate value"), "{message}");
        }

        #[tokio::test]
        async fn test_missing_namespace_is_an_error() {
            let ctx = Arc::new(Context::for_testing(Arc::new(MockKubeClient::new())));
            let mut policy = endpoint_policy(vec![http_endpoint("lookup", "/api/lookup")]);
            policy.metadata.namespace = None;

            let err = reconcile(Arc::new(policy), ctx).await.unwrap_err();
            assert!(matches!(err, Error::MissingNamespace));
        }
    }

    mod failure_propagation {
        use super::*;

        /// Story: garbage collection failure fails the pass before the status write
        #[tokio::test]
        async fn story_gc_failure_skips_status_write() {
            let mut mock = MockKubeClient::new();
            mock.expect_get().returning(|_, _, _| Ok(None));
            mock.expect_create().returning(|_, _, obj| Ok(obj.clone()));
            mock.expect_list()
                .returning(|_, _, _| Err(Error::conflict("list interrupted")));
            mock.expect_patch_status().never();
            let ctx = Arc::new(Context::for_testing(Arc::new(mock)));
            let policy = Arc::new(endpoint_policy(vec![http_endpoint("lookup", "/api/lookup")]));

            assert!(reconcile(policy, ctx).await.is_err());
        }

        /// Story: the final status write failing fails the pass
        #[tokio::test]
        async fn story_status_write_failure_propagates() {
            let mut mock = MockKubeClient::new();
            mock.expect_get().returning(|_, _, _| Ok(None));
            mock.expect_create().returning(|_, _, obj| Ok(obj.clone()));
            mock.expect_list().returning(|_, _, _| Ok(Vec::new()));
            mock.expect_patch_status()
                .returning(|_, _, _| Err(Error::MissingNamespace));
            let ctx = Arc::new(Context::for_testing(Arc::new(mock)));
            let policy = Arc::new(endpoint_policy(vec![http_endpoint("lookup", "/api/lookup")]));

            assert!(reconcile(policy, ctx).await.is_err());
        }

        /// Story: one endpoint failing still lets its sibling converge
        #[tokio::test]
        async fn story_endpoint_failure_is_isolated() {
            let capture = StatusCapture::default();
            let capture_clone = capture.clone();
            let mut mock = MockKubeClient::new();
            mock.expect_get().returning(|_, _, _| Ok(None));
            mock.expect_create().returning(|_, _, obj| {
                if obj.metadata.name.as_deref() == Some("my-app-broken") {
                    Err(Error::MissingNamespace)
                } else {
                    Ok(obj.clone())
                }
            });
            mock.expect_list().returning(|_, _, _| Ok(Vec::new()));
            mock.expect_patch_status().returning(move |_, _, status| {
                capture_clone.record(status.clone());
                Ok(())
            });
            let ctx = Arc::new(Context::for_testing(Arc::new(mock)));
            let policy = Arc::new(endpoint_policy(vec![
                http_endpoint("broken", "/broken"),
                http_endpoint("fine", "/fine"),
            ]));

            let action = reconcile(policy, ctx).await.unwrap();

            assert_eq!(action, Action::requeue(Duration::from_secs(300)));
            assert_eq!(capture.count(), 1);
            let status = capture.last().unwrap();
            assert!(!status.endpoint_statuses[0].ready);
            assert!(status.endpoint_statuses[0]
                .message
                .starts_with("Deployment error: "));
            assert!(status.endpoint_statuses[1].ready);
            let ready = status.get_condition(READY_CONDITION).unwrap();
            assert_eq!(ready.message, "1/2 endpoints ready");
        }
    }

    mod metrics_reporting {
        use super::*;

        #[tokio::test]
        async fn test_validation_failure_is_counted() {
            let mut metrics = MockMetricsSink::new();
            metrics
                .expect_record_reconcile_error()
                .withf(|ns, policy, error_type| {
                    ns == "shop" && policy == "checkout" && error_type == "validation"
                })
                .times(1)
                .return_const(());
            metrics.expect_record_endpoints().never();

            let mut mock = MockKubeClient::new();
            mock.expect_patch_status().returning(|_, _, _| Ok(()));
            let ctx = Arc::new(
                Context::for_testing(Arc::new(mock)).with_metrics(Arc::new(metrics)),
            );
            let mut policy = endpoint_policy(vec![http_endpoint("lookup", "/api/lookup")]);
            policy.spec.endpoints.clear();

            reconcile(Arc::new(policy), ctx).await.unwrap();
        }

        #[tokio::test]
        async fn test_converged_pass_reports_totals_and_info() {
            let mut metrics = MockMetricsSink::new();
            metrics
                .expect_record_endpoint_info()
                .withf(|_, _, endpoint, type_, strategy| {
                    endpoint == "lookup" && type_ == "http" && strategy == "primary"
                })
                .times(1)
                .return_const(());
            metrics
                .expect_record_endpoints()
                .withf(|_, _, total, ready| *total == 1 && *ready == 1)
                .times(1)
                .return_const(());
            metrics.expect_record_reconcile_error().never();

            let capture = StatusCapture::default();
            let ctx = Arc::new(
                Context::for_testing(Arc::new(empty_cluster(&capture)))
                    .with_metrics(Arc::new(metrics)),
            );
            let policy = Arc::new(endpoint_policy(vec![http_endpoint("lookup", "/api/lookup")]));

            reconcile(policy, ctx).await.unwrap();
        }
    }

    mod error_policy_tests {
        use super::*;

        #[test]
        fn test_error_policy_requeues_after_backoff() {
            let ctx = Arc::new(Context::for_testing(Arc::new(MockKubeClient::new())));
            let policy = Arc::new(endpoint_policy(vec![]));

            let action = error_policy(policy, &Error::conflict("x"), ctx);
            assert_eq!(action, Action::requeue(Duration::from_secs(30)));
        }
    }
}
