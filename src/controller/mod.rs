//! Controller for EndpointPolicy
//!
//! One reconcile pass validates the policy, converges each endpoint's
//! children in spec order (Deployment, Service, route, HPA), deletes children
//! no endpoint wants anymore, and writes the aggregated status.

mod converge;
mod policy;
mod status;

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;

use crate::compiler::ChildKind;
use crate::config::ControllerConfig;
use crate::crd::{EndpointPolicy, EndpointPolicyStatus};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::retry::RetryConfig;
use crate::Error;

pub use converge::{
    plan_deletions, spec_converged, ChildAction, EndpointOutcome, Stage, LAST_APPLIED_ANNOTATION,
};
pub use policy::{error_policy, reconcile};
pub use status::{aggregate_status, endpoint_status, validation_failed_status};

/// Trait abstracting Kubernetes operations on child objects and policy status
///
/// Children are addressed by (kind, namespace, name). A missing object is
/// `Ok(None)` from `get` and `Ok(())` from `delete`; a lost write race is
/// [`Error::Conflict`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Fetch a child by name
    async fn get(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;

    /// Create a child
    async fn create(
        &self,
        kind: ChildKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Replace a child; `object` carries the resourceVersion it was read at
    async fn replace(
        &self,
        kind: ChildKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error>;

    /// Delete a child
    async fn delete(&self, kind: ChildKind, namespace: &str, name: &str) -> Result<(), Error>;

    /// List children of one kind matching a label selector
    async fn list(
        &self,
        kind: ChildKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, Error>;

    /// Patch the status of an EndpointPolicy
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &EndpointPolicyStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
    field_manager: String,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, kind: ChildKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

fn api_error_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

fn map_write_error(err: kube::Error, kind: ChildKind, name: &str) -> Error {
    match api_error_code(&err) {
        Some(409) => Error::conflict(format!("{kind} {name}: {err}")),
        _ => Error::Kube(err),
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        Ok(self.api(kind, namespace).get_opt(name).await?)
    }

    async fn create(
        &self,
        kind: ChildKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = object.metadata.name.clone().unwrap_or_default();
        self.api(kind, namespace)
            .create(&self.post_params(), object)
            .await
            .map_err(|e| map_write_error(e, kind, &name))
    }

    async fn replace(
        &self,
        kind: ChildKind,
        namespace: &str,
        object: &DynamicObject,
    ) -> Result<DynamicObject, Error> {
        let name = object.metadata.name.clone().unwrap_or_default();
        self.api(kind, namespace)
            .replace(&name, &self.post_params(), object)
            .await
            .map_err(|e| map_write_error(e, kind, &name))
    }

    async fn delete(&self, kind: ChildKind, namespace: &str, name: &str) -> Result<(), Error> {
        match self
            .api(kind, namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if api_error_code(&e) == Some(404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        kind: ChildKind,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<DynamicObject>, Error> {
        match self
            .api(kind, namespace)
            .list(&ListParams::default().labels(selector))
            .await
        {
            Ok(list) => Ok(list.items),
            // kind not served (e.g. Gateway API CRDs without GRPCRoute)
            Err(e) if api_error_code(&e) == Some(404) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &EndpointPolicyStatus,
    ) -> Result<(), Error> {
        let api: Api<EndpointPolicy> = Api::namespaced(self.client.clone(), namespace);

        let status_patch = serde_json::json!({
            "status": status
        });

        api.patch_status(
            name,
            &PatchParams::apply(&self.field_manager),
            &Patch::Merge(&status_patch),
        )
        .await?;

        Ok(())
    }
}

/// Controller context passed to every reconcile call
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Metrics destination
    pub metrics: Arc<dyn MetricsSink>,
    /// Runtime settings
    pub config: ControllerConfig,
}

impl Context {
    /// Create a controller context backed by a real cluster
    pub fn new(client: Client, metrics: Arc<dyn MetricsSink>, config: ControllerConfig) -> Self {
        let kube = Arc::new(KubeClientImpl::new(client, config.field_manager.clone()));
        Self {
            kube,
            metrics,
            config,
        }
    }

    /// Create a context for testing with a custom client
    ///
    /// Conflict retries run without delay and metrics are dropped.
    pub fn for_testing(kube: Arc<dyn KubeClient>) -> Self {
        Self {
            kube,
            metrics: Arc::new(NoopMetrics),
            config: ControllerConfig {
                conflict_retry: RetryConfig::immediate(3),
                ..Default::default()
            },
        }
    }

    /// Replace the metrics sink
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }
}
