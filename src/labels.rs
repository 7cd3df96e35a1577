//! Child naming, labeling, and the ownership index
//!
//! Names are `{app}-{id}` for the workload, autoscaler and route and
//! `{app}-{id}-svc` for the service; the application's own service is
//! `{app}-svc`. Ownership is expressed through labels only, so the index of
//! which children belong to which endpoint is rebuilt from a label-filtered
//! list on every pass.

use std::collections::BTreeMap;

use kube::api::DynamicObject;

use crate::compiler::ChildKind;
use crate::config::LabelScheme;

/// Name of the endpoint workload, autoscaler and route
pub fn endpoint_resource_name(app: &str, endpoint_id: &str) -> String {
    format!("{app}-{endpoint_id}")
}

/// Name of the endpoint service
pub fn endpoint_service_name(app: &str, endpoint_id: &str) -> String {
    format!("{app}-{endpoint_id}-svc")
}

/// Name of the application's pre-existing main service
pub fn main_service_name(app: &str) -> String {
    format!("{app}-svc")
}

/// Deterministic names for every child of one endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildNames {
    /// Deployment name
    pub workload: String,
    /// Service name
    pub service: String,
    /// HTTPRoute / GRPCRoute name
    pub route: String,
    /// HorizontalPodAutoscaler name
    pub autoscaler: String,
}

impl ChildNames {
    /// Names for endpoint `endpoint_id` of application `app`
    pub fn new(app: &str, endpoint_id: &str) -> Self {
        let base = endpoint_resource_name(app, endpoint_id);
        Self {
            workload: base.clone(),
            service: endpoint_service_name(app, endpoint_id),
            route: base.clone(),
            autoscaler: base,
        }
    }
}

impl LabelScheme {
    /// Full label set stamped on every child of an endpoint
    pub fn child_labels(
        &self,
        policy: &str,
        app: &str,
        endpoint_id: &str,
    ) -> BTreeMap<String, String> {
        BTreeMap::from([
            (self.app_key.clone(), app.to_string()),
            (self.component_key.clone(), endpoint_id.to_string()),
            (self.managed_by_key.clone(), self.managed_by_value.clone()),
            (self.policy_key.clone(), policy.to_string()),
            (self.endpoint_key.clone(), endpoint_id.to_string()),
        ])
    }

    /// Label selector matching every child owned by `policy`
    pub fn policy_selector(&self, policy: &str) -> String {
        format!(
            "{}={},{}={}",
            self.policy_key, policy, self.managed_by_key, self.managed_by_value
        )
    }

    /// Endpoint id recorded on a child, if any
    pub fn endpoint_of<'a>(&self, labels: &'a BTreeMap<String, String>) -> Option<&'a str> {
        labels.get(&self.endpoint_key).map(String::as_str)
    }
}

/// One observed child object
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChildRef {
    /// Resource kind
    pub kind: ChildKind,
    /// Object name
    pub name: String,
}

/// Children owned by one policy, grouped by endpoint id
///
/// Children missing the endpoint label are grouped under the empty id, which
/// no valid endpoint can claim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OwnedChildren {
    by_endpoint: BTreeMap<String, Vec<ChildRef>>,
}

impl OwnedChildren {
    /// Record observed objects of one kind
    pub fn extend(&mut self, scheme: &LabelScheme, kind: ChildKind, objects: &[DynamicObject]) {
        for obj in objects {
            let Some(name) = obj.metadata.name.clone() else {
                continue;
            };
            let endpoint = obj
                .metadata
                .labels
                .as_ref()
                .and_then(|labels| scheme.endpoint_of(labels))
                .unwrap_or_default();
            self.insert(endpoint, ChildRef { kind, name });
        }
    }

    /// Record a single child
    pub fn insert(&mut self, endpoint_id: &str, child: ChildRef) {
        self.by_endpoint
            .entry(endpoint_id.to_string())
            .or_default()
            .push(child);
    }

    /// Endpoint ids with at least one child
    pub fn endpoint_ids(&self) -> impl Iterator<Item = &str> {
        self.by_endpoint.keys().map(String::as_str)
    }

    /// Children recorded for an endpoint
    pub fn children(&self, endpoint_id: &str) -> &[ChildRef] {
        self.by_endpoint
            .get(endpoint_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Total number of children
    pub fn len(&self) -> usize {
        self.by_endpoint.values().map(Vec::len).sum()
    }

    /// True when no child was observed
    pub fn is_empty(&self) -> bool {
        self.by_endpoint.is_empty()
    }
}
