//! Integration tests for EndpointPolicy CRD operations
//!
//! These tests tell the story of how users author EndpointPolicy resources
//! through the Kubernetes API.

use kube::api::{Api, DeleteParams, PostParams};

use endpoint_scaler::crd::{EndpointPolicy, EndpointType, Strategy};

use super::helpers::{ensure_test_cluster, fresh_namespace};

const NAMESPACE: &str = "es-crd-test";

fn sample_policy(name: &str) -> EndpointPolicy {
    serde_yaml::from_str(&format!(
        r#"
apiVersion: endpointscaler.io/v1alpha1
kind: EndpointPolicy
metadata:
  name: {name}
spec:
  appRef:
    name: my-app
    image: my-app:v1
  gatewayRef:
    name: gw
  endpoints:
    - id: lookup
      type: http
      match:
        path: /api/lookup
      strategy: canary
      canaryWeight: 10
    - id: authorize
      type: grpc
      match:
        service: payments.Payments
        method: Authorize
      hpa:
        min: 2
        max: 10
        cpuTarget: 70
"#
    ))
    .expect("valid policy yaml")
}

/// Story: an application team registers an EndpointPolicy
///
/// Expected behavior:
/// - The resource is accepted by the API server
/// - Endpoint type, strategy and canary weight round-trip through storage
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_team_creates_endpoint_policy() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    fresh_namespace(&client, NAMESPACE)
        .await
        .expect("failed to create namespace");
    let api: Api<EndpointPolicy> = Api::namespaced(client, NAMESPACE);

    api.create(&PostParams::default(), &sample_policy("checkout"))
        .await
        .expect("failed to create policy");

    let stored = api.get("checkout").await.expect("failed to read policy");
    assert_eq!(stored.spec.endpoints.len(), 2);
    assert_eq!(stored.spec.endpoints[0].strategy, Strategy::Canary);
    assert_eq!(stored.spec.endpoints[0].canary_weight, Some(10));
    assert_eq!(stored.spec.endpoints[1].type_, EndpointType::Grpc);
    assert!(stored.spec.validate().is_ok());

    api.delete("checkout", &DeleteParams::default())
        .await
        .expect("failed to delete policy");
}
