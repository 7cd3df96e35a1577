//! Integration tests for the endpoint-scaler operator
//!
//! These tests require a Kubernetes cluster (kind) to run.
//!
//! # Test Organization
//!
//! - `policy_crd`: Stories about creating and reading EndpointPolicy
//!   resources through the Kubernetes API
//!
//! - `controller_flow`: Stories about a reconcile pass against a real API
//!   server (children created, status written, children collected)
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored
//! ```

mod controller_flow;
mod helpers;
mod policy_crd;
