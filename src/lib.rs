//! endpoint-scaler - Kubernetes operator that splits endpoints out of an application
//!
//! An `EndpointPolicy` names an application, a Gateway and a list of endpoints.
//! Each endpoint gets its own Deployment, Service, optional
//! HorizontalPodAutoscaler and an HTTPRoute or GRPCRoute that sends matched
//! traffic to it, either fully (primary) or as a weighted canary next to the
//! application's main service.
//!
//! # Modules
//!
//! - [`crd`] - The EndpointPolicy custom resource, status types and validation
//! - [`controller`] - Reconciliation: convergence, garbage collection, status
//! - [`compiler`] - Composes the builders into the desired children of an endpoint
//! - [`workload`] - Workload types (Deployment, Service, HPA) and their builder
//! - [`route`] - Gateway API route types, route builder and weight calculator
//! - [`labels`] - Child naming, labels and the ownership index
//! - [`config`] - Controller configuration
//! - [`metrics`] - Metrics sink abstraction and OpenTelemetry implementation
//! - [`retry`] - Backoff for optimistic concurrency conflicts
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod compiler;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod labels;
pub mod metrics;
pub mod retry;
pub mod route;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
