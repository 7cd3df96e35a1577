//! Error types for the endpoint-scaler operator

use thiserror::Error;

use crate::crd::ValidationErrors;

/// Main error type for endpoint-scaler operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The policy spec failed semantic validation
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    /// A desired child object could not be built for one endpoint
    #[error("{0}")]
    Build(#[from] BuildError),

    /// A write raced another writer on the same object (409 from the API server)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The policy object has no namespace
    #[error("missing namespace on EndpointPolicy")]
    MissingNamespace,
}

impl Error {
    /// Create a conflict error with the given message
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Whether this error is an optimistic concurrency conflict worth retrying
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Short label used when counting errors by type
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Kube(_) => "kube",
            Self::Validation(_) => "validation",
            Self::Build(_) => "build",
            Self::Conflict(_) => "conflict",
            Self::Serialization(_) => "serialization",
            Self::MissingNamespace => "missing_namespace",
        }
    }
}

/// Failures while building the desired objects of a single endpoint
///
/// These are scoped to the endpoint being built and never block its siblings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// `appRef.image` is empty
    #[error("appRef.image is required")]
    MissingImage,

    /// Canary routing needs the application's main service to exist
    #[error("canary strategy requires main service {namespace}/{name} to exist")]
    MissingMainService {
        /// Namespace that was searched
        namespace: String,
        /// Expected main service name
        name: String,
    },
}
