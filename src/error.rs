//! Error types for the multiarch tuning operator

use crate::controllers::Barrier;
use std::fmt;

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors that can occur during operator operations
#[derive(Debug)]
pub enum OperatorError {
    /// Kubernetes API error (network, conflict, throttling, ...)
    KubeApi(String),
    /// Resource not found
    NotFound(String),
    /// Configuration error
    Configuration(String),
    /// Reconciliation error
    Reconciliation(String),
    /// Serialization error
    Serialization(String),
    /// Invalid resource state
    InvalidState(String),
    /// HTTP server failure (health probes, admission)
    Server(String),
    /// A teardown barrier is not satisfied yet; retry later
    Barrier(Barrier),
    /// Owner references could not be set on one or more dependents
    OwnerReferences(Vec<String>),
}

impl OperatorError {
    /// True for errors that mean "the object is already gone".
    pub fn is_not_found(&self) -> bool {
        matches!(self, OperatorError::NotFound(_))
    }

    /// True for barrier sentinels, which are expected and not alarms.
    pub fn is_barrier(&self) -> bool {
        matches!(self, OperatorError::Barrier(_))
    }
}

impl fmt::Display for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorError::KubeApi(msg) => write!(f, "Kubernetes API error: {}", msg),
            OperatorError::NotFound(msg) => write!(f, "Resource not found: {}", msg),
            OperatorError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            OperatorError::Reconciliation(msg) => write!(f, "Reconciliation error: {}", msg),
            OperatorError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            OperatorError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            OperatorError::Server(msg) => write!(f, "Server error: {}", msg),
            OperatorError::Barrier(barrier) => write!(f, "{}", barrier),
            OperatorError::OwnerReferences(errors) => {
                write!(f, "failed to set owner references: {}", errors.join("; "))
            }
        }
    }
}

impl std::error::Error for OperatorError {}

impl From<kube::Error> for OperatorError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => OperatorError::NotFound(ae.message),
            other => OperatorError::KubeApi(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(err: serde_json::Error) -> Self {
        OperatorError::Serialization(err.to_string())
    }
}

impl From<Barrier> for OperatorError {
    fn from(barrier: Barrier) -> Self {
        OperatorError::Barrier(barrier)
    }
}

/// Treat "not found" as success; surface everything else.
pub fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
