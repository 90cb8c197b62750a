//! Error types for the Unified Replication Operator
//!
//! Every failure a reconciliation pass can hit maps onto one of a small set
//! of reason tokens that end up in the `Ready` condition of the intent.

use thiserror::Error;

/// Reason token for a missing or invalid replication class
pub const REASON_CONFIGURATION: &str = "ConfigurationError";
/// Reason token for an unclassifiable provisioner
pub const REASON_CLASSIFICATION: &str = "ClassificationError";
/// Reason token for a failed backend adapter call
pub const REASON_ADAPTER: &str = "AdapterError";
/// Reason token for selector problems in the group variant
pub const REASON_SELECTOR: &str = "SelectorError";
/// Reason token for a failed teardown
pub const REASON_DELETION: &str = "DeletionError";
/// Reason token for anything else
pub const REASON_INTERNAL: &str = "InternalError";

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("{kind} {name} changed since it was read (resourceVersion {expected})")]
    Conflict {
        kind: String,
        name: String,
        expected: String,
    },

    // =========================================================================
    // Replication Class Errors
    // =========================================================================
    #[error("replication class {name} not found")]
    ClassNotFound { name: String },

    #[error("replication class {name} is invalid: {reason}")]
    InvalidClass { name: String, reason: String },

    // =========================================================================
    // Classification / Registry Errors
    // =========================================================================
    #[error("unknown backend for provisioner \"{provisioner}\"")]
    UnknownBackend { provisioner: String },

    #[error("no adapter registered for backend {backend}")]
    AdapterNotFound { backend: String },

    #[error("adapter for backend {backend} is already registered")]
    DuplicateRegistration { backend: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    #[error("Backend operation failed: {backend} - {operation}: {reason}")]
    BackendOperationFailed {
        backend: String,
        operation: String,
        reason: String,
    },

    #[error("{backend} adapter reconcile failed: {source}")]
    Adapter {
        backend: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{backend} adapter delete failed: {source}")]
    Deletion {
        backend: String,
        #[source]
        source: Box<Error>,
    },

    // =========================================================================
    // Selector Errors
    // =========================================================================
    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    #[error("no volumes matched selector \"{selector}\" in namespace {namespace}")]
    NoVolumesMatched { namespace: String, selector: String },

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    /// Machine-readable reason token recorded in the `Ready` condition
    pub fn reason(&self) -> &'static str {
        match self {
            Error::ClassNotFound { .. } | Error::InvalidClass { .. } => REASON_CONFIGURATION,
            Error::UnknownBackend { .. } | Error::AdapterNotFound { .. } => REASON_CLASSIFICATION,
            Error::Adapter { .. } | Error::BackendOperationFailed { .. } => REASON_ADAPTER,
            Error::Deletion { .. } => REASON_DELETION,
            Error::InvalidSelector(_) | Error::NoVolumesMatched { .. } => REASON_SELECTOR,
            Error::Configuration(_) => REASON_CONFIGURATION,
            _ => REASON_INTERNAL,
        }
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Kube(_) | Error::Conflict { .. } | Error::BackendOperationFailed { .. } => true,
            Error::Adapter { source, .. } | Error::Deletion { source, .. } => {
                source.is_transient()
            }
            _ => false,
        }
    }

    /// Whether this error is a Kubernetes "not found" response
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(response)) if response.code == 404)
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;
