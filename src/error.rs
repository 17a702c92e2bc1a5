//! Error types for the RabbitMQ topology operator

use thiserror::Error;

use crate::rabbitmq::BrokerError;

/// Result type alias for operator operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors that can occur while reconciling topology objects
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Optimistic-concurrency conflict on a write
    #[error("Conflict writing {0}: object was modified concurrently")]
    Conflict(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Referenced RabbitmqCluster does not exist
    #[error("RabbitmqCluster {0} not found")]
    ClusterNotFound(String),

    /// Referenced RabbitmqCluster exists but cannot be used yet
    #[error("RabbitmqCluster {0} is not ready: {1}")]
    ClusterNotReady(String, String),

    /// Secret named by `connectionSecret` does not exist
    #[error("connection secret {0} not found")]
    ConnectionSecretNotFound(String),

    /// A secret exists but is missing keys or holds unusable values
    #[error("secret {name} is malformed: {message}")]
    MalformedSecret { name: String, message: String },

    /// Cross-namespace reference to a cluster that does not allow it
    #[error("RabbitmqCluster {cluster} does not allow topology objects from namespace {namespace}")]
    NamespaceNotAllowed { cluster: String, namespace: String },

    /// Cluster reference is structurally invalid
    #[error("invalid rabbitmqClusterReference: {0}")]
    InvalidReference(String),

    /// Error returned by the RabbitMQ management API
    #[error("RabbitMQ API error: {0}")]
    Broker(#[from] BrokerError),

    /// Spec validation failed
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Configuration error (startup only)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// External call did not complete in time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Admission webhook error
    #[error("Webhook error: {0}")]
    WebhookError(String),
}

impl Error {
    /// Transient errors are retried with exponential backoff; everything else
    /// waits for the next resync.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_)
            | Error::Conflict(_)
            | Error::ClusterNotFound(_)
            | Error::ClusterNotReady(..)
            | Error::Timeout(_) => true,
            Error::Broker(e) => e.is_transient(),
            _ => false,
        }
    }

    /// The object a cluster reference points at has been deleted.
    pub fn is_target_gone(&self) -> bool {
        matches!(
            self,
            Error::ClusterNotFound(_) | Error::ConnectionSecretNotFound(_)
        )
    }

    /// Condition reason written to the `Degraded` condition.
    pub fn reason(&self) -> &'static str {
        if self.is_retriable() {
            "Transient"
        } else {
            "Terminal"
        }
    }

    /// Short label used for metrics.
    pub fn metric_kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) | Error::Conflict(_) => "kube",
            Error::Broker(_) => "broker",
            Error::ClusterNotFound(_) | Error::ClusterNotReady(..) => "cluster",
            Error::ConnectionSecretNotFound(_) | Error::MalformedSecret { .. } => "secret",
            Error::Timeout(_) => "timeout",
            _ => "validation",
        }
    }
}
