//! RabbitMQ broker capability
//!
//! The reconcilers only ever talk to a broker through [`BrokerClient`]: an
//! idempotent `declare` (PUT semantics) and an idempotent `delete`. The
//! production implementation is the management HTTP API client in
//! [`management`].

mod management;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use management::{ManagementClient, DEFAULT_CALL_TIMEOUT};

/// Broker-side object kinds the operator can declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BrokerKind {
    Queue,
    Exchange,
    Binding,
    Vhost,
    User,
    Permission,
    Policy,
    Shovel,
    Federation,
    SchemaReplication,
}

impl fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BrokerKind::Queue => "queue",
            BrokerKind::Exchange => "exchange",
            BrokerKind::Binding => "binding",
            BrokerKind::Vhost => "vhost",
            BrokerKind::User => "user",
            BrokerKind::Permission => "permission",
            BrokerKind::Policy => "policy",
            BrokerKind::Shovel => "shovel",
            BrokerKind::Federation => "federation",
            BrokerKind::SchemaReplication => "schema-replication",
        };
        f.write_str(s)
    }
}

/// External representation of one topology object.
///
/// `properties` is the management API request body. For bindings it also
/// carries the routing fields (`source`, `destination`, `destination_type`)
/// needed to build the request path.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BrokerObject {
    pub kind: BrokerKind,
    pub vhost: String,
    pub name: String,
    pub properties: serde_json::Value,
}

impl BrokerObject {
    pub fn new(
        kind: BrokerKind,
        vhost: impl Into<String>,
        name: impl Into<String>,
        properties: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            vhost: vhost.into(),
            name: name.into(),
            properties,
        }
    }
}

/// Outcome of a failed broker call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    /// The object does not exist on the broker
    #[error("object not found")]
    NotFound,

    /// 4xx: the broker refused the request (bad arguments, precondition failed)
    #[error("request rejected with HTTP {status}: {message}")]
    Rejected { status: u16, message: String },

    /// 5xx: the broker is not ready or failed internally
    #[error("broker unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    /// Connection refused, reset, DNS failure or timeout
    #[error("network error: {0}")]
    Network(String),

    /// The broker answered with something we could not interpret
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BrokerError::Unavailable { .. } | BrokerError::Network(_))
    }

    /// Map an HTTP status and body to an error.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            404 => BrokerError::NotFound,
            400..=499 => BrokerError::Rejected {
                status,
                message: message.into(),
            },
            _ => BrokerError::Unavailable {
                status,
                message: message.into(),
            },
        }
    }
}

/// Opaque broker API capability.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Create the object if absent, update it if present.
    async fn declare(&self, object: &BrokerObject) -> Result<(), BrokerError>;

    /// Delete the object by identity. Returns `BrokerError::NotFound` when it
    /// is already gone.
    async fn delete(&self, object: &BrokerObject) -> Result<(), BrokerError>;
}
