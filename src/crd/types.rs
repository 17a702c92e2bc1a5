//! Shared types used across topology custom resources

use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default vhost for topology objects
pub const DEFAULT_VHOST: &str = "/";

pub(crate) fn default_vhost() -> String {
    DEFAULT_VHOST.to_string()
}

/// Schema for free-form argument maps (`x-arguments`, policy definitions)
pub(crate) fn free_form_object(_gen: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schema.extensions.insert("nullable".to_string(), serde_json::Value::Bool(true));
    Schema::Object(schema)
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready", "Degraded")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    /// The .metadata.generation the condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Reference to a secret in the same namespace as the referencing object
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretReference {
    pub name: String,
}

/// Which RabbitMQ cluster a topology object belongs to.
///
/// Exactly one of `name` or `connectionSecret` must be set. `namespace` is
/// only meaningful together with `name` and defaults to the object's own
/// namespace.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RabbitmqClusterReference {
    /// Name of a RabbitmqCluster object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Namespace of the RabbitmqCluster object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Secret holding `uri`, `username` and `password` of a cluster not
    /// managed in this Kubernetes cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_secret: Option<SecretReference>,
}

/// A validated cluster reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterTarget<'a> {
    InCluster {
        name: &'a str,
        namespace: Option<&'a str>,
    },
    ConnectionSecret {
        name: &'a str,
    },
}

impl RabbitmqClusterReference {
    pub fn in_cluster(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn connection_secret(secret: &str) -> Self {
        Self {
            connection_secret: Some(SecretReference {
                name: secret.to_string(),
            }),
            ..Default::default()
        }
    }

    /// Check that exactly one mode is set and return it.
    pub fn target(&self) -> Result<ClusterTarget<'_>, String> {
        let name = self.name.as_deref().filter(|n| !n.is_empty());
        let secret = self
            .connection_secret
            .as_ref()
            .map(|s| s.name.as_str())
            .filter(|n| !n.is_empty());

        match (name, secret) {
            (Some(name), None) => Ok(ClusterTarget::InCluster {
                name,
                namespace: self.namespace.as_deref().filter(|n| !n.is_empty()),
            }),
            (None, Some(name)) => {
                if self.namespace.as_deref().is_some_and(|n| !n.is_empty()) {
                    Err("namespace cannot be set together with connectionSecret".to_string())
                } else {
                    Ok(ClusterTarget::ConnectionSecret { name })
                }
            }
            (Some(_), Some(_)) => {
                Err("only one of name or connectionSecret can be set".to_string())
            }
            (None, None) => Err("one of name or connectionSecret must be set".to_string()),
        }
    }
}

/// What happens to the broker object when the Kubernetes object is deleted
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeletionPolicy {
    #[default]
    Delete,
    Retain,
}

/// Status shared by all topology kinds
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TopologyStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Last generation fully reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Broker-side username (User only), remembered for deletion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}
