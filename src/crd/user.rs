//! User and Permission custom resources

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{default_vhost, RabbitmqClusterReference, SecretReference, TopologyStatus};

/// A broker user. The broker-side username is taken from the imported
/// credentials secret, or the object name when no secret is given.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "User",
    namespaced,
    status = "TopologyStatus",
    category = "rabbitmq",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UserSpec {
    /// management, policymaker, monitoring, administrator
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Secret with `username` and `password` keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_credentials_secret: Option<SecretReference>,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct VhostPermissions {
    #[serde(default)]
    pub configure: String,
    #[serde(default)]
    pub write: String,
    #[serde(default)]
    pub read: String,
}

/// Grants a user configure/write/read permissions in a vhost
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Permission",
    namespaced,
    status = "TopologyStatus",
    category = "rabbitmq",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSpec {
    #[serde(default = "default_vhost")]
    pub vhost: String,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub permissions: VhostPermissions,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}
