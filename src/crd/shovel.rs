//! Shovel and Federation custom resources
//!
//! Both are runtime parameters on the broker whose URIs live in a secret.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    default_vhost, DeletionPolicy, RabbitmqClusterReference, SecretReference, TopologyStatus,
};

/// Dynamic shovel moving messages between two brokers
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Shovel",
    namespaced,
    status = "TopologyStatus",
    category = "rabbitmq",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ShovelSpec {
    pub name: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Secret with `srcUri` and `destUri` keys (comma-separated lists allowed)
    pub uri_secret: SecretReference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_exchange_key: Option<String>,
    /// amqp091 or amqp10
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_protocol: Option<String>,
    /// Number of messages or "never"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_delete_after: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_exchange_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_protocol: Option<String>,
    #[serde(default)]
    pub dest_add_forward_headers: bool,
    #[serde(default)]
    pub dest_add_timestamp_header: bool,

    /// on-confirm, on-publish or no-ack
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefetch_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_delay: Option<u32>,

    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}

/// Federation upstream definition
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Federation",
    namespaced,
    status = "TopologyStatus",
    category = "rabbitmq",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FederationSpec {
    pub name: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Secret with a `uri` key (comma-separated list allowed)
    pub uri_secret: SecretReference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hops: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_ttl: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefetch_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_delay: Option<u32>,
    #[serde(default)]
    pub trust_user_id: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_mode: Option<String>,

    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}
