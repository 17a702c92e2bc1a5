//! Queue custom resource

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    default_vhost, free_form_object, DeletionPolicy, RabbitmqClusterReference, TopologyStatus,
};

/// A queue declared on a RabbitMQ cluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Queue",
    namespaced,
    status = "TopologyStatus",
    category = "rabbitmq",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].reason"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct QueueSpec {
    /// Name of the queue on the broker
    pub name: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Queue type: classic, quorum or stream
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(default)]
    pub durable: bool,

    #[serde(default)]
    pub auto_delete: bool,

    /// Optional queue arguments (x-max-length, x-queue-leader-locator, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "free_form_object")]
    pub arguments: Option<serde_json::Value>,

    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}
