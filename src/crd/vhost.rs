//! Vhost custom resource

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{DeletionPolicy, RabbitmqClusterReference, TopologyStatus};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Vhost",
    namespaced,
    status = "TopologyStatus",
    category = "rabbitmq",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VhostSpec {
    pub name: String,

    #[serde(default)]
    pub tracing: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Queue type used when clients declare queues without x-queue-type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_queue_type: Option<String>,

    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}
