//! SuperStream custom resource
//!
//! A super stream is a partitioned stream: one direct exchange, N stream
//! queues and N bindings. The controller materialises it as child Exchange,
//! Queue and Binding objects.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{default_vhost, RabbitmqClusterReference, TopologyStatus};

pub(crate) fn default_partitions() -> u32 {
    3
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rabbitmq.com",
    version = "v1alpha1",
    kind = "SuperStream",
    namespaced,
    status = "TopologyStatus",
    category = "rabbitmq",
    printcolumn = r#"{"name":"Partitions","type":"integer","jsonPath":".spec.partitions"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SuperStreamSpec {
    /// Name of the super stream on the broker
    pub name: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    #[serde(default = "default_partitions")]
    pub partitions: u32,

    /// Routing key per partition; partition indices are used when empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routing_keys: Vec<String>,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}

impl SuperStreamSpec {
    /// Routing key of partition `index`.
    pub fn routing_key(&self, index: usize) -> String {
        self.routing_keys
            .get(index)
            .cloned()
            .unwrap_or_else(|| index.to_string())
    }
}
