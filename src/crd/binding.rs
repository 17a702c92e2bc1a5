//! Binding custom resource

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{default_vhost, free_form_object, RabbitmqClusterReference, TopologyStatus};

/// Routes messages from an exchange to a queue or another exchange
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Binding",
    namespaced,
    status = "TopologyStatus",
    category = "rabbitmq",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BindingSpec {
    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Source exchange
    #[serde(default)]
    pub source: String,

    #[serde(default)]
    pub destination: String,

    /// `queue` or `exchange`
    #[serde(default)]
    pub destination_type: String,

    #[serde(default)]
    pub routing_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "free_form_object")]
    pub arguments: Option<serde_json::Value>,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}

impl BindingSpec {
    /// The fields that identify a binding on the broker.
    pub fn identity(&self) -> (&str, &str, &str, &str, &str) {
        (
            &self.vhost,
            &self.source,
            &self.destination,
            &self.destination_type,
            &self.routing_key,
        )
    }
}
