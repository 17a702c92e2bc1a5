//! Exchange custom resource

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    default_vhost, free_form_object, DeletionPolicy, RabbitmqClusterReference, TopologyStatus,
};

pub(crate) fn default_exchange_type() -> String {
    "direct".to_string()
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Exchange",
    namespaced,
    status = "TopologyStatus",
    category = "rabbitmq",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Reason","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].reason"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSpec {
    pub name: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// direct, fanout, topic, headers or a plugin-provided type
    #[serde(default = "default_exchange_type", rename = "type")]
    pub type_: String,

    #[serde(default)]
    pub durable: bool,

    #[serde(default)]
    pub auto_delete: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "free_form_object")]
    pub arguments: Option<serde_json::Value>,

    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}
