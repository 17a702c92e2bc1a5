//! Policy custom resource

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{default_vhost, free_form_object, RabbitmqClusterReference, TopologyStatus};

/// Values accepted for `applyTo`
pub const POLICY_APPLY_TO: [&str; 3] = ["queues", "exchanges", "all"];

pub(crate) fn default_apply_to() -> String {
    "all".to_string()
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "Policy",
    plural = "policies",
    namespaced,
    status = "TopologyStatus",
    category = "rabbitmq",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    pub name: String,

    #[serde(default = "default_vhost")]
    pub vhost: String,

    /// Regular expression matched against queue/exchange names
    pub pattern: String,

    #[serde(default = "default_apply_to")]
    pub apply_to: String,

    #[serde(default)]
    pub priority: i32,

    #[schemars(schema_with = "free_form_object")]
    pub definition: serde_json::Value,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}
