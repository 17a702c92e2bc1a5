//! SchemaReplication custom resource

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{RabbitmqClusterReference, SecretReference, TopologyStatus};

/// Global parameter naming the schema sync upstream
pub const SCHEMA_REPLICATION_PARAMETER: &str = "schema_definition_sync_upstream";

/// Configures schema definition replication from an upstream cluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "SchemaReplication",
    namespaced,
    status = "TopologyStatus",
    category = "rabbitmq",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SchemaReplicationSpec {
    /// Secret with `username` and `password` for the upstream
    pub upstream_secret: SecretReference,

    /// Comma-separated upstream endpoints (`host:port`)
    pub endpoints: String,

    pub rabbitmq_cluster_reference: RabbitmqClusterReference,
}

impl SchemaReplicationSpec {
    pub fn endpoint_list(&self) -> Vec<String> {
        self.endpoints
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
            .collect()
    }
}
