//! RabbitmqCluster, as published by the cluster operator
//!
//! Only the fields needed to reach a cluster's management API are modelled.
//! The CRD itself is owned by the cluster operator and is never generated
//! from here.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation listing namespaces allowed to reference a cluster
/// (comma-separated, `*` for all)
pub const ALLOWED_NAMESPACES_ANNOTATION: &str = "rabbitmq.com/topology-allowed-namespaces";

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "rabbitmq.com",
    version = "v1beta1",
    kind = "RabbitmqCluster",
    namespaced,
    status = "RabbitmqClusterStatus",
    shortname = "rmq"
)]
#[serde(rename_all = "camelCase")]
pub struct RabbitmqClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ClusterTls>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTls {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_secret_name: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RabbitmqClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_user: Option<DefaultUser>,
}

/// Where the cluster operator published the admin credentials and service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DefaultUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_reference: Option<ClusterSecretReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_reference: Option<ServiceReference>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct ClusterSecretReference {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    /// Maps logical keys (`username`, `password`) to keys in the secret
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
pub struct ServiceReference {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

impl RabbitmqCluster {
    pub fn tls_enabled(&self) -> bool {
        self.spec
            .tls
            .as_ref()
            .and_then(|t| t.secret_name.as_deref())
            .is_some_and(|s| !s.is_empty())
    }

    pub fn ca_secret_name(&self) -> Option<&str> {
        self.spec
            .tls
            .as_ref()
            .and_then(|t| t.ca_secret_name.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// Whether objects in `namespace` may use this cluster.
    pub fn allows_namespace(&self, namespace: &str) -> bool {
        if self.metadata.namespace.as_deref() == Some(namespace) {
            return true;
        }
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(ALLOWED_NAMESPACES_ANNOTATION))
            .is_some_and(|allowed| {
                allowed
                    .split(',')
                    .map(str::trim)
                    .any(|ns| ns == "*" || ns == namespace)
            })
    }
}
