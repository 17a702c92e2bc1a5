//! Resolution of `rabbitmqClusterReference` to management API connection
//! parameters
//!
//! Two modes are supported:
//! - in-cluster: a `RabbitmqCluster` object whose status publishes the
//!   default-user secret and the client service
//! - external: a secret holding `uri`, `username` and `password`
//!
//! Missing or not-yet-ready cluster objects are transient. A missing or
//! malformed connection secret is terminal until a human fixes it.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::debug;

use super::credentials::{
    required_secret_value, secret_value, CredentialsProvider, SecretCredentials,
};
use super::store::ReferenceStore;
use crate::crd::{ClusterTarget, RabbitmqCluster, RabbitmqClusterReference};
use crate::error::{Error, Result};

const MANAGEMENT_PORT: u16 = 15672;
const MANAGEMENT_TLS_PORT: u16 = 15671;
const CA_CERT_KEY: &str = "ca.crt";

/// Everything needed to build a management API client.
#[derive(Clone, Debug)]
pub struct ClusterConnection {
    /// Cache key: `cluster:<ns>/<name>` or `secret:<ns>/<name>`
    pub key: String,
    pub endpoint: String,
    pub ca_certificate: Option<Vec<u8>>,
    pub credentials: Arc<dyn CredentialsProvider>,
    /// resourceVersion(s) of the secrets the connection was built from
    pub source_resource_version: String,
}

impl ClusterConnection {
    /// Changes whenever a cached client for `key` must be rebuilt.
    pub fn fingerprint(&self) -> String {
        format!("{}|{}", self.endpoint, self.source_resource_version)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ClusterResolver {
    /// Suffix appended to `<svc>.<ns>.svc`, e.g. `.cluster.local`
    cluster_domain: String,
}

impl ClusterResolver {
    pub fn new(cluster_domain: impl Into<String>) -> Self {
        Self {
            cluster_domain: cluster_domain.into(),
        }
    }

    /// Resolve the reference of an object living in `object_namespace`.
    pub async fn resolve(
        &self,
        refs: &dyn ReferenceStore,
        reference: &RabbitmqClusterReference,
        object_namespace: &str,
    ) -> Result<ClusterConnection> {
        match reference.target().map_err(Error::InvalidReference)? {
            ClusterTarget::InCluster { name, namespace } => {
                let namespace = namespace.unwrap_or(object_namespace);
                self.resolve_cluster(refs, name, namespace, object_namespace)
                    .await
            }
            ClusterTarget::ConnectionSecret { name } => {
                resolve_connection_secret(refs, name, object_namespace).await
            }
        }
    }

    async fn resolve_cluster(
        &self,
        refs: &dyn ReferenceStore,
        name: &str,
        namespace: &str,
        object_namespace: &str,
    ) -> Result<ClusterConnection> {
        let id = format!("{namespace}/{name}");
        let cluster = refs
            .get_cluster(namespace, name)
            .await?
            .ok_or_else(|| Error::ClusterNotFound(id.clone()))?;

        if cluster.metadata.deletion_timestamp.is_some() {
            debug!(cluster = %id, "referenced cluster is being deleted");
            return Err(Error::ClusterNotFound(id));
        }

        if !cluster.allows_namespace(object_namespace) {
            return Err(Error::NamespaceNotAllowed {
                cluster: id,
                namespace: object_namespace.to_string(),
            });
        }

        let default_user = cluster
            .status
            .as_ref()
            .and_then(|s| s.default_user.as_ref())
            .ok_or_else(|| Error::ClusterNotReady(id.clone(), "no default user yet".to_string()))?;
        let secret_ref = default_user.secret_reference.as_ref().ok_or_else(|| {
            Error::ClusterNotReady(id.clone(), "default user secret not published".to_string())
        })?;
        let service_ref = default_user.service_reference.as_ref().ok_or_else(|| {
            Error::ClusterNotReady(id.clone(), "client service not published".to_string())
        })?;

        let secret_namespace = non_empty_or(&secret_ref.namespace, namespace);
        let secret = refs
            .get_secret(secret_namespace, &secret_ref.name)
            .await?
            .ok_or_else(|| {
                Error::ClusterNotReady(id.clone(), format!("secret {} not found", secret_ref.name))
            })?;

        let username_key = secret_ref.keys.get("username").map_or("username", String::as_str);
        let password_key = secret_ref.keys.get("password").map_or("password", String::as_str);
        let credentials = SecretCredentials::from_secret(&secret, username_key, password_key)?;

        let mut versions = vec![secret.resource_version().unwrap_or_default()];
        let ca_certificate = match (cluster.tls_enabled(), cluster.ca_secret_name()) {
            (true, Some(ca_secret)) => {
                let ca = refs.get_secret(namespace, ca_secret).await?.ok_or_else(|| {
                    Error::ClusterNotReady(id.clone(), format!("CA secret {ca_secret} not found"))
                })?;
                versions.push(ca.resource_version().unwrap_or_default());
                Some(required_secret_value(&ca, CA_CERT_KEY)?.into_bytes())
            }
            _ => None,
        };

        let service_namespace = non_empty_or(&service_ref.namespace, namespace);
        Ok(ClusterConnection {
            key: format!("cluster:{id}"),
            endpoint: self.endpoint(&cluster, &service_ref.name, service_namespace),
            ca_certificate,
            credentials: Arc::new(credentials),
            source_resource_version: versions.join(","),
        })
    }

    fn endpoint(&self, cluster: &RabbitmqCluster, service: &str, namespace: &str) -> String {
        let (scheme, port) = if cluster.tls_enabled() {
            ("https", MANAGEMENT_TLS_PORT)
        } else {
            ("http", MANAGEMENT_PORT)
        };
        format!(
            "{scheme}://{service}.{namespace}.svc{}:{port}",
            self.cluster_domain
        )
    }
}

async fn resolve_connection_secret(
    refs: &dyn ReferenceStore,
    name: &str,
    namespace: &str,
) -> Result<ClusterConnection> {
    let id = format!("{namespace}/{name}");
    let secret = refs
        .get_secret(namespace, name)
        .await?
        .ok_or_else(|| Error::ConnectionSecretNotFound(id.clone()))?;

    let credentials = SecretCredentials::from_secret(&secret, "username", "password")?;
    let uri = required_secret_value(&secret, "uri")?;
    let endpoint = if uri.contains("://") {
        uri
    } else {
        format!("http://{uri}")
    };

    Ok(ClusterConnection {
        key: format!("secret:{id}"),
        endpoint: endpoint.trim_end_matches('/').to_string(),
        ca_certificate: secret_value(&secret, CA_CERT_KEY).map(String::into_bytes),
        credentials: Arc::new(credentials),
        source_resource_version: secret.resource_version().unwrap_or_default(),
    })
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.is_empty() {
        fallback
    } else {
        value
    }
}
