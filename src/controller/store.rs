//! Narrow views of the Kubernetes API used by the reconcilers
//!
//! Reconcilers never hold a `kube::Client` directly. Going through these
//! traits keeps the state machine testable against in-memory stores and
//! puts every API call behind the same timeout.

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::crd::{RabbitmqCluster, TopologyStatus};
use crate::error::{Error, Result};

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "rabbitmq-topology-operator";

/// Upper bound for a single Kubernetes API call
pub const KUBE_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// CRUD on one namespaced kind.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// Replace the finalizer list, guarded by the object's resourceVersion.
    async fn set_finalizers(&self, obj: &K, finalizers: Vec<String>) -> Result<()>;

    /// Write the status subresource, guarded by the object's resourceVersion.
    /// A stale version yields `Error::Conflict`.
    async fn patch_status(&self, obj: &K, status: &TopologyStatus) -> Result<()>;

    async fn list_labelled(&self, namespace: &str, selector: &str) -> Result<Vec<K>>;

    /// Server-side apply of a complete object.
    async fn apply(&self, obj: &K) -> Result<()>;

    /// Delete by name; a missing object is not an error.
    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Read access to the objects a cluster reference points at.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;
    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<RabbitmqCluster>>;
}

/// Store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn bounded<T, F>(operation: &str, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, kube::Error>>,
{
    match tokio::time::timeout(KUBE_CALL_TIMEOUT, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(kube::Error::Api(response))) if response.code == 409 => {
            Err(Error::Conflict(operation.to_string()))
        }
        Ok(Err(e)) => Err(Error::KubeError(e)),
        Err(_) => Err(Error::Timeout(operation.to_string())),
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let api: Api<K> = self.api(namespace);
        bounded("get", api.get_opt(name)).await
    }

    async fn set_finalizers(&self, obj: &K, finalizers: Vec<String>) -> Result<()> {
        let api: Api<K> = self.api(&obj.namespace().unwrap_or_default());
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": obj.resource_version(),
            }
        });
        bounded(
            "finalizers",
            api.patch(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch)),
        )
        .await
        .map(|_| ())
    }

    async fn patch_status(&self, obj: &K, status: &TopologyStatus) -> Result<()> {
        let api: Api<K> = self.api(&obj.namespace().unwrap_or_default());
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": status,
        });
        bounded(
            "status",
            api.patch_status(&obj.name_any(), &PatchParams::default(), &Patch::Merge(&patch)),
        )
        .await
        .map(|_| ())
    }

    async fn list_labelled(&self, namespace: &str, selector: &str) -> Result<Vec<K>> {
        let api: Api<K> = self.api(namespace);
        let list = bounded("list", api.list(&ListParams::default().labels(selector))).await?;
        Ok(list.items)
    }

    async fn apply(&self, obj: &K) -> Result<()> {
        let api: Api<K> = self.api(&obj.namespace().unwrap_or_default());
        let params = PatchParams::apply(FIELD_MANAGER).force();
        bounded("apply", api.patch(&obj.name_any(), &params, &Patch::Apply(obj)))
            .await
            .map(|_| ())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<K> = self.api(namespace);
        match bounded("delete", api.delete(name, &DeleteParams::default())).await {
            Ok(_) => Ok(()),
            Err(Error::KubeError(kube::Error::Api(response))) if response.code == 404 => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ReferenceStore for KubeStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = self.api(namespace);
        bounded("get secret", api.get_opt(name)).await
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<RabbitmqCluster>> {
        let api: Api<RabbitmqCluster> = self.api(namespace);
        bounded("get cluster", api.get_opt(name)).await
    }
}
