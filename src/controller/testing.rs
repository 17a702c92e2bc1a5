//! In-memory stand-ins for the Kubernetes API and the broker

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::client_cache::{BrokerClientFactory, ClientCache};
use super::cluster_ref::{ClusterConnection, ClusterResolver};
use super::leader::LeaderState;
use super::reconciler::{Context, ReconcileSettings};
use super::store::{ObjectStore, ReferenceStore};
use crate::crd::cluster::{ClusterSecretReference, DefaultUser, ServiceReference};
use crate::crd::{RabbitmqCluster, RabbitmqClusterSpec, RabbitmqClusterStatus, TopologyStatus};
use crate::error::{Error, Result};
use crate::rabbitmq::{BrokerClient, BrokerError, BrokerKind, BrokerObject};

type Key = (String, String);

fn next_version(version: Option<&str>) -> String {
    let current: u64 = version.and_then(|v| v.parse().ok()).unwrap_or(0);
    (current + 1).to_string()
}

fn spec_of<K: Serialize>(obj: &K) -> Value {
    serde_json::to_value(obj).map(|v| v["spec"].clone()).unwrap_or(Value::Null)
}

fn with_status<K: Serialize + DeserializeOwned>(obj: &K, status: Value) -> Result<K> {
    let mut value = serde_json::to_value(obj)?;
    value["status"] = status;
    Ok(serde_json::from_value(value)?)
}

/// Object store with API-server semantics that matter to the reconcilers:
/// resourceVersion checks, generation bumps on spec changes and finalizers
/// blocking removal.
pub struct MemoryStore<K> {
    objects: Mutex<HashMap<Key, K>>,
    pending_conflicts: AtomicUsize,
    pub status_writes: AtomicUsize,
    pub applies: AtomicUsize,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            pending_conflicts: AtomicUsize::new(0),
            status_writes: AtomicUsize::new(0),
            applies: AtomicUsize::new(0),
        }
    }
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    /// Store `obj` as if freshly created and return the stored copy.
    pub fn insert(&self, mut obj: K) -> K {
        let meta = obj.meta_mut();
        meta.namespace.get_or_insert_with(|| "default".to_string());
        let name = meta.name.clone().unwrap_or_default();
        meta.uid.get_or_insert_with(|| format!("uid-{name}"));
        meta.resource_version = Some("1".to_string());
        meta.generation = Some(1);
        self.objects
            .lock()
            .unwrap()
            .insert(key_of(&obj), obj.clone());
        obj
    }

    pub fn object(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    /// Change the spec the way a user edit would.
    pub fn edit(&self, namespace: &str, name: &str, change: impl FnOnce(&mut K)) {
        let mut objects = self.objects.lock().unwrap();
        let obj = objects
            .get_mut(&(namespace.to_string(), name.to_string()))
            .expect("object to edit");
        change(obj);
        let meta = obj.meta_mut();
        meta.generation = meta.generation.map(|g| g + 1);
        meta.resource_version = Some(next_version(meta.resource_version.as_deref()));
    }

    /// Make the next `count` status writes fail with a conflict.
    pub fn inject_status_conflicts(&self, count: usize) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    fn check_version(&self, current: &K, obj: &K, operation: &str) -> Result<()> {
        if current.resource_version() != obj.resource_version() {
            return Err(Error::Conflict(operation.to_string()));
        }
        Ok(())
    }
}

fn key_of<K: Resource>(obj: &K) -> Key {
    (
        obj.meta().namespace.clone().unwrap_or_default(),
        obj.meta().name.clone().unwrap_or_default(),
    )
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.object(namespace, name))
    }

    async fn set_finalizers(&self, obj: &K, finalizers: Vec<String>) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let key = key_of(obj);
        let Some(current) = objects.get_mut(&key) else {
            return Err(Error::Conflict("finalizers".to_string()));
        };
        self.check_version(current, obj, "finalizers")?;

        let meta = current.meta_mut();
        let deleting = meta.deletion_timestamp.is_some();
        if deleting && finalizers.is_empty() {
            objects.remove(&key);
            return Ok(());
        }
        meta.finalizers = Some(finalizers);
        meta.resource_version = Some(next_version(meta.resource_version.as_deref()));
        Ok(())
    }

    async fn patch_status(&self, obj: &K, status: &TopologyStatus) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let key = key_of(obj);
        let Some(current) = objects.get(&key).cloned() else {
            return Err(Error::Conflict("status".to_string()));
        };

        let pending = self.pending_conflicts.load(Ordering::SeqCst);
        if pending > 0 {
            self.pending_conflicts.store(pending - 1, Ordering::SeqCst);
            // Someone else wrote in between.
            let mut bumped = current;
            let meta = bumped.meta_mut();
            meta.resource_version = Some(next_version(meta.resource_version.as_deref()));
            objects.insert(key, bumped);
            return Err(Error::Conflict("status".to_string()));
        }
        self.check_version(&current, obj, "status")?;

        let mut updated = with_status(&current, serde_json::to_value(status)?)?;
        let meta = updated.meta_mut();
        meta.resource_version = Some(next_version(meta.resource_version.as_deref()));
        objects.insert(key, updated);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_labelled(&self, namespace: &str, selector: &str) -> Result<Vec<K>> {
        let (label, value) = selector.split_once('=').unwrap_or((selector, ""));
        let objects = self.objects.lock().unwrap();
        let mut matching: Vec<K> = objects
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter(|(_, obj)| obj.labels().get(label).map(String::as_str) == Some(value))
            .map(|(_, obj)| obj.clone())
            .collect();
        matching.sort_by_key(|o| o.name_any());
        Ok(matching)
    }

    async fn apply(&self, obj: &K) -> Result<()> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.objects.lock().unwrap();
        let key = key_of(obj);

        let next = match objects.get(&key) {
            Some(current) => {
                let spec_changed = spec_of(current) != spec_of(obj);
                let status = serde_json::to_value(current)?["status"].clone();
                let mut next = with_status(obj, status)?;
                let old = current.meta();
                let meta = next.meta_mut();
                meta.uid = old.uid.clone();
                meta.finalizers = old.finalizers.clone();
                meta.deletion_timestamp = old.deletion_timestamp.clone();
                meta.generation = old.generation.map(|g| if spec_changed { g + 1 } else { g });
                meta.resource_version = Some(next_version(old.resource_version.as_deref()));
                next
            }
            None => {
                let mut next = obj.clone();
                let meta = next.meta_mut();
                meta.uid = Some(format!("uid-{}", key.1));
                meta.generation = Some(1);
                meta.resource_version = Some("1".to_string());
                next
            }
        };
        objects.insert(key, next);
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        let Some(current) = objects.get_mut(&key) else {
            return Ok(());
        };
        if current.finalizers().is_empty() {
            objects.remove(&key);
            return Ok(());
        }
        let meta = current.meta_mut();
        if meta.deletion_timestamp.is_none() {
            meta.deletion_timestamp = Some(Time(chrono::Utc::now()));
            meta.resource_version = Some(next_version(meta.resource_version.as_deref()));
        }
        Ok(())
    }
}

/// Secrets and clusters keyed by namespace and name
#[derive(Default)]
pub struct FakeReferences {
    secrets: Mutex<HashMap<Key, Secret>>,
    clusters: Mutex<HashMap<Key, RabbitmqCluster>>,
}

impl FakeReferences {
    /// References holding a ready cluster together with its default user secret.
    pub fn with_cluster(namespace: &str, name: &str) -> Self {
        let refs = Self::default();
        refs.add_cluster(ready_cluster(namespace, name));
        refs.add_secret(connection_secret(
            namespace,
            &format!("{name}-default-user"),
            &[("username", "admin"), ("password", "secret")],
        ));
        refs
    }

    pub fn add_secret(&self, secret: Secret) {
        self.secrets.lock().unwrap().insert(key_of(&secret), secret);
    }

    pub fn add_cluster(&self, cluster: RabbitmqCluster) {
        self.clusters.lock().unwrap().insert(key_of(&cluster), cluster);
    }

    pub fn remove_cluster(&self, namespace: &str, name: &str) {
        self.clusters
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()));
    }
}

#[async_trait]
impl ReferenceStore for FakeReferences {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<RabbitmqCluster>> {
        Ok(self
            .clusters
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// Broker that keeps declared objects in memory and can be scripted to fail
#[derive(Default)]
pub struct FakeBroker {
    objects: Mutex<BTreeMap<String, BrokerObject>>,
    calls: Mutex<Vec<String>>,
    declare_failures: Mutex<VecDeque<BrokerError>>,
    delete_failures: Mutex<VecDeque<BrokerError>>,
}

fn object_id(kind: BrokerKind, vhost: &str, name: &str) -> String {
    format!("{kind}/{vhost}/{name}")
}

impl FakeBroker {
    pub fn fail_next_declare(&self, error: BrokerError) {
        self.declare_failures.lock().unwrap().push_back(error);
    }

    pub fn fail_next_delete(&self, error: BrokerError) {
        self.delete_failures.lock().unwrap().push_back(error);
    }

    /// Calls so far, formatted as `<operation> <kind>/<vhost>/<name>`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn object(&self, kind: BrokerKind, vhost: &str, name: &str) -> Option<BrokerObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&object_id(kind, vhost, name))
            .cloned()
    }

    pub fn contains(&self, kind: BrokerKind, vhost: &str, name: &str) -> bool {
        self.object(kind, vhost, name).is_some()
    }

    /// Put an object on the broker behind the operator's back.
    pub fn seed(&self, object: BrokerObject) {
        let id = object_id(object.kind, &object.vhost, &object.name);
        self.objects.lock().unwrap().insert(id, object);
    }

    pub fn remove(&self, kind: BrokerKind, vhost: &str, name: &str) {
        self.objects
            .lock()
            .unwrap()
            .remove(&object_id(kind, vhost, name));
    }
}

#[async_trait]
impl BrokerClient for FakeBroker {
    async fn declare(&self, object: &BrokerObject) -> std::result::Result<(), BrokerError> {
        let id = object_id(object.kind, &object.vhost, &object.name);
        self.calls.lock().unwrap().push(format!("declare {id}"));
        if let Some(error) = self.declare_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.objects.lock().unwrap().insert(id, object.clone());
        Ok(())
    }

    async fn delete(&self, object: &BrokerObject) -> std::result::Result<(), BrokerError> {
        let id = object_id(object.kind, &object.vhost, &object.name);
        self.calls.lock().unwrap().push(format!("delete {id}"));
        if let Some(error) = self.delete_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        match self.objects.lock().unwrap().remove(&id) {
            Some(_) => Ok(()),
            None => Err(BrokerError::NotFound),
        }
    }
}

/// Factory handing out one shared broker for every cluster
pub struct SharedBrokerFactory(pub Arc<FakeBroker>);

impl BrokerClientFactory for SharedBrokerFactory {
    fn create(&self, _connection: &ClusterConnection) -> Result<Arc<dyn BrokerClient>> {
        Ok(self.0.clone())
    }
}

/// A cluster whose operator has published credentials and a service.
pub fn ready_cluster(namespace: &str, name: &str) -> RabbitmqCluster {
    let mut cluster = RabbitmqCluster::new(name, RabbitmqClusterSpec::default());
    cluster.metadata.namespace = Some(namespace.to_string());
    cluster.status = Some(RabbitmqClusterStatus {
        default_user: Some(DefaultUser {
            secret_reference: Some(ClusterSecretReference {
                name: format!("{name}-default-user"),
                namespace: namespace.to_string(),
                keys: BTreeMap::new(),
            }),
            service_reference: Some(ServiceReference {
                name: name.to_string(),
                namespace: namespace.to_string(),
            }),
        }),
    });
    cluster
}

pub fn connection_secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// Reconcile context over in-memory fakes, running as leader.
pub fn test_context<K>(
    store: Arc<MemoryStore<K>>,
    refs: Arc<FakeReferences>,
    broker: Arc<FakeBroker>,
) -> Arc<Context<K>>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    Arc::new(Context::new(
        store,
        refs,
        ClusterResolver::default(),
        Arc::new(ClientCache::new(Arc::new(SharedBrokerFactory(broker)))),
        LeaderState::always_leader(),
        ReconcileSettings::default(),
    ))
}
