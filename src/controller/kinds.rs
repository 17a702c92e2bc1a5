//! Per-kind behaviour plugged into the generic reconciler
//!
//! Each topology kind knows its finalizer, how to translate its spec into a
//! [`BrokerObject`] and which secret-backed values must be filled in before a
//! declare. The reconcile state machine itself is kind-agnostic.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::warn;

use super::credentials::{required_secret_value, secret_value};
use super::store::ReferenceStore;
use crate::crd::{
    Binding, DeletionPolicy, Exchange, Federation, Permission, Policy, Queue,
    RabbitmqClusterReference, SchemaReplication, Shovel, TopologyStatus, User, Vhost,
    SCHEMA_REPLICATION_PARAMETER,
};
use crate::error::{Error, Result};
use crate::rabbitmq::{BrokerKind, BrokerObject};

#[async_trait]
pub trait TopologyResource:
    Resource<Scope = NamespaceResourceScope, DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Finalizer guarding the broker object
    const FINALIZER: &'static str;
    /// Controller name used in logs and metrics
    const CONTROLLER: &'static str;

    fn cluster_reference(&self) -> &RabbitmqClusterReference;

    fn topology_status(&self) -> Option<&TopologyStatus>;

    fn deletion_policy(&self) -> DeletionPolicy {
        DeletionPolicy::Delete
    }

    /// Broker representation of the spec, without secret-backed values.
    fn broker_object(&self) -> BrokerObject;

    /// Fill in values that live in secrets. Only called before a declare.
    async fn resolve_secrets(
        &self,
        _object: &mut BrokerObject,
        _refs: &dyn ReferenceStore,
    ) -> Result<()> {
        Ok(())
    }

    /// Copy anything deletion will need later into the status.
    fn record(&self, _object: &BrokerObject, _status: &mut TopologyStatus) {}
}

macro_rules! topology_accessors {
    () => {
        fn cluster_reference(&self) -> &RabbitmqClusterReference {
            &self.spec.rabbitmq_cluster_reference
        }

        fn topology_status(&self) -> Option<&TopologyStatus> {
            self.status.as_ref()
        }
    };
}

fn arguments(value: &Option<Value>) -> Value {
    match value {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => Value::Object(Map::new()),
    }
}

/// Insert `value` under `key` unless it is `None`.
fn put<T: Serialize>(map: &mut Map<String, Value>, key: &str, value: &Option<T>) {
    if let Some(v) = value {
        if let Ok(v) = serde_json::to_value(v) {
            map.insert(key.to_string(), v);
        }
    }
}

fn uri_list(raw: &str) -> Value {
    Value::Array(
        raw.split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(|u| Value::String(u.to_string()))
            .collect(),
    )
}

async fn fetch_secret(refs: &dyn ReferenceStore, namespace: &str, name: &str) -> Result<Secret> {
    refs.get_secret(namespace, name)
        .await?
        .ok_or_else(|| Error::MalformedSecret {
            name: format!("{namespace}/{name}"),
            message: "secret not found".to_string(),
        })
}

/// Add entries to the `value` object of a runtime parameter.
fn insert_values(object: &mut BrokerObject, entries: Vec<(&str, Value)>) {
    if let Some(Value::Object(map)) = object.properties.get_mut("value") {
        for (key, value) in entries {
            map.insert(key.to_string(), value);
        }
    }
}

impl TopologyResource for Queue {
    const FINALIZER: &'static str = "deletion.finalizers.queues.rabbitmq.com";
    const CONTROLLER: &'static str = "queue";

    topology_accessors!();

    fn deletion_policy(&self) -> DeletionPolicy {
        self.spec.deletion_policy
    }

    fn broker_object(&self) -> BrokerObject {
        let mut args = arguments(&self.spec.arguments);
        if let (Some(queue_type), Value::Object(map)) = (&self.spec.type_, &mut args) {
            map.insert("x-queue-type".to_string(), Value::String(queue_type.clone()));
        }
        BrokerObject::new(
            BrokerKind::Queue,
            &self.spec.vhost,
            &self.spec.name,
            json!({
                "durable": self.spec.durable,
                "auto_delete": self.spec.auto_delete,
                "arguments": args,
            }),
        )
    }
}

impl TopologyResource for Exchange {
    const FINALIZER: &'static str = "deletion.finalizers.exchanges.rabbitmq.com";
    const CONTROLLER: &'static str = "exchange";

    topology_accessors!();

    fn deletion_policy(&self) -> DeletionPolicy {
        self.spec.deletion_policy
    }

    fn broker_object(&self) -> BrokerObject {
        BrokerObject::new(
            BrokerKind::Exchange,
            &self.spec.vhost,
            &self.spec.name,
            json!({
                "type": self.spec.type_,
                "durable": self.spec.durable,
                "auto_delete": self.spec.auto_delete,
                "arguments": arguments(&self.spec.arguments),
            }),
        )
    }
}

impl TopologyResource for Binding {
    const FINALIZER: &'static str = "deletion.finalizers.bindings.rabbitmq.com";
    const CONTROLLER: &'static str = "binding";

    topology_accessors!();

    fn broker_object(&self) -> BrokerObject {
        let spec = &self.spec;
        BrokerObject::new(
            BrokerKind::Binding,
            &spec.vhost,
            format!("{}->{}:{}", spec.source, spec.destination, spec.routing_key),
            json!({
                "source": spec.source,
                "destination": spec.destination,
                "destination_type": spec.destination_type,
                "routing_key": spec.routing_key,
                "arguments": arguments(&spec.arguments),
            }),
        )
    }
}

impl TopologyResource for Vhost {
    const FINALIZER: &'static str = "deletion.finalizers.vhosts.rabbitmq.com";
    const CONTROLLER: &'static str = "vhost";

    topology_accessors!();

    fn deletion_policy(&self) -> DeletionPolicy {
        self.spec.deletion_policy
    }

    fn broker_object(&self) -> BrokerObject {
        let mut properties = Map::new();
        properties.insert("tracing".to_string(), Value::Bool(self.spec.tracing));
        properties.insert("tags".to_string(), Value::String(self.spec.tags.join(",")));
        put(&mut properties, "default_queue_type", &self.spec.default_queue_type);
        BrokerObject::new(BrokerKind::Vhost, "", &self.spec.name, Value::Object(properties))
    }
}

#[async_trait]
impl TopologyResource for User {
    const FINALIZER: &'static str = "deletion.finalizers.users.rabbitmq.com";
    const CONTROLLER: &'static str = "user";

    topology_accessors!();

    /// Password-less user named after the object (or the name recorded at
    /// creation).
    fn broker_object(&self) -> BrokerObject {
        let name = self
            .status
            .as_ref()
            .and_then(|s| s.username.clone())
            .unwrap_or_else(|| self.name_any());
        BrokerObject::new(
            BrokerKind::User,
            "",
            name,
            json!({
                "tags": self.spec.tags.join(","),
                "password_hash": "",
            }),
        )
    }

    async fn resolve_secrets(
        &self,
        object: &mut BrokerObject,
        refs: &dyn ReferenceStore,
    ) -> Result<()> {
        let Some(secret_ref) = &self.spec.import_credentials_secret else {
            return Ok(());
        };
        let namespace = self.namespace().unwrap_or_default();
        let secret = fetch_secret(refs, &namespace, &secret_ref.name).await?;

        // Once created, the broker user keeps its name; a renamed secret
        // username would otherwise orphan the old user.
        let recorded = self.status.as_ref().and_then(|s| s.username.as_ref());
        if let Some(username) = secret_value(&secret, "username").filter(|u| !u.is_empty()) {
            match recorded {
                Some(name) if *name != username => warn!(
                    "Ignoring username change for user {} from {} to {}",
                    self.name_any(),
                    name,
                    username
                ),
                Some(_) => {}
                None => object.name = username,
            }
        }
        let password = required_secret_value(&secret, "password")?;
        if let Value::Object(map) = &mut object.properties {
            map.remove("password_hash");
            map.insert("password".to_string(), Value::String(password));
        }
        Ok(())
    }

    fn record(&self, object: &BrokerObject, status: &mut TopologyStatus) {
        status.username = Some(object.name.clone());
    }
}

impl TopologyResource for Permission {
    const FINALIZER: &'static str = "deletion.finalizers.permissions.rabbitmq.com";
    const CONTROLLER: &'static str = "permission";

    topology_accessors!();

    fn broker_object(&self) -> BrokerObject {
        let p = &self.spec.permissions;
        BrokerObject::new(
            BrokerKind::Permission,
            &self.spec.vhost,
            &self.spec.user,
            json!({
                "configure": p.configure,
                "write": p.write,
                "read": p.read,
            }),
        )
    }
}

impl TopologyResource for Policy {
    const FINALIZER: &'static str = "deletion.finalizers.policies.rabbitmq.com";
    const CONTROLLER: &'static str = "policy";

    topology_accessors!();

    fn broker_object(&self) -> BrokerObject {
        BrokerObject::new(
            BrokerKind::Policy,
            &self.spec.vhost,
            &self.spec.name,
            json!({
                "pattern": self.spec.pattern,
                "apply-to": self.spec.apply_to,
                "priority": self.spec.priority,
                "definition": self.spec.definition,
            }),
        )
    }
}

#[async_trait]
impl TopologyResource for Shovel {
    const FINALIZER: &'static str = "deletion.finalizers.shovels.rabbitmq.com";
    const CONTROLLER: &'static str = "shovel";

    topology_accessors!();

    fn deletion_policy(&self) -> DeletionPolicy {
        self.spec.deletion_policy
    }

    fn broker_object(&self) -> BrokerObject {
        let s = &self.spec;
        let mut value = Map::new();
        put(&mut value, "src-queue", &s.src_queue);
        put(&mut value, "src-exchange", &s.src_exchange);
        put(&mut value, "src-exchange-key", &s.src_exchange_key);
        put(&mut value, "src-protocol", &s.src_protocol);
        put(&mut value, "src-delete-after", &s.src_delete_after);
        put(&mut value, "src-prefetch-count", &s.prefetch_count);
        put(&mut value, "dest-queue", &s.dest_queue);
        put(&mut value, "dest-exchange", &s.dest_exchange);
        put(&mut value, "dest-exchange-key", &s.dest_exchange_key);
        put(&mut value, "dest-protocol", &s.dest_protocol);
        put(&mut value, "ack-mode", &s.ack_mode);
        put(&mut value, "reconnect-delay", &s.reconnect_delay);
        if s.dest_add_forward_headers {
            value.insert("dest-add-forward-headers".to_string(), Value::Bool(true));
        }
        if s.dest_add_timestamp_header {
            value.insert("dest-add-timestamp-header".to_string(), Value::Bool(true));
        }
        BrokerObject::new(
            BrokerKind::Shovel,
            &s.vhost,
            &s.name,
            json!({ "value": value }),
        )
    }

    async fn resolve_secrets(
        &self,
        object: &mut BrokerObject,
        refs: &dyn ReferenceStore,
    ) -> Result<()> {
        let namespace = self.namespace().unwrap_or_default();
        let secret = fetch_secret(refs, &namespace, &self.spec.uri_secret.name).await?;
        let src = required_secret_value(&secret, "srcUri")?;
        let dest = required_secret_value(&secret, "destUri")?;

        insert_values(
            object,
            vec![("src-uri", uri_list(&src)), ("dest-uri", uri_list(&dest))],
        );
        Ok(())
    }
}

#[async_trait]
impl TopologyResource for Federation {
    const FINALIZER: &'static str = "deletion.finalizers.federations.rabbitmq.com";
    const CONTROLLER: &'static str = "federation";

    topology_accessors!();

    fn deletion_policy(&self) -> DeletionPolicy {
        self.spec.deletion_policy
    }

    fn broker_object(&self) -> BrokerObject {
        let f = &self.spec;
        let mut value = Map::new();
        put(&mut value, "exchange", &f.exchange);
        put(&mut value, "queue", &f.queue);
        put(&mut value, "max-hops", &f.max_hops);
        put(&mut value, "expires", &f.expires);
        put(&mut value, "message-ttl", &f.message_ttl);
        put(&mut value, "prefetch-count", &f.prefetch_count);
        put(&mut value, "reconnect-delay", &f.reconnect_delay);
        put(&mut value, "ack-mode", &f.ack_mode);
        if f.trust_user_id {
            value.insert("trust-user-id".to_string(), Value::Bool(true));
        }
        BrokerObject::new(
            BrokerKind::Federation,
            &f.vhost,
            &f.name,
            json!({ "value": value }),
        )
    }

    async fn resolve_secrets(
        &self,
        object: &mut BrokerObject,
        refs: &dyn ReferenceStore,
    ) -> Result<()> {
        let namespace = self.namespace().unwrap_or_default();
        let secret = fetch_secret(refs, &namespace, &self.spec.uri_secret.name).await?;
        let uri = required_secret_value(&secret, "uri")?;
        insert_values(object, vec![("uri", uri_list(&uri))]);
        Ok(())
    }
}

#[async_trait]
impl TopologyResource for SchemaReplication {
    const FINALIZER: &'static str = "deletion.finalizers.schemareplications.rabbitmq.com";
    const CONTROLLER: &'static str = "schemareplication";

    topology_accessors!();

    fn broker_object(&self) -> BrokerObject {
        BrokerObject::new(
            BrokerKind::SchemaReplication,
            "",
            SCHEMA_REPLICATION_PARAMETER,
            json!({
                "name": SCHEMA_REPLICATION_PARAMETER,
                "value": { "endpoints": self.spec.endpoint_list() },
            }),
        )
    }

    async fn resolve_secrets(
        &self,
        object: &mut BrokerObject,
        refs: &dyn ReferenceStore,
    ) -> Result<()> {
        let namespace = self.namespace().unwrap_or_default();
        let secret = fetch_secret(refs, &namespace, &self.spec.upstream_secret.name).await?;
        let username = required_secret_value(&secret, "username")?;
        let password = required_secret_value(&secret, "password")?;

        insert_values(
            object,
            vec![
                ("username", Value::String(username)),
                ("password", Value::String(password)),
            ],
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::{connection_secret, FakeReferences};
    use crate::crd::{
        BindingSpec, QueueSpec, SecretReference, ShovelSpec, UserSpec, DEFAULT_VHOST,
    };
    use kube::api::ObjectMeta;

    fn cluster() -> RabbitmqClusterReference {
        RabbitmqClusterReference::in_cluster("c1")
    }

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_queue_type_becomes_argument() {
        let mut queue = Queue::new(
            "q1",
            QueueSpec {
                name: "q1".to_string(),
                vhost: DEFAULT_VHOST.to_string(),
                type_: Some("quorum".to_string()),
                durable: true,
                auto_delete: false,
                arguments: Some(json!({"x-delivery-limit": 5})),
                deletion_policy: DeletionPolicy::Retain,
                rabbitmq_cluster_reference: cluster(),
            },
        );
        queue.metadata.namespace = Some("default".to_string());

        let object = queue.broker_object();
        assert_eq!(object.kind, BrokerKind::Queue);
        assert_eq!(object.vhost, "/");
        assert_eq!(object.properties["arguments"]["x-queue-type"], "quorum");
        assert_eq!(object.properties["arguments"]["x-delivery-limit"], 5);
        assert_eq!(queue.deletion_policy(), DeletionPolicy::Retain);
    }

    #[test]
    fn test_binding_object() {
        let binding = Binding::new(
            "b1",
            BindingSpec {
                vhost: "/".to_string(),
                source: "orders".to_string(),
                destination: "orders-q".to_string(),
                destination_type: "queue".to_string(),
                routing_key: "eu".to_string(),
                arguments: None,
                rabbitmq_cluster_reference: cluster(),
            },
        );
        let object = binding.broker_object();
        assert_eq!(object.properties["source"], "orders");
        assert_eq!(object.properties["routing_key"], "eu");
        assert_eq!(object.properties["arguments"], json!({}));
    }

    #[tokio::test]
    async fn test_user_without_secret_is_passwordless() {
        let user = User {
            metadata: meta("alice"),
            spec: UserSpec {
                tags: vec!["management".to_string()],
                import_credentials_secret: None,
                rabbitmq_cluster_reference: cluster(),
            },
            status: None,
        };
        let refs = FakeReferences::default();
        let mut object = user.broker_object();
        user.resolve_secrets(&mut object, &refs).await.unwrap();

        assert_eq!(object.name, "alice");
        assert_eq!(object.properties["password_hash"], "");
        assert_eq!(object.properties["tags"], "management");
    }

    #[tokio::test]
    async fn test_user_imports_credentials() {
        let user = User {
            metadata: meta("alice"),
            spec: UserSpec {
                tags: vec![],
                import_credentials_secret: Some(SecretReference {
                    name: "alice-creds".to_string(),
                }),
                rabbitmq_cluster_reference: cluster(),
            },
            status: None,
        };
        let refs = FakeReferences::default();
        refs.add_secret(connection_secret(
            "default",
            "alice-creds",
            &[("username", "alice-broker"), ("password", "pw")],
        ));

        let mut object = user.broker_object();
        user.resolve_secrets(&mut object, &refs).await.unwrap();
        assert_eq!(object.name, "alice-broker");
        assert_eq!(object.properties["password"], "pw");
        assert!(object.properties.get("password_hash").is_none());

        let mut status = TopologyStatus::default();
        user.record(&object, &mut status);
        assert_eq!(status.username.as_deref(), Some("alice-broker"));
    }

    #[tokio::test]
    async fn test_user_keeps_recorded_name_when_secret_username_changes() {
        let user = User {
            metadata: meta("alice"),
            spec: UserSpec {
                tags: vec![],
                import_credentials_secret: Some(SecretReference {
                    name: "alice-creds".to_string(),
                }),
                rabbitmq_cluster_reference: cluster(),
            },
            status: Some(TopologyStatus {
                username: Some("alice-broker".to_string()),
                ..Default::default()
            }),
        };
        let refs = FakeReferences::default();
        refs.add_secret(connection_secret(
            "default",
            "alice-creds",
            &[("username", "alice-renamed"), ("password", "pw2")],
        ));

        let mut object = user.broker_object();
        user.resolve_secrets(&mut object, &refs).await.unwrap();
        assert_eq!(object.name, "alice-broker");
        assert_eq!(object.properties["password"], "pw2");

        let mut status = user.status.clone().unwrap();
        user.record(&object, &mut status);
        assert_eq!(status.username.as_deref(), Some("alice-broker"));
    }

    #[test]
    fn test_user_deletes_recorded_name() {
        let user = User {
            metadata: meta("alice"),
            spec: UserSpec {
                tags: vec![],
                import_credentials_secret: None,
                rabbitmq_cluster_reference: cluster(),
            },
            status: Some(TopologyStatus {
                username: Some("alice-broker".to_string()),
                ..Default::default()
            }),
        };
        assert_eq!(user.broker_object().name, "alice-broker");
    }

    #[tokio::test]
    async fn test_shovel_uris_from_secret() {
        let shovel = Shovel {
            metadata: meta("move"),
            spec: ShovelSpec {
                name: "move".to_string(),
                vhost: "/".to_string(),
                uri_secret: SecretReference {
                    name: "shovel-uris".to_string(),
                },
                src_queue: Some("a".to_string()),
                src_exchange: None,
                src_exchange_key: None,
                src_protocol: None,
                src_delete_after: None,
                dest_queue: Some("b".to_string()),
                dest_exchange: None,
                dest_exchange_key: None,
                dest_protocol: None,
                dest_add_forward_headers: false,
                dest_add_timestamp_header: false,
                ack_mode: Some("on-confirm".to_string()),
                prefetch_count: None,
                reconnect_delay: None,
                deletion_policy: DeletionPolicy::Delete,
                rabbitmq_cluster_reference: cluster(),
            },
            status: None,
        };
        let refs = FakeReferences::default();
        refs.add_secret(connection_secret(
            "default",
            "shovel-uris",
            &[("srcUri", "amqp://a,amqp://b"), ("destUri", "amqp://c")],
        ));

        let mut object = shovel.broker_object();
        assert!(object.properties["value"].get("src-uri").is_none());
        shovel.resolve_secrets(&mut object, &refs).await.unwrap();

        let value = &object.properties["value"];
        assert_eq!(value["src-uri"], json!(["amqp://a", "amqp://b"]));
        assert_eq!(value["dest-uri"], json!(["amqp://c"]));
        assert_eq!(value["src-queue"], "a");
        assert_eq!(value["ack-mode"], "on-confirm");
    }

    #[tokio::test]
    async fn test_missing_uri_secret_is_terminal() {
        let shovel: Shovel = serde_json::from_value(json!({
            "apiVersion": "rabbitmq.com/v1beta1",
            "kind": "Shovel",
            "metadata": {"name": "move", "namespace": "default"},
            "spec": {
                "name": "move",
                "uriSecret": {"name": "missing"},
                "rabbitmqClusterReference": {"name": "c1"}
            }
        }))
        .unwrap();

        let refs = FakeReferences::default();
        let mut object = shovel.broker_object();
        let err = shovel.resolve_secrets(&mut object, &refs).await.unwrap_err();
        assert!(!err.is_retriable());
    }
}
