//! Admission validation for topology objects
//!
//! Checks run on create and update. A denial stops the write, so the
//! reconcilers never see a spec that fails these rules.

use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::controller::MAX_SUPER_STREAM_NAME_LEN;
use crate::crd::{
    Binding, ClusterTarget, Exchange, Federation, Permission, Policy, Queue,
    RabbitmqClusterReference, SchemaReplication, Shovel, SuperStream, User, Vhost,
    POLICY_APPLY_TO,
};

/// A kind the webhook knows how to default and validate
pub trait Admissible:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync
{
    fn cluster_reference(&self) -> &RabbitmqClusterReference;

    fn cluster_reference_mut(&mut self) -> &mut RabbitmqClusterReference;

    /// The vhost field, for kinds that live inside one
    fn vhost_mut(&mut self) -> Option<&mut String> {
        None
    }

    /// Kind-specific checks on the new object
    fn validate_spec(&self) -> Vec<String> {
        Vec::new()
    }

    /// Kind-specific checks against the stored object
    fn validate_update(&self, _old: &Self) -> Vec<String> {
        Vec::new()
    }
}

/// Result of running validation on one request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Verdict {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Verdict {
    pub fn allowed(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn message(&self) -> String {
        self.errors.join("; ")
    }
}

/// Validate the raw `object` (and `old_object` on update) as kind `K`.
pub fn review<K: Admissible>(object: &Value, old_object: Option<&Value>, namespace: &str) -> Verdict {
    let obj: K = match serde_json::from_value(object.clone()) {
        Ok(obj) => obj,
        Err(e) => {
            return Verdict {
                errors: vec![format!("invalid {}: {e}", K::kind(&()))],
                warnings: Vec::new(),
            }
        }
    };
    let old = old_object.and_then(|o| serde_json::from_value::<K>(o.clone()).ok());
    Verdict {
        errors: validate_object(&obj, old.as_ref(), namespace),
        warnings: Vec::new(),
    }
}

/// All validation errors for `obj`; empty when admissible.
pub fn validate_object<K: Admissible>(obj: &K, old: Option<&K>, namespace: &str) -> Vec<String> {
    let mut errors = Vec::new();
    if let Err(e) = obj.cluster_reference().target() {
        errors.push(format!("spec.rabbitmqClusterReference: {e}"));
    }
    errors.extend(obj.validate_spec());

    if let Some(old) = old {
        let namespace = obj.namespace().unwrap_or_else(|| namespace.to_string());
        if !same_cluster(old.cluster_reference(), obj.cluster_reference(), &namespace) {
            errors.push("spec.rabbitmqClusterReference is immutable".to_string());
        }
        errors.extend(obj.validate_update(old));
    }
    errors
}

/// Compare references after filling in the namespace default, so defaulting
/// an old object does not count as a change.
fn same_cluster(
    old: &RabbitmqClusterReference,
    new: &RabbitmqClusterReference,
    namespace: &str,
) -> bool {
    let normalize = |target: ClusterTarget<'_>| match target {
        ClusterTarget::InCluster { name, namespace: ns } => {
            (Some(name.to_string()), ns.unwrap_or(namespace).to_string(), None)
        }
        ClusterTarget::ConnectionSecret { name } => (None, String::new(), Some(name.to_string())),
    };
    match (old.target(), new.target()) {
        (Ok(a), Ok(b)) => normalize(a) == normalize(b),
        _ => old == new,
    }
}

fn immutable<T: PartialEq>(errors: &mut Vec<String>, field: &str, old: &T, new: &T) {
    if old != new {
        errors.push(format!("spec.{field} is immutable"));
    }
}

fn structured(errors: &mut Vec<String>, field: &str, value: Option<&Value>) {
    if value.is_some_and(|v| !v.is_object()) {
        errors.push(format!("spec.{field} must be an object"));
    }
}

fn required(errors: &mut Vec<String>, field: &str, value: &str) {
    if value.is_empty() {
        errors.push(format!("spec.{field} is required"));
    }
}

macro_rules! reference_accessors {
    () => {
        fn cluster_reference(&self) -> &RabbitmqClusterReference {
            &self.spec.rabbitmq_cluster_reference
        }

        fn cluster_reference_mut(&mut self) -> &mut RabbitmqClusterReference {
            &mut self.spec.rabbitmq_cluster_reference
        }
    };
}

macro_rules! vhost_accessor {
    () => {
        fn vhost_mut(&mut self) -> Option<&mut String> {
            Some(&mut self.spec.vhost)
        }
    };
}

impl Admissible for Queue {
    reference_accessors!();
    vhost_accessor!();

    fn validate_spec(&self) -> Vec<String> {
        let mut errors = Vec::new();
        required(&mut errors, "name", &self.spec.name);
        structured(&mut errors, "arguments", self.spec.arguments.as_ref());
        errors
    }

    fn validate_update(&self, old: &Self) -> Vec<String> {
        let mut errors = Vec::new();
        immutable(&mut errors, "name", &old.spec.name, &self.spec.name);
        immutable(&mut errors, "vhost", &old.spec.vhost, &self.spec.vhost);
        errors
    }
}

impl Admissible for Exchange {
    reference_accessors!();
    vhost_accessor!();

    fn validate_spec(&self) -> Vec<String> {
        let mut errors = Vec::new();
        required(&mut errors, "name", &self.spec.name);
        structured(&mut errors, "arguments", self.spec.arguments.as_ref());
        errors
    }

    fn validate_update(&self, old: &Self) -> Vec<String> {
        let mut errors = Vec::new();
        immutable(&mut errors, "name", &old.spec.name, &self.spec.name);
        immutable(&mut errors, "vhost", &old.spec.vhost, &self.spec.vhost);
        immutable(&mut errors, "type", &old.spec.type_, &self.spec.type_);
        errors
    }
}

impl Admissible for Binding {
    reference_accessors!();
    vhost_accessor!();

    fn validate_spec(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !matches!(self.spec.destination_type.as_str(), "queue" | "exchange") {
            errors.push(format!(
                "spec.destinationType must be queue or exchange, got '{}'",
                self.spec.destination_type
            ));
        }
        required(&mut errors, "source", &self.spec.source);
        required(&mut errors, "destination", &self.spec.destination);
        structured(&mut errors, "arguments", self.spec.arguments.as_ref());
        errors
    }

    fn validate_update(&self, old: &Self) -> Vec<String> {
        let mut errors = Vec::new();
        if old.spec.identity() != self.spec.identity() || old.spec.arguments != self.spec.arguments
        {
            errors.push(
                "spec.vhost, source, destination, destinationType, routingKey and arguments are immutable"
                    .to_string(),
            );
        }
        errors
    }
}

impl Admissible for Vhost {
    reference_accessors!();

    fn validate_spec(&self) -> Vec<String> {
        let mut errors = Vec::new();
        required(&mut errors, "name", &self.spec.name);
        errors
    }

    fn validate_update(&self, old: &Self) -> Vec<String> {
        let mut errors = Vec::new();
        immutable(&mut errors, "name", &old.spec.name, &self.spec.name);
        errors
    }
}

impl Admissible for User {
    reference_accessors!();
}

impl Admissible for Permission {
    reference_accessors!();
    vhost_accessor!();

    fn validate_spec(&self) -> Vec<String> {
        let mut errors = Vec::new();
        required(&mut errors, "user", &self.spec.user);
        errors
    }

    fn validate_update(&self, old: &Self) -> Vec<String> {
        let mut errors = Vec::new();
        immutable(&mut errors, "user", &old.spec.user, &self.spec.user);
        immutable(&mut errors, "vhost", &old.spec.vhost, &self.spec.vhost);
        errors
    }
}

impl Admissible for Policy {
    reference_accessors!();
    vhost_accessor!();

    fn validate_spec(&self) -> Vec<String> {
        let mut errors = Vec::new();
        required(&mut errors, "name", &self.spec.name);
        required(&mut errors, "pattern", &self.spec.pattern);
        if !POLICY_APPLY_TO.contains(&self.spec.apply_to.as_str()) {
            errors.push(format!(
                "spec.applyTo must be one of {}, got '{}'",
                POLICY_APPLY_TO.join(", "),
                self.spec.apply_to
            ));
        }
        structured(&mut errors, "definition", Some(&self.spec.definition));
        errors
    }

    fn validate_update(&self, old: &Self) -> Vec<String> {
        let mut errors = Vec::new();
        immutable(&mut errors, "name", &old.spec.name, &self.spec.name);
        immutable(&mut errors, "vhost", &old.spec.vhost, &self.spec.vhost);
        errors
    }
}

impl Admissible for Shovel {
    reference_accessors!();
    vhost_accessor!();

    fn validate_spec(&self) -> Vec<String> {
        let mut errors = Vec::new();
        required(&mut errors, "name", &self.spec.name);
        required(&mut errors, "uriSecret.name", &self.spec.uri_secret.name);
        errors
    }

    fn validate_update(&self, old: &Self) -> Vec<String> {
        let mut errors = Vec::new();
        immutable(&mut errors, "name", &old.spec.name, &self.spec.name);
        immutable(&mut errors, "vhost", &old.spec.vhost, &self.spec.vhost);
        errors
    }
}

impl Admissible for Federation {
    reference_accessors!();
    vhost_accessor!();

    fn validate_spec(&self) -> Vec<String> {
        let mut errors = Vec::new();
        required(&mut errors, "name", &self.spec.name);
        required(&mut errors, "uriSecret.name", &self.spec.uri_secret.name);
        errors
    }

    fn validate_update(&self, old: &Self) -> Vec<String> {
        let mut errors = Vec::new();
        immutable(&mut errors, "name", &old.spec.name, &self.spec.name);
        immutable(&mut errors, "vhost", &old.spec.vhost, &self.spec.vhost);
        errors
    }
}

impl Admissible for SchemaReplication {
    reference_accessors!();

    fn validate_spec(&self) -> Vec<String> {
        let mut errors = Vec::new();
        required(&mut errors, "upstreamSecret.name", &self.spec.upstream_secret.name);
        if self.spec.endpoint_list().is_empty() {
            errors.push("spec.endpoints must list at least one endpoint".to_string());
        }
        errors
    }
}

impl Admissible for SuperStream {
    reference_accessors!();
    vhost_accessor!();

    fn validate_spec(&self) -> Vec<String> {
        let mut errors = Vec::new();
        // Children carry the parent name as a label value.
        if self.name_any().len() > MAX_SUPER_STREAM_NAME_LEN {
            errors.push(format!(
                "metadata.name must be at most {MAX_SUPER_STREAM_NAME_LEN} characters"
            ));
        }
        let partitions = self.spec.partitions as usize;
        if partitions < 1 {
            errors.push("spec.partitions must be at least 1".to_string());
        }
        let keys = self.spec.routing_keys.len();
        if keys > 0 && keys != partitions {
            errors.push(format!(
                "spec.routingKeys has {keys} entries but spec.partitions is {partitions}"
            ));
        }
        errors
    }

    fn validate_update(&self, old: &Self) -> Vec<String> {
        let mut errors = Vec::new();
        immutable(&mut errors, "name", &old.spec.name, &self.spec.name);
        immutable(&mut errors, "vhost", &old.spec.vhost, &self.spec.vhost);
        if self.spec.partitions < old.spec.partitions {
            errors.push(format!(
                "spec.partitions cannot be decreased from {} to {}",
                old.spec.partitions, self.spec.partitions
            ));
        }
        let existing = old.spec.partitions.min(self.spec.partitions) as usize;
        if (0..existing).any(|i| old.spec.routing_key(i) != self.spec.routing_key(i)) {
            errors.push("routing keys of existing partitions cannot change".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn queue(spec: Value) -> Value {
        json!({
            "apiVersion": "rabbitmq.com/v1beta1",
            "kind": "Queue",
            "metadata": { "name": "q1", "namespace": "default" },
            "spec": spec,
        })
    }

    fn super_stream(spec: Value) -> Value {
        json!({
            "apiVersion": "rabbitmq.com/v1alpha1",
            "kind": "SuperStream",
            "metadata": { "name": "ss1", "namespace": "default" },
            "spec": spec,
        })
    }

    #[test]
    fn test_valid_queue_admitted() {
        let object = queue(json!({
            "name": "q1",
            "rabbitmqClusterReference": { "name": "c1" },
        }));
        let verdict = review::<Queue>(&object, None, "default");
        assert!(verdict.allowed(), "{}", verdict.message());
    }

    #[test]
    fn test_reference_requires_exactly_one_mode() {
        let both = queue(json!({
            "name": "q1",
            "rabbitmqClusterReference": { "name": "c1", "connectionSecret": { "name": "s" } },
        }));
        let verdict = review::<Queue>(&both, None, "default");
        assert!(!verdict.allowed());
        assert!(verdict.message().contains("only one of"));

        let neither = queue(json!({ "name": "q1", "rabbitmqClusterReference": {} }));
        assert!(!review::<Queue>(&neither, None, "default").allowed());
    }

    #[test]
    fn test_reference_is_immutable() {
        let old = queue(json!({ "name": "q1", "rabbitmqClusterReference": { "name": "c1" } }));
        let new = queue(json!({ "name": "q1", "rabbitmqClusterReference": { "name": "c2" } }));

        let verdict = review::<Queue>(&new, Some(&old), "default");

        assert_eq!(verdict.errors, vec!["spec.rabbitmqClusterReference is immutable"]);
    }

    #[test]
    fn test_defaulted_namespace_is_not_a_change() {
        let old = queue(json!({ "name": "q1", "rabbitmqClusterReference": { "name": "c1" } }));
        let new = queue(json!({
            "name": "q1",
            "rabbitmqClusterReference": { "name": "c1", "namespace": "default" },
        }));

        assert!(review::<Queue>(&new, Some(&old), "default").allowed());
    }

    #[test]
    fn test_arguments_must_be_an_object() {
        let object = queue(json!({
            "name": "q1",
            "arguments": ["x-max-length", 10],
            "rabbitmqClusterReference": { "name": "c1" },
        }));
        let verdict = review::<Queue>(&object, None, "default");
        assert_eq!(verdict.errors, vec!["spec.arguments must be an object"]);
    }

    #[test]
    fn test_binding_destination_type() {
        let object = json!({
            "apiVersion": "rabbitmq.com/v1beta1",
            "kind": "Binding",
            "metadata": { "name": "b1", "namespace": "default" },
            "spec": {
                "source": "orders",
                "destination": "orders-q",
                "destinationType": "topic",
                "rabbitmqClusterReference": { "name": "c1" },
            },
        });
        let verdict = review::<Binding>(&object, None, "default");
        assert!(!verdict.allowed());
        assert!(verdict.message().contains("destinationType"));
    }

    #[test]
    fn test_super_stream_routing_keys_match_partitions() {
        let object = super_stream(json!({
            "name": "ss1",
            "partitions": 3,
            "routingKeys": ["eu", "us"],
            "rabbitmqClusterReference": { "name": "c1" },
        }));
        let verdict = review::<SuperStream>(&object, None, "default");
        assert_eq!(
            verdict.errors,
            vec!["spec.routingKeys has 2 entries but spec.partitions is 3"]
        );
    }

    #[test]
    fn test_super_stream_needs_a_partition() {
        let object = super_stream(json!({
            "name": "ss1",
            "partitions": 0,
            "rabbitmqClusterReference": { "name": "c1" },
        }));
        assert!(!review::<SuperStream>(&object, None, "default").allowed());
    }

    #[test]
    fn test_super_stream_update_rules() {
        let old = super_stream(json!({
            "name": "ss1",
            "partitions": 3,
            "rabbitmqClusterReference": { "name": "c1" },
        }));

        let grown = super_stream(json!({
            "name": "ss1",
            "partitions": 5,
            "rabbitmqClusterReference": { "name": "c1" },
        }));
        assert!(review::<SuperStream>(&grown, Some(&old), "default").allowed());

        let shrunk = super_stream(json!({
            "name": "ss1",
            "partitions": 2,
            "rabbitmqClusterReference": { "name": "c1" },
        }));
        let verdict = review::<SuperStream>(&shrunk, Some(&old), "default");
        assert!(verdict.message().contains("cannot be decreased"));

        let rekeyed = super_stream(json!({
            "name": "ss1",
            "partitions": 3,
            "routingKeys": ["a", "b", "c"],
            "rabbitmqClusterReference": { "name": "c1" },
        }));
        let verdict = review::<SuperStream>(&rekeyed, Some(&old), "default");
        assert_eq!(verdict.errors, vec!["routing keys of existing partitions cannot change"]);
    }

    #[test]
    fn test_super_stream_name_fits_a_label() {
        let spec = json!({
            "name": "ss1",
            "partitions": 1,
            "rabbitmqClusterReference": { "name": "c1" },
        });
        let mut object = super_stream(spec.clone());
        object["metadata"]["name"] = json!("s".repeat(64));
        let verdict = review::<SuperStream>(&object, None, "default");
        assert_eq!(verdict.errors, vec!["metadata.name must be at most 63 characters"]);

        object["metadata"]["name"] = json!("s".repeat(63));
        assert!(review::<SuperStream>(&object, None, "default").allowed());
    }

    #[test]
    fn test_policy_apply_to() {
        let object = json!({
            "apiVersion": "rabbitmq.com/v1beta1",
            "kind": "Policy",
            "metadata": { "name": "p1", "namespace": "default" },
            "spec": {
                "name": "ha",
                "pattern": ".*",
                "applyTo": "streams",
                "definition": { "max-length": 10 },
                "rabbitmqClusterReference": { "name": "c1" },
            },
        });
        let verdict = review::<Policy>(&object, None, "default");
        assert!(verdict.message().contains("applyTo"));
    }

    #[test]
    fn test_exchange_type_is_immutable() {
        let exchange = |type_: &str| {
            json!({
                "apiVersion": "rabbitmq.com/v1beta1",
                "kind": "Exchange",
                "metadata": { "name": "e1", "namespace": "default" },
                "spec": {
                    "name": "e1",
                    "type": type_,
                    "rabbitmqClusterReference": { "name": "c1" },
                },
            })
        };
        let verdict = review::<Exchange>(&exchange("fanout"), Some(&exchange("direct")), "default");
        assert_eq!(verdict.errors, vec!["spec.type is immutable"]);
    }

    #[test]
    fn test_permission_requires_user() {
        let object = json!({
            "apiVersion": "rabbitmq.com/v1beta1",
            "kind": "Permission",
            "metadata": { "name": "perm", "namespace": "default" },
            "spec": {
                "permissions": { "read": ".*" },
                "rabbitmqClusterReference": { "name": "c1" },
            },
        });
        let verdict = review::<Permission>(&object, None, "default");
        assert_eq!(verdict.errors, vec!["spec.user is required"]);
    }

    #[test]
    fn test_unparseable_object_denied() {
        let object = queue(json!({ "rabbitmqClusterReference": { "name": "c1" } }));
        let verdict = review::<Queue>(&object, None, "default");
        assert!(verdict.message().starts_with("invalid Queue"));
    }
}
