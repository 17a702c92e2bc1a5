//! Mutating admission logic
//!
//! Fills in defaults so that stored objects are explicit about their vhost
//! and the namespace of the cluster they reference.

use kube::ResourceExt;
use serde_json::Value;
use tracing::debug;

use super::validation::Admissible;
use crate::crd::{ClusterTarget, DEFAULT_VHOST};
use crate::error::Result;

/// Outcome of defaulting one object
#[derive(Debug)]
pub struct Mutation {
    pub patch: json_patch::Patch,
    pub warnings: Vec<String>,
}

/// Apply defaults in place and return warnings about the input.
pub fn apply_defaults<K: Admissible>(obj: &mut K, namespace: &str) -> Vec<String> {
    let mut warnings = Vec::new();
    let namespace = obj.namespace().unwrap_or_else(|| namespace.to_string());

    if let Some(vhost) = obj.vhost_mut() {
        if vhost.is_empty() {
            *vhost = DEFAULT_VHOST.to_string();
        }
    }

    let explicit = match obj.cluster_reference().target() {
        Ok(ClusterTarget::InCluster { namespace, .. }) => Some(namespace.map(str::to_string)),
        _ => None,
    };
    match explicit {
        Some(Some(ns)) if ns == namespace => warnings.push(format!(
            "spec.rabbitmqClusterReference.namespace '{ns}' is the object's own namespace and can be omitted"
        )),
        Some(None) => obj.cluster_reference_mut().namespace = Some(namespace),
        _ => {}
    }
    warnings
}

/// Default the raw admission `object` as kind `K`.
///
/// Only `spec` is rewritten; metadata and unknown top-level fields pass
/// through untouched.
pub fn mutate<K: Admissible>(object: &Value, namespace: &str) -> Result<Mutation> {
    let mut obj: K = serde_json::from_value(object.clone())?;
    let warnings = apply_defaults(&mut obj, namespace);

    let mut defaulted = object.clone();
    let typed = serde_json::to_value(&obj)?;
    defaulted["spec"] = typed["spec"].clone();
    let patch = json_patch::diff(object, &defaulted);
    debug!(
        "Defaulted {} {}: {} patch operations",
        K::kind(&()),
        obj.name_any(),
        patch.0.len()
    );

    Ok(Mutation { patch, warnings })
}
