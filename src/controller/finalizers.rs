//! Finalizer handling for topology objects
//!
//! A finalizer is added before the first broker call and removed only after
//! the broker object is confirmed gone, or was never ours to delete:
//! 1. `deletionPolicy: retain` skips the broker call entirely
//! 2. the referenced cluster (or connection secret) no longer exists
//! 3. the broker answers "not found"

use kube::{Resource, ResourceExt};
use tracing::info;

use super::kinds::TopologyResource;
use super::reconciler::{call_broker, Context};
use crate::crd::DeletionPolicy;
use crate::error::{Error, Result};
use crate::rabbitmq::BrokerError;

/// Why the finalizer could be released
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionOutcome {
    Deleted,
    AlreadyGone,
    ClusterGone,
    Retained,
}

/// Check if the object is being deleted
pub fn is_being_deleted<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

/// Check if the object carries `finalizer`
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Add the kind's finalizer. Called before any broker call.
pub async fn add_finalizer<K: TopologyResource>(ctx: &Context<K>, obj: &K) -> Result<()> {
    let mut finalizers = obj.finalizers().to_vec();
    finalizers.push(K::FINALIZER.to_string());
    ctx.store.set_finalizers(obj, finalizers).await?;
    info!("Added finalizer to {} {}", K::CONTROLLER, obj.name_any());
    Ok(())
}

/// Remove the kind's finalizer once cleanup is complete. Once the finalizer
/// is removed, Kubernetes completes the deletion.
pub async fn remove_finalizer<K: TopologyResource>(ctx: &Context<K>, obj: &K) -> Result<()> {
    let finalizers: Vec<String> = obj
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != K::FINALIZER)
        .cloned()
        .collect();
    ctx.store.set_finalizers(obj, finalizers).await?;
    info!("Removed finalizer from {} {}", K::CONTROLLER, obj.name_any());
    Ok(())
}

/// Delete the broker object behind `obj`.
///
/// Returns an outcome when the finalizer may be released, an error when the
/// deletion must be retried.
pub async fn finalize<K: TopologyResource>(ctx: &Context<K>, obj: &K) -> Result<DeletionOutcome> {
    if obj.deletion_policy() == DeletionPolicy::Retain {
        return Ok(DeletionOutcome::Retained);
    }

    let namespace = obj.namespace().unwrap_or_default();
    let connection = match ctx
        .resolver
        .resolve(ctx.refs.as_ref(), obj.cluster_reference(), &namespace)
        .await
    {
        Ok(connection) => connection,
        Err(e) if e.is_target_gone() => return Ok(DeletionOutcome::ClusterGone),
        // Nothing can have been declared through an unusable reference.
        Err(Error::InvalidReference(_)) => return Ok(DeletionOutcome::ClusterGone),
        Err(e) => return Err(e),
    };

    let object = obj.broker_object();
    let client = ctx.clients.client_for(&connection).await?;
    let delete = client.delete(&object);
    match call_broker(ctx, K::CONTROLLER, "delete", &connection.key, delete).await {
        Ok(()) => Ok(DeletionOutcome::Deleted),
        Err(Error::Broker(BrokerError::NotFound)) => Ok(DeletionOutcome::AlreadyGone),
        Err(e) => Err(e),
    }
}
