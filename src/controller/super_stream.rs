//! SuperStream fan-out
//!
//! A SuperStream never talks to the broker itself. It owns one Exchange, N
//! Queues and N Bindings which the regular topology controllers reconcile.
//! Deleting the parent relies on garbage collection of the owned children.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{
    api::{Api, ObjectMeta},
    client::Client,
    runtime::{
        controller::{self, Action, Controller},
        watcher,
    },
    Resource, ResourceExt,
};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::backoff::FailureTracker;
use super::conditions::{is_reconciled, mark_degraded, mark_ready, REASON_CHILDREN_NOT_READY};
use super::leader::LeaderState;
#[cfg(feature = "metrics")]
use super::metrics;
use super::reconciler::{write_status, ReconcileSettings, CONFLICT_REQUEUE};
use super::store::ObjectStore;
use crate::crd::{
    Binding, BindingSpec, DeletionPolicy, Exchange, ExchangeSpec, Queue, QueueSpec, SuperStream,
    TopologyStatus,
};
use crate::error::{Error, Result};

pub const CONTROLLER: &str = "superstream";

/// Label carried by every child, value is the parent's name
pub const SUPER_STREAM_LABEL: &str = "rabbitmq.com/super-stream";

/// Binding argument giving a partition's position in the stream
pub const PARTITION_ORDER_ARGUMENT: &str = "x-stream-partition-order";

/// Kubernetes limit on label values; the parent name is used as one
pub const MAX_SUPER_STREAM_NAME_LEN: usize = 63;

/// Requeue interval while children are still converging
const CHILD_POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct SuperStreamContext {
    pub streams: Arc<dyn ObjectStore<SuperStream>>,
    pub exchanges: Arc<dyn ObjectStore<Exchange>>,
    pub queues: Arc<dyn ObjectStore<Queue>>,
    pub bindings: Arc<dyn ObjectStore<Binding>>,
    pub leader: LeaderState,
    pub settings: ReconcileSettings,
    pub failures: FailureTracker,
}

/// The complete child set of a super stream
#[derive(Clone, Debug)]
pub struct DesiredChildren {
    pub exchange: Exchange,
    pub queues: Vec<Queue>,
    pub bindings: Vec<Binding>,
}

impl DesiredChildren {
    /// Always `1 + 2N`
    pub fn count(&self) -> usize {
        1 + self.queues.len() + self.bindings.len()
    }
}

/// Broker-side name of the super stream
pub fn stream_name(stream: &SuperStream) -> String {
    if stream.spec.name.is_empty() {
        stream.name_any()
    } else {
        stream.spec.name.clone()
    }
}

/// Broker-side name of partition queue `index`
pub fn partition_queue_name(stream: &SuperStream, index: usize) -> String {
    format!("{}-{}", stream_name(stream), stream.spec.routing_key(index))
}

fn child_meta(stream: &SuperStream, name: String, owner: &OwnerReference) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: stream.namespace(),
        labels: Some(BTreeMap::from([(
            SUPER_STREAM_LABEL.to_string(),
            stream.name_any(),
        )])),
        owner_references: Some(vec![owner.clone()]),
        ..Default::default()
    }
}

/// Compute the child objects for `stream`.
///
/// The result depends only on the parent's spec and identity, so repeated
/// calls always produce the same set.
pub fn desired_children(stream: &SuperStream) -> Result<DesiredChildren> {
    let owner = stream.controller_owner_ref(&()).ok_or_else(|| {
        Error::ValidationError(format!("super stream {} has no uid yet", stream.name_any()))
    })?;
    let parent = stream.name_any();
    if parent.len() > MAX_SUPER_STREAM_NAME_LEN {
        return Err(Error::ValidationError(format!(
            "super stream name {parent} is longer than {MAX_SUPER_STREAM_NAME_LEN} characters"
        )));
    }
    let spec = &stream.spec;
    let exchange_name = stream_name(stream);
    let partitions = spec.partitions as usize;

    let exchange = Exchange {
        metadata: child_meta(stream, format!("{parent}-exchange"), &owner),
        spec: ExchangeSpec {
            name: exchange_name.clone(),
            vhost: spec.vhost.clone(),
            type_: "direct".to_string(),
            durable: true,
            auto_delete: false,
            arguments: None,
            deletion_policy: DeletionPolicy::Delete,
            rabbitmq_cluster_reference: spec.rabbitmq_cluster_reference.clone(),
        },
        status: None,
    };

    let queues = (0..partitions)
        .map(|i| Queue {
            metadata: child_meta(stream, format!("{parent}-{i}"), &owner),
            spec: QueueSpec {
                name: partition_queue_name(stream, i),
                vhost: spec.vhost.clone(),
                type_: Some("stream".to_string()),
                durable: true,
                auto_delete: false,
                arguments: None,
                deletion_policy: DeletionPolicy::Delete,
                rabbitmq_cluster_reference: spec.rabbitmq_cluster_reference.clone(),
            },
            status: None,
        })
        .collect();

    let bindings = (0..partitions)
        .map(|i| Binding {
            metadata: child_meta(stream, format!("{parent}-{i}"), &owner),
            spec: BindingSpec {
                vhost: spec.vhost.clone(),
                source: exchange_name.clone(),
                destination: partition_queue_name(stream, i),
                destination_type: "queue".to_string(),
                routing_key: spec.routing_key(i),
                arguments: Some(json!({ PARTITION_ORDER_ARGUMENT: i })),
                rabbitmq_cluster_reference: spec.rabbitmq_cluster_reference.clone(),
            },
            status: None,
        })
        .collect();

    Ok(DesiredChildren {
        exchange,
        queues,
        bindings,
    })
}

/// Run the SuperStream controller until shutdown
pub async fn run_super_stream_controller(client: Client, ctx: Arc<SuperStreamContext>, workers: u16) {
    let streams: Api<SuperStream> = Api::all(client.clone());
    info!("Starting {} controller", CONTROLLER);

    Controller::new(streams, watcher::Config::default().any_semantic())
        .owns(Api::<Exchange>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Queue>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Binding>::all(client), watcher::Config::default())
        .with_config(controller::Config::default().concurrency(workers))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled super stream {}", obj.name),
                Err(e) => debug!("Super stream reconcile failed: {:?}", e),
            }
        })
        .await;
}

#[instrument(skip(stream, ctx), fields(name = %stream.name_any(), namespace = stream.namespace()))]
pub async fn reconcile(stream: Arc<SuperStream>, ctx: Arc<SuperStreamContext>) -> Result<Action> {
    let started = Instant::now();
    let result = reconcile_stream(stream.as_ref(), &ctx).await;

    #[cfg(feature = "metrics")]
    metrics::observe_reconcile_duration_seconds(CONTROLLER, started.elapsed().as_secs_f64());
    #[cfg(not(feature = "metrics"))]
    let _ = started;

    result
}

async fn reconcile_stream(stream: &SuperStream, ctx: &SuperStreamContext) -> Result<Action> {
    let namespace = stream.namespace().unwrap_or_default();
    let name = stream.name_any();
    let key = format!("{namespace}/{name}");

    let Some(stream) = ctx.streams.get(&namespace, &name).await? else {
        ctx.failures.reset(&key);
        return Ok(Action::await_change());
    };
    if !ctx.leader.is_leader() {
        return Ok(Action::requeue(ctx.settings.follower_requeue));
    }
    // Children go with the parent through owner references.
    if stream.meta().deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let generation = stream.meta().generation;
    let mut status = stream.status.clone().unwrap_or_default();
    let action = match sync_all(ctx, &stream).await {
        Ok((ready, total)) if ready == total => {
            mark_ready(&mut status.conditions, "", generation);
            status.observed_generation = generation;
            ctx.failures.reset(&key);
            Action::requeue(ctx.settings.resync_period)
        }
        Ok((ready, total)) => {
            let message = format!("{ready} of {total} children ready");
            debug!("Super stream {}: {}", key, message);
            mark_degraded(&mut status.conditions, REASON_CHILDREN_NOT_READY, &message, generation);
            Action::requeue(CHILD_POLL_INTERVAL)
        }
        Err(e @ Error::Conflict(_)) => return Err(e),
        Err(e) => {
            #[cfg(feature = "metrics")]
            metrics::inc_reconcile_error(CONTROLLER, e.metric_kind());
            mark_degraded(&mut status.conditions, e.reason(), &e.to_string(), generation);
            if e.is_retriable() {
                warn!("Failed to sync children of super stream {}: {}", key, e);
                Action::requeue(ctx.failures.next_delay(&key))
            } else {
                warn!("Super stream {} cannot be fanned out: {}", key, e);
                Action::requeue(ctx.settings.resync_period)
            }
        }
    };

    write_status(ctx.streams.as_ref(), &stream, stream.status.as_ref(), &status).await?;
    Ok(action)
}

/// Sync every child kind; returns ready and desired child counts.
async fn sync_all(ctx: &SuperStreamContext, stream: &SuperStream) -> Result<(usize, usize)> {
    let desired = desired_children(stream)?;
    let namespace = stream.namespace().unwrap_or_default();
    let uid = stream.uid().unwrap_or_default();
    let selector = format!("{SUPER_STREAM_LABEL}={}", stream.name_any());

    let mut ready = 0;
    ready += sync_children(
        ctx.exchanges.as_ref(),
        std::slice::from_ref(&desired.exchange),
        &namespace,
        &selector,
        &uid,
    )
    .await?;
    ready += sync_children(ctx.queues.as_ref(), &desired.queues, &namespace, &selector, &uid).await?;
    ready += sync_children(ctx.bindings.as_ref(), &desired.bindings, &namespace, &selector, &uid)
        .await?;
    Ok((ready, desired.count()))
}

/// Bring one kind of children in line with `desired` and count the ready ones.
async fn sync_children<K>(
    store: &dyn ObjectStore<K>,
    desired: &[K],
    namespace: &str,
    selector: &str,
    parent_uid: &str,
) -> Result<usize>
where
    K: ChildResource,
{
    let existing = store.list_labelled(namespace, selector).await?;

    let mut stale = Vec::new();
    for child in &existing {
        let owned = child.owner_references().iter().any(|o| o.uid == parent_uid);
        if !owned {
            info!("Deleting {} with stale owner", child.name_any());
            store.delete(namespace, &child.name_any()).await?;
            stale.push(child.name_any());
        }
    }

    let mut ready = 0;
    for want in desired {
        let name = want.name_any();
        if stale.contains(&name) {
            continue;
        }
        match existing.iter().find(|c| c.name_any() == name) {
            // Wait for the old object to finish terminating.
            Some(current) if current.meta().deletion_timestamp.is_some() => {}
            Some(current) if current.same_spec(want) => {
                if is_reconciled(current.conditions(), current.meta().generation) {
                    ready += 1;
                }
            }
            _ => {
                debug!("Applying child {}", name);
                store.apply(want).await?;
            }
        }
    }
    Ok(ready)
}

/// What the fan-out needs to know about a child kind
pub trait ChildResource: Resource + Send + Sync {
    fn same_spec(&self, other: &Self) -> bool;
    fn conditions(&self) -> &[crate::crd::Condition];
}

macro_rules! child_resource {
    ($($kind:ty),*) => {
        $(
            impl ChildResource for $kind {
                fn same_spec(&self, other: &Self) -> bool {
                    self.spec == other.spec
                }

                fn conditions(&self) -> &[crate::crd::Condition] {
                    self.status
                        .as_ref()
                        .map(|s: &TopologyStatus| s.conditions.as_slice())
                        .unwrap_or_default()
                }
            }
        )*
    };
}

child_resource!(Exchange, Queue, Binding);

pub fn error_policy(stream: Arc<SuperStream>, error: &Error, ctx: Arc<SuperStreamContext>) -> Action {
    let key = format!("{}/{}", stream.namespace().unwrap_or_default(), stream.name_any());
    if let Error::Conflict(_) = error {
        debug!("Conflict on super stream {}, requeueing", key);
        return Action::requeue(CONFLICT_REQUEUE);
    }
    #[cfg(feature = "metrics")]
    metrics::inc_reconcile_error(CONTROLLER, error.metric_kind());
    warn!("Super stream reconciliation error for {}: {}", key, error);

    if error.is_retriable() {
        Action::requeue(ctx.failures.next_delay(&key))
    } else {
        Action::requeue(ctx.settings.resync_period)
    }
}
