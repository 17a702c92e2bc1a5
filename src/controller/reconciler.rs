//! Generic reconciler for topology resources
//!
//! One instance of the state machine runs per kind:
//!
//! ```text
//! Pending --add finalizer--> Active (Ready | Degraded) --deletionTimestamp--> Deleting --> Gone
//! ```
//!
//! Every pass starts from a fresh read of the object, so a queued stale event
//! never acts on an outdated spec.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{self, Action, Controller},
        watcher,
    },
    Resource, ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::backoff::FailureTracker;
use super::client_cache::ClientCache;
use super::cluster_ref::ClusterResolver;
use super::conditions::{mark_degraded, mark_ready};
use super::finalizers::{add_finalizer, finalize, has_finalizer, is_being_deleted, remove_finalizer};
use super::kinds::TopologyResource;
use super::leader::LeaderState;
#[cfg(feature = "metrics")]
use super::metrics;
use super::store::{ObjectStore, ReferenceStore};
use crate::crd::TopologyStatus;
use crate::error::{Error, Result};
use crate::rabbitmq::{BrokerError, BrokerObject};

/// Status writes are retried this many times on resourceVersion conflicts
const STATUS_WRITE_ATTEMPTS: u32 = 5;

/// Requeue after a resourceVersion conflict; conflicts do not advance backoff
pub(crate) const CONFLICT_REQUEUE: Duration = Duration::from_secs(1);

/// Timing knobs shared by all topology controllers
#[derive(Clone, Debug)]
pub struct ReconcileSettings {
    /// Requeue interval after success or a terminal failure
    pub resync_period: Duration,
    /// Upper bound for a single management API call
    pub broker_timeout: Duration,
    /// Requeue interval while this replica is not the leader
    pub follower_requeue: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            resync_period: Duration::from_secs(300),
            broker_timeout: crate::rabbitmq::DEFAULT_CALL_TIMEOUT,
            follower_requeue: Duration::from_secs(15),
        }
    }
}

/// Shared state for one kind's controller
pub struct Context<K> {
    pub store: Arc<dyn ObjectStore<K>>,
    pub refs: Arc<dyn ReferenceStore>,
    pub resolver: ClusterResolver,
    pub clients: Arc<ClientCache>,
    pub leader: LeaderState,
    pub settings: ReconcileSettings,
    pub failures: FailureTracker,
}

impl<K> Context<K> {
    pub fn new(
        store: Arc<dyn ObjectStore<K>>,
        refs: Arc<dyn ReferenceStore>,
        resolver: ClusterResolver,
        clients: Arc<ClientCache>,
        leader: LeaderState,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            store,
            refs,
            resolver,
            clients,
            leader,
            settings,
            failures: FailureTracker::default(),
        }
    }
}

/// Run the controller for kind `K` until shutdown
pub async fn run_topology_controller<K: TopologyResource>(
    client: Client,
    ctx: Arc<Context<K>>,
    workers: u16,
) {
    let api: Api<K> = Api::all(client);
    info!("Starting {} controller", K::CONTROLLER);

    Controller::new(api, watcher::Config::default().any_semantic())
        .with_config(controller::Config::default().concurrency(workers))
        .shutdown_on_signal()
        .run(reconcile::<K>, error_policy::<K>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", K::CONTROLLER, obj.name),
                Err(e) => debug!("{} reconcile failed: {:?}", K::CONTROLLER, e),
            }
        })
        .await;
}

/// The main reconciliation function
///
/// Called whenever an object of kind `K` changes or its requeue timer fires.
#[instrument(skip(obj, ctx), fields(controller = K::CONTROLLER, name = %obj.name_any(), namespace = obj.namespace()))]
pub async fn reconcile<K: TopologyResource>(obj: Arc<K>, ctx: Arc<Context<K>>) -> Result<Action> {
    let started = Instant::now();
    let result = reconcile_object(obj.as_ref(), &ctx).await;

    #[cfg(feature = "metrics")]
    metrics::observe_reconcile_duration_seconds(K::CONTROLLER, started.elapsed().as_secs_f64());
    #[cfg(not(feature = "metrics"))]
    let _ = started;

    result
}

async fn reconcile_object<K: TopologyResource>(obj: &K, ctx: &Context<K>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    let key = format!("{namespace}/{name}");

    let Some(obj) = ctx.store.get(&namespace, &name).await? else {
        debug!("{} {} is gone", K::CONTROLLER, key);
        ctx.failures.reset(&key);
        return Ok(Action::await_change());
    };

    if !ctx.leader.is_leader() {
        debug!("Not the leader, skipping {} {}", K::CONTROLLER, key);
        return Ok(Action::requeue(ctx.settings.follower_requeue));
    }

    if is_being_deleted(&obj) {
        if !has_finalizer(&obj, K::FINALIZER) {
            return Ok(Action::await_change());
        }
        return match finalize(ctx, &obj).await {
            Ok(outcome) => {
                info!("Cleaned up {} {} ({:?})", K::CONTROLLER, key, outcome);
                remove_finalizer(ctx, &obj).await?;
                ctx.failures.reset(&key);
                Ok(Action::await_change())
            }
            Err(e) => {
                warn!("Failed to delete {} {}: {}", K::CONTROLLER, key, e);
                #[cfg(feature = "metrics")]
                metrics::inc_reconcile_error(K::CONTROLLER, e.metric_kind());
                Ok(Action::requeue(ctx.failures.next_delay(&key)))
            }
        };
    }

    // Persist the finalizer before anything exists on the broker.
    if !has_finalizer(&obj, K::FINALIZER) {
        add_finalizer(ctx, &obj).await?;
        return Ok(Action::requeue(Duration::ZERO));
    }

    let generation = obj.meta().generation;
    let mut status = obj.topology_status().cloned().unwrap_or_default();

    let action = match declare(ctx, &obj).await {
        Ok(object) => {
            debug!("Declared {} {} on {}", K::CONTROLLER, key, object.vhost);
            mark_ready(&mut status.conditions, "", generation);
            status.observed_generation = generation;
            obj.record(&object, &mut status);
            ctx.failures.reset(&key);
            Action::requeue(ctx.settings.resync_period)
        }
        Err(e) => {
            #[cfg(feature = "metrics")]
            metrics::inc_reconcile_error(K::CONTROLLER, e.metric_kind());
            mark_degraded(&mut status.conditions, e.reason(), &e.to_string(), generation);
            if e.is_retriable() {
                warn!("Transient failure for {} {}: {}", K::CONTROLLER, key, e);
                Action::requeue(ctx.failures.next_delay(&key))
            } else {
                error!("Terminal failure for {} {}: {}", K::CONTROLLER, key, e);
                Action::requeue(ctx.settings.resync_period)
            }
        }
    };

    write_status(ctx.store.as_ref(), &obj, obj.topology_status(), &status).await?;
    Ok(action)
}

/// Resolve the cluster and declare the broker object.
async fn declare<K: TopologyResource>(ctx: &Context<K>, obj: &K) -> Result<BrokerObject> {
    let namespace = obj.namespace().unwrap_or_default();
    let connection = ctx
        .resolver
        .resolve(ctx.refs.as_ref(), obj.cluster_reference(), &namespace)
        .await?;

    let mut object = obj.broker_object();
    obj.resolve_secrets(&mut object, ctx.refs.as_ref()).await?;

    let client = ctx.clients.client_for(&connection).await?;
    let declare = client.declare(&object);
    call_broker(ctx, K::CONTROLLER, "declare", &connection.key, declare).await?;
    Ok(object)
}

/// Run one management API call under the broker timeout.
pub(crate) async fn call_broker<K, F>(
    ctx: &Context<K>,
    controller: &str,
    operation: &str,
    cache_key: &str,
    call: F,
) -> Result<()>
where
    F: Future<Output = std::result::Result<(), BrokerError>>,
{
    let result = match tokio::time::timeout(ctx.settings.broker_timeout, call).await {
        Ok(result) => result.map_err(Error::Broker),
        Err(_) => Err(Error::Timeout(format!("{operation} on {cache_key}"))),
    };

    #[cfg(feature = "metrics")]
    {
        let outcome = match &result {
            Ok(()) => "ok",
            Err(Error::Broker(BrokerError::NotFound)) => "not_found",
            Err(e) if e.is_retriable() => "transient",
            Err(_) => "rejected",
        };
        metrics::inc_broker_call(controller, operation, outcome);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = controller;

    // Credentials were rotated without a secret change we could see.
    if let Err(Error::Broker(BrokerError::Rejected { status: 401, .. })) = &result {
        ctx.clients.invalidate(cache_key).await;
    }
    result
}

/// Persist `status`, re-reading the object on resourceVersion conflicts.
pub(crate) async fn write_status<K>(
    store: &dyn ObjectStore<K>,
    obj: &K,
    current: Option<&TopologyStatus>,
    status: &TopologyStatus,
) -> Result<()>
where
    K: Resource + Clone + Send + Sync,
{
    if current == Some(status) {
        return Ok(());
    }

    let namespace = obj.namespace().unwrap_or_default();
    let name = obj.name_any();
    let mut latest = obj.clone();
    let mut attempt = 1;
    loop {
        match store.patch_status(&latest, status).await {
            Err(Error::Conflict(_)) if attempt < STATUS_WRITE_ATTEMPTS => {
                debug!("Status conflict on {}/{}, retrying", namespace, name);
                attempt += 1;
                match store.get(&namespace, &name).await? {
                    Some(fresh) => latest = fresh,
                    None => return Ok(()),
                }
            }
            result => return result,
        }
    }
}

/// Error policy for errors that escaped the state machine (Kubernetes API
/// failures and exhausted status conflicts)
pub fn error_policy<K: TopologyResource>(obj: Arc<K>, error: &Error, ctx: Arc<Context<K>>) -> Action {
    let key = format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any());
    if let Error::Conflict(_) = error {
        debug!("Conflict on {} {}, requeueing", K::CONTROLLER, key);
        return Action::requeue(CONFLICT_REQUEUE);
    }
    #[cfg(feature = "metrics")]
    metrics::inc_reconcile_error(K::CONTROLLER, error.metric_kind());
    warn!("Reconciliation error for {} {}: {}", K::CONTROLLER, key, error);

    if error.is_retriable() {
        Action::requeue(ctx.failures.next_delay(&key))
    } else {
        Action::requeue(ctx.settings.resync_period)
    }
}
