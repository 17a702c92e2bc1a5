//! Lease-based leader election
//!
//! Only the leader issues broker mutations. Followers keep their watches warm
//! and requeue without calling the broker.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use tracing::{info, warn};

use crate::error::{Error, Result};

pub const LEASE_NAME: &str = "rabbitmq-topology-operator-leader-election";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// Bound on each Lease call; a stalled renewal must give up leadership
/// before the lease can expire for other replicas.
const LEASE_CALL_TIMEOUT: Duration = Duration::from_secs(4);

/// Shared view of whether this replica currently holds the lease.
#[derive(Clone, Debug, Default)]
pub struct LeaderState(Arc<AtomicBool>);

impl LeaderState {
    /// State for a replica running without election.
    pub fn always_leader() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_leader(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, leader: bool) {
        self.0.store(leader, Ordering::Relaxed);
    }
}

/// Keep acquiring or renewing the lease until the process exits.
pub async fn run_leader_election(
    client: kube::Client,
    namespace: String,
    identity: String,
    state: LeaderState,
) {
    let leases: Api<Lease> = Api::namespaced(client, &namespace);

    loop {
        let wait =
            election_step(&leases, &namespace, &identity, &state, LEASE_CALL_TIMEOUT).await;
        tokio::time::sleep(wait).await;
    }
}

/// One acquire-or-renew attempt. Returns how long to wait before the next.
///
/// Leadership is dropped on any failure, including a call that outlives
/// `call_timeout`.
async fn election_step(
    leases: &Api<Lease>,
    namespace: &str,
    identity: &str,
    state: &LeaderState,
    call_timeout: Duration,
) -> Duration {
    match try_acquire_or_renew(leases, namespace, identity, call_timeout).await {
        Ok(true) => {
            if !state.is_leader() {
                info!("Acquired leadership for lease {}", LEASE_NAME);
            }
            state.set(true);
            RENEW_INTERVAL
        }
        Ok(false) => {
            if state.is_leader() {
                warn!("Lost leadership for lease {}", LEASE_NAME);
            }
            state.set(false);
            RETRY_INTERVAL
        }
        Err(e) => {
            warn!("Leader election error: {}", e);
            state.set(false);
            RETRY_INTERVAL
        }
    }
}

async fn within<T, F>(limit: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, kube::Error>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(kube::Error::Api(err))) if err.code == 409 => {
            Err(Error::Conflict(format!("lease {LEASE_NAME}")))
        }
        Ok(Err(e)) => Err(Error::KubeError(e)),
        Err(_) => Err(Error::Timeout(format!("{operation} lease {LEASE_NAME}"))),
    }
}

/// Whether a lease held by someone else may be taken over at `now`.
pub fn lease_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let Some(renew) = spec.and_then(|s| s.renew_time.as_ref()) else {
        return true;
    };
    let duration = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(LEASE_DURATION_SECS);
    now > renew.0 + chrono::Duration::seconds(i64::from(duration))
}

async fn try_acquire_or_renew(
    leases: &Api<Lease>,
    namespace: &str,
    identity: &str,
    call_timeout: Duration,
) -> Result<bool> {
    let now = Utc::now();

    let Some(existing) = within(call_timeout, "get", leases.get_opt(LEASE_NAME)).await? else {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(identity.to_string()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                ..Default::default()
            }),
        };
        let post_params = PostParams::default();
        let create = leases.create(&post_params, &lease);
        return match within(call_timeout, "create", create).await {
            Ok(_) => {
                info!("Created lease {} with holder {}", LEASE_NAME, identity);
                Ok(true)
            }
            // Another replica created it first.
            Err(Error::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        };
    };

    let spec = existing.spec.as_ref();
    let current_holder = spec.and_then(|s| s.holder_identity.as_deref());

    let patch = if current_holder == Some(identity) {
        serde_json::json!({
            "metadata": { "resourceVersion": existing.resource_version() },
            "spec": {
                "renewTime": MicroTime(now),
                "leaseDurationSeconds": LEASE_DURATION_SECS,
            }
        })
    } else if lease_expired(spec, now) {
        info!("Lease held by {:?} has expired, taking over", current_holder);
        serde_json::json!({
            "metadata": { "resourceVersion": existing.resource_version() },
            "spec": {
                "holderIdentity": identity,
                "acquireTime": MicroTime(now),
                "renewTime": MicroTime(now),
                "leaseDurationSeconds": LEASE_DURATION_SECS,
            }
        })
    } else {
        return Ok(false);
    };

    let params = PatchParams::default();
    let merge = Patch::Merge(&patch);
    let renew = leases.patch(LEASE_NAME, &params, &merge);
    match within(call_timeout, "patch", renew).await {
        Ok(_) => Ok(true),
        Err(Error::Conflict(_)) => Ok(false),
        Err(e) => Err(e),
    }
}
