//! Controllers for RabbitMQ topology objects
//!
//! One generic reconciler drives every broker-backed kind. SuperStreams are
//! handled separately by fanning out into Exchange, Queue and Binding
//! children.

pub mod backoff;
pub mod client_cache;
pub mod cluster_ref;
pub mod conditions;
pub mod credentials;
mod finalizers;
pub mod kinds;
pub mod leader;
#[cfg(feature = "metrics")]
pub mod metrics;
mod reconciler;
pub mod store;
mod super_stream;
#[cfg(test)]
pub(crate) mod testing;

pub use client_cache::{BrokerClientFactory, ClientCache, ManagementClientFactory};
pub use cluster_ref::{ClusterConnection, ClusterResolver};
pub use finalizers::DeletionOutcome;
pub use kinds::TopologyResource;
pub use leader::{run_leader_election, LeaderState};
pub use reconciler::{
    error_policy, reconcile, run_topology_controller, Context, ReconcileSettings,
};
pub use store::{KubeStore, ObjectStore, ReferenceStore, FIELD_MANAGER};
pub use super_stream::{
    desired_children, run_super_stream_controller, DesiredChildren, SuperStreamContext,
    MAX_SUPER_STREAM_NAME_LEN, SUPER_STREAM_LABEL,
};
