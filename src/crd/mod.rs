//! Custom Resource Definitions for RabbitMQ messaging topology
//!
//! Every topology kind carries a `rabbitmqClusterReference` and shares the
//! same status shape. `RabbitmqCluster` is consumed, not owned.

mod binding;
pub mod cluster;
mod exchange;
mod policy;
mod queue;
mod schema_replication;
mod shovel;
mod super_stream;
pub mod types;
mod user;
mod vhost;


pub use binding::{Binding, BindingSpec};
pub use cluster::{RabbitmqCluster, RabbitmqClusterSpec, RabbitmqClusterStatus};
pub use exchange::{Exchange, ExchangeSpec};
pub use policy::{Policy, PolicySpec, POLICY_APPLY_TO};
pub use queue::{Queue, QueueSpec};
pub use schema_replication::{
    SchemaReplication, SchemaReplicationSpec, SCHEMA_REPLICATION_PARAMETER,
};
pub use shovel::{Federation, FederationSpec, Shovel, ShovelSpec};
pub use super_stream::{SuperStream, SuperStreamSpec};
pub use types::*;
pub use user::{Permission, PermissionSpec, User, UserSpec, VhostPermissions};
pub use vhost::{Vhost, VhostSpec};
