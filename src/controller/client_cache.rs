//! Cache of management API clients keyed by cluster identity
//!
//! Lookups take the read lock only. A miss or a stale entry (endpoint or
//! backing secret changed) takes the write lock, re-checks, and replaces the
//! entry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use super::cluster_ref::ClusterConnection;
use crate::error::Result;
use crate::rabbitmq::{BrokerClient, ManagementClient};

/// Builds a broker client for a resolved connection.
pub trait BrokerClientFactory: Send + Sync {
    fn create(&self, connection: &ClusterConnection) -> Result<Arc<dyn BrokerClient>>;
}

/// Factory producing [`ManagementClient`]s
#[derive(Clone, Debug)]
pub struct ManagementClientFactory {
    pub call_timeout: Duration,
}

impl Default for ManagementClientFactory {
    fn default() -> Self {
        Self {
            call_timeout: crate::rabbitmq::DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl BrokerClientFactory for ManagementClientFactory {
    fn create(&self, connection: &ClusterConnection) -> Result<Arc<dyn BrokerClient>> {
        let client = ManagementClient::new(
            &connection.endpoint,
            connection.credentials.clone(),
            connection.ca_certificate.as_deref(),
            self.call_timeout,
        )?;
        Ok(Arc::new(client))
    }
}

struct CacheEntry {
    fingerprint: String,
    client: Arc<dyn BrokerClient>,
}

pub struct ClientCache {
    factory: Arc<dyn BrokerClientFactory>,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ClientCache {
    pub fn new(factory: Arc<dyn BrokerClientFactory>) -> Self {
        Self {
            factory,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached client for `connection`, building a new one when
    /// none exists or the connection parameters changed.
    pub async fn client_for(
        &self,
        connection: &ClusterConnection,
    ) -> Result<Arc<dyn BrokerClient>> {
        let fingerprint = connection.fingerprint();
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&connection.key) {
                if entry.fingerprint == fingerprint {
                    return Ok(entry.client.clone());
                }
            }
        }

        let mut entries = self.entries.write().await;
        // Another worker may have refreshed the entry while we waited.
        if let Some(entry) = entries.get(&connection.key) {
            if entry.fingerprint == fingerprint {
                return Ok(entry.client.clone());
            }
            debug!(key = %connection.key, "cluster connection changed, rebuilding client");
        }

        let client = self.factory.create(connection)?;
        entries.insert(
            connection.key.clone(),
            CacheEntry {
                fingerprint,
                client: client.clone(),
            },
        );
        Ok(client)
    }

    pub async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
