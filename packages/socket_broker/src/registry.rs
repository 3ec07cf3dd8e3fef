//! Per-endpoint broker bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::broker::{BrokerConfig, BrokerHandle, SocketBroker};
use crate::transport::Connector;

/// Hands out one broker per endpoint, spawning it on first use.
pub struct BrokerRegistry<C: Connector + Clone> {
    brokers: Arc<RwLock<HashMap<String, BrokerHandle>>>,
    connector: C,
    config: BrokerConfig,
}

impl<C: Connector + Clone> BrokerRegistry<C> {
    pub fn new(connector: C) -> Self {
        Self::with_config(connector, BrokerConfig::default())
    }

    pub fn with_config(connector: C, config: BrokerConfig) -> Self {
        Self {
            brokers: Arc::new(RwLock::new(HashMap::new())),
            connector,
            config,
        }
    }

    /// The broker for `url`, spawned on first use.
    pub async fn broker_for(&self, url: &str) -> BrokerHandle {
        if let Some(handle) = self.brokers.read().await.get(url) {
            return handle.clone();
        }

        let mut brokers = self.brokers.write().await;
        // Another task may have spawned it while we waited for the lock.
        if let Some(handle) = brokers.get(url) {
            return handle.clone();
        }

        debug!(url = %url, "spawning broker");
        let handle = SocketBroker::spawn_with(self.connector.clone(), self.config.clone());
        brokers.insert(url.to_string(), handle.clone());
        handle
    }

    /// Drop the registry's handle for `url`. A broker with live consumers
    /// keeps running until their handles are gone too.
    pub async fn remove(&self, url: &str) -> bool {
        self.brokers.write().await.remove(url).is_some()
    }

    /// Endpoints with a registered broker.
    pub async fn list(&self) -> Vec<String> {
        self.brokers.read().await.keys().cloned().collect()
    }
}
