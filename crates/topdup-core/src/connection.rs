//! Store connections with a single reconnect attempt.
//!
//! A [`Connection`] caches the store handle produced by a
//! [`StoreConnector`]. At the start of every run the engines call
//! [`Connection::acquire`]: a live cached handle is reused, otherwise one
//! reconnect is attempted. If that fails too the caller aborts the run and
//! the next scheduled invocation tries again.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::store::DocumentStore;

/// Opens a store backend.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Label used in logs (`"local"`, `"remote"`).
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<Arc<dyn DocumentStore>>;
}

/// Connector that always hands out the same store instance.
///
/// Useful for in-process stores such as
/// [`InMemoryStore`](crate::store::memory::InMemoryStore).
pub struct FixedConnector {
    name: String,
    store: Arc<dyn DocumentStore>,
}

impl FixedConnector {
    pub fn new(name: impl Into<String>, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }
}

#[async_trait]
impl StoreConnector for FixedConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<Arc<dyn DocumentStore>> {
        Ok(self.store.clone())
    }
}

/// A cached store handle plus the connector used to (re)open it.
pub struct Connection {
    connector: Box<dyn StoreConnector>,
    current: Mutex<Option<Arc<dyn DocumentStore>>>,
}

impl Connection {
    /// Create a connection without opening it; the first
    /// [`acquire`](Self::acquire) connects.
    pub fn new(connector: Box<dyn StoreConnector>) -> Self {
        Self {
            connector,
            current: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.connector.name()
    }

    /// Return a live store handle, reconnecting at most once.
    pub async fn acquire(&self) -> Result<Arc<dyn DocumentStore>> {
        let mut current = self.current.lock().await;

        if let Some(store) = current.as_ref() {
            match store.ping().await {
                Ok(()) => return Ok(store.clone()),
                Err(e) => warn!(
                    store = self.connector.name(),
                    error = %e,
                    "store connection lost, trying re-connect"
                ),
            }
        }

        *current = None;
        let store = self
            .connector
            .connect()
            .await
            .with_context(|| format!("failed to connect to {} store", self.connector.name()))?;
        store
            .ping()
            .await
            .with_context(|| format!("{} store not responding", self.connector.name()))?;

        info!(store = self.connector.name(), "store connected");
        *current = Some(store.clone());
        Ok(store)
    }
}
