//! Lazily opened, alias-keyed database clients.
//!
//! A [`ConnectionHandler`] owns the configured connection entries and a
//! [`ConnectionFactory`] that knows how to open a client for an engine.
//! Clients are created on first use of an alias and cached until
//! [`ConnectionHandler::close_all`].

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use terrapin_core::{ConnectionConfig, ConnectionSettings, TerrapinError, TerrapinResult};
use tokio::sync::Mutex;

use crate::executor::DbClient;

/// Opens clients for configured connections.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Opens a client for `alias` with the given settings.
    async fn connect(&self, alias: &str, settings: &ConnectionSettings) -> TerrapinResult<Arc<dyn DbClient>>;
}

/// Holds connection settings and the clients opened from them.
pub struct ConnectionHandler {
    settings: IndexMap<String, ConnectionConfig>,
    factory: Arc<dyn ConnectionFactory>,
    open: Mutex<HashMap<String, Arc<dyn DbClient>>>,
}

impl std::fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("aliases", &self.settings.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ConnectionHandler {
    /// Creates a handler; no connection is opened yet.
    pub fn new(
        settings: IndexMap<String, ConnectionConfig>,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        Self {
            settings,
            factory,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// The configured aliases.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.settings.keys().map(String::as_str)
    }

    /// The resolved settings for `alias`.
    pub fn db_config(&self, alias: &str) -> TerrapinResult<ConnectionSettings> {
        self.settings
            .get(alias)
            .ok_or_else(|| {
                TerrapinError::configuration(format!(
                    "Unable to get db settings for alias '{alias}'. Please check if the \
                     config dict contains this alias and try again"
                ))
            })?
            .resolve()
    }

    /// Returns the client for `alias`, opening it on first use.
    pub async fn get(&self, alias: &str) -> TerrapinResult<Arc<dyn DbClient>> {
        let mut open = self.open.lock().await;
        if let Some(client) = open.get(alias) {
            return Ok(Arc::clone(client));
        }
        let settings = self.db_config(alias)?;
        let client = self.factory.connect(alias, &settings).await?;
        tracing::debug!(connection = alias, engine = %settings.engine, "connection opened");
        open.insert(alias.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Number of clients opened so far.
    pub async fn open_count(&self) -> usize {
        self.open.lock().await.len()
    }

    /// Closes every open client. Every client is closed even if some fail;
    /// the first failure is returned.
    pub async fn close_all(&self) -> TerrapinResult<()> {
        let clients: Vec<(String, Arc<dyn DbClient>)> = self.open.lock().await.drain().collect();
        let mut first_error = None;
        for (alias, client) in clients {
            if let Err(e) = client.close().await {
                tracing::warn!(connection = %alias, error = %e, "failed to close connection");
                first_error.get_or_insert(e);
            } else {
                tracing::debug!(connection = %alias, "connection closed");
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
