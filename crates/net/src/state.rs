//! Shared server state

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cohome_core::{Coordinator, Database, NegotiationPolicy, Result};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::gateway::{Gateway, PresenceSink, DEFAULT_CHANNEL_CAPACITY, HEARTBEAT_INTERVAL};
use crate::registry::SessionRegistry;

/// Runtime settings for the HTTP surface
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub heartbeat_interval: Duration,
    pub channel_capacity: usize,
    /// Session ids whose push channel skips authentication
    pub sandbox_sessions: HashSet<Uuid>,
    pub policy: NegotiationPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            sandbox_sessions: HashSet::new(),
            policy: NegotiationPolicy::default(),
        }
    }
}

pub struct AppState {
    // One connection; holding the lock serializes every mutation
    db: Mutex<Database>,
    gateway: Gateway,
    config: ServerConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(db: Database, config: ServerConfig) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let gateway = Gateway::new(registry, config.channel_capacity, config.heartbeat_interval);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            db: Mutex::new(db),
            gateway,
            config,
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn registry(&self) -> &SessionRegistry {
        self.gateway.registry()
    }

    pub fn is_sandbox(&self, session_id: Uuid) -> bool {
        self.config.sandbox_sessions.contains(&session_id)
    }

    pub fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against a coordinator while holding the database lock
    pub fn with_coordinator<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Coordinator<'_, Database>) -> Result<T>,
    {
        let db = self.db();
        let coordinator = Coordinator::new(&*db, self.config.policy);
        f(&coordinator)
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl PresenceSink for AppState {
    fn set_online(&self, session_id: Uuid, user_id: Uuid, is_online: bool) {
        match self.with_coordinator(|co| co.set_online(session_id, user_id, is_online)) {
            Ok(_) => {}
            Err(e) => warn!(
                session_id = %session_id,
                user_id = %user_id,
                error = %e,
                "Failed to persist presence"
            ),
        }
    }
}
