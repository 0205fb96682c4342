//! Shared application state: the context template, the connection map and
//! the per-connection turn registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cancel::TurnMap;
use crate::context::ContextTemplate;
use crate::history::HistoryStore;
use crate::hub::Outbound;

/// Hub-side view of one connected client. The heavier per-connection state
/// (service context, receive buffer, wake gate) lives with the socket task.
pub struct ConnectionHandle {
    pub client_uid: Uuid,
    pub outbound: Outbound,
    last_heartbeat: Mutex<Instant>,
    /// Cancelled by the sweeper (or shutdown) to force-disconnect.
    pub shutdown: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(client_uid: Uuid, outbound: Outbound) -> Arc<Self> {
        Arc::new(Self {
            client_uid,
            outbound,
            last_heartbeat: Mutex::new(Instant::now()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn touch(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    pub fn heartbeat_age(&self) -> Duration {
        self.last_heartbeat.lock().elapsed()
    }
}

#[derive(Default)]
pub struct ConnectionMap {
    inner: RwLock<HashMap<Uuid, Arc<ConnectionHandle>>>,
}

impl ConnectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: Arc<ConnectionHandle>) {
        self.inner.write().insert(handle.client_uid, handle);
    }

    pub fn remove(&self, client_uid: Uuid) {
        self.inner.write().remove(&client_uid);
    }

    pub fn get(&self, client_uid: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.inner.read().get(&client_uid).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn all(&self) -> Vec<Arc<ConnectionHandle>> {
        self.inner.read().values().cloned().collect()
    }

    /// Connections whose last heartbeat is older than `ttl`.
    pub fn stale(&self, ttl: Duration) -> Vec<Arc<ConnectionHandle>> {
        self.inner
            .read()
            .values()
            .filter(|handle| handle.heartbeat_age() > ttl)
            .cloned()
            .collect()
    }
}

/// Shared state handed to the WebSocket route and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub template: Arc<ContextTemplate>,
    pub connections: Arc<ConnectionMap>,
    pub turns: Arc<TurnMap>,
    pub history: Arc<HistoryStore>,
}

impl AppState {
    pub fn new(template: Arc<ContextTemplate>) -> Self {
        let history_dir = template.config.system.history_dir.clone();
        Self {
            template,
            connections: Arc::new(ConnectionMap::new()),
            turns: Arc::new(TurnMap::new()),
            history: Arc::new(HistoryStore::new(history_dir)),
        }
    }
}
