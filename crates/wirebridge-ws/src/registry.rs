//! Registry of live connections.
//!
//! The registry maps connection IDs to their write handles. It is shared by
//! the endpoint (which registers and removes connections), the idle pinger
//! (which sweeps it) and the application (which may look connections up to
//! send to them). Entries may disappear at any point during a sweep.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;
use tracing::{debug, info, warn};
use wirebridge_codec::CloseCode;

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::error::{WsError, WsResult};
use crate::telemetry;

/// Statistics about the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of registered connections.
    pub active_connections: usize,
    /// Total connections ever registered.
    pub total_accepted: usize,
    /// Total connections refused because of limits or shutdown.
    pub total_rejected: usize,
    /// Total connections removed.
    pub total_closed: usize,
}

/// Concurrent map of live connections.
///
/// # Example
///
/// ```
/// use wirebridge_ws::ConnectionRegistry;
///
/// let registry = ConnectionRegistry::new(100);
/// assert!(registry.is_empty());
/// assert_eq!(registry.stats().total_accepted, 0);
/// ```
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    max_connections: usize,
    total_accepted: AtomicUsize,
    total_rejected: AtomicUsize,
    total_closed: AtomicUsize,
    is_shutdown: AtomicBool,
}

impl ConnectionRegistry {
    /// Create an empty registry holding at most `max_connections` entries.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_connections,
            total_accepted: AtomicUsize::new(0),
            total_rejected: AtomicUsize::new(0),
            total_closed: AtomicUsize::new(0),
            is_shutdown: AtomicBool::new(false),
        }
    }

    /// Register a connection.
    ///
    /// Fails when the registry is full or shutting down.
    pub fn register(&self, handle: ConnectionHandle) -> WsResult<()> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(WsError::connection_limit("endpoint is shutting down"));
        }

        let current = self.connections.len();
        if current >= self.max_connections {
            self.total_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(
                current = current,
                max = self.max_connections,
                "Connection limit reached"
            );
            return Err(WsError::connection_limit(format!(
                "maximum connections ({}) reached",
                self.max_connections
            )));
        }

        let id = handle.id();
        self.connections.insert(id, handle);
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
        telemetry::record_connection_accepted(self.connections.len());

        debug!(
            connection_id = %id,
            total = self.connections.len(),
            "Connection registered"
        );
        Ok(())
    }

    /// Remove a connection. Returns its handle if it was registered.
    pub fn remove(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        let removed = self.connections.remove(id).map(|(_, handle)| handle);
        if removed.is_some() {
            self.total_closed.fetch_add(1, Ordering::Relaxed);
            telemetry::record_connection_closed(self.connections.len());
            debug!(connection_id = %id, "Connection removed");
        }
        removed
    }

    /// Get a connection's handle.
    pub fn get(&self, id: &ConnectionId) -> Option<ConnectionHandle> {
        self.connections.get(id).map(|e| e.value().clone())
    }

    /// Check if a connection is registered.
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no registered connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// All registered connection IDs.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| *e.key()).collect()
    }

    /// Snapshot of every registered handle.
    ///
    /// The map is not locked while the caller works through the snapshot.
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    /// Statistics about the registry.
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            active_connections: self.connections.len(),
            total_accepted: self.total_accepted.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_closed: self.total_closed.load(Ordering::Relaxed),
        }
    }

    /// Start a normal close of one connection.
    ///
    /// Sends Close (1000) and leaves teardown to the connection's own task
    /// once the peer answers or the close timeout passes.
    pub async fn close(&self, id: &ConnectionId) -> WsResult<()> {
        let handle = self
            .get(id)
            .ok_or_else(|| WsError::connection_not_found(id.to_string()))?;
        handle.send_close(CloseCode::Normal.as_u16(), "").await
    }

    /// Check if shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Refuse new connections and close every registered one with 1001.
    ///
    /// Returns the number of connections that were closed.
    pub async fn shutdown(&self) -> usize {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return 0;
        }

        let handles = self.handles();
        info!(connections = handles.len(), "Initiating shutdown");

        for handle in &handles {
            if let Err(e) = handle
                .send_close(CloseCode::GoingAway.as_u16(), CloseCode::GoingAway.reason())
                .await
            {
                debug!(connection_id = %handle.id(), error = %e, "Close frame not sent");
            }
            handle.close().await;
            self.remove(&handle.id());
        }

        handles.len()
    }
}
