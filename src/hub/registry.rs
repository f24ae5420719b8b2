//! Connection registry partitioned by session.
//!
//! The registry keeps every live connection in a map keyed by an opaque
//! [`ConnectionId`], plus an index from session id to the connections bound
//! to it. Both structures sit behind one `RwLock`:
//!
//! - [`ConnectionRegistry::register`] and [`ConnectionRegistry::unregister`]
//!   take the write lock, so a broadcast never sees a half-added connection.
//! - [`ConnectionRegistry::broadcast_to_session`] takes the read lock and only
//!   uses `try_send`, so broadcasts run concurrently and never block.
//!
//! A connection that registers while a broadcast is running receives the
//! frame only if its registration completed before the broadcast took the
//! lock.
//!
//! The registry holds the only sender of each outbound queue. Removing the
//! connection drops that sender, which closes the queue exactly once and lets
//! the outbound pump observe end-of-stream.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc::{self, error::TrySendError};

use super::frame::{Frame, Payload};

/// Opaque handle of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a process-unique id.
    #[must_use]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A live connection bound to one session.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    client_id: String,
    session_id: String,
    tx: mpsc::Sender<Payload>,
}

impl Connection {
    /// Create a connection and the receiving end of its outbound queue.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        session_id: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Payload>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let connection = Self {
            id: ConnectionId::new(),
            client_id: client_id.into(),
            session_id: session_id.into(),
            tx,
        };
        (connection, rx)
    }

    /// Registry handle of this connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Client identifier supplied at upgrade.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Session this connection is bound to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Per-recipient result of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Frames queued for delivery.
    pub delivered: usize,
    /// Frames dropped because the recipient's queue was full.
    pub dropped: usize,
    /// Recipients whose outbound pump has already stopped.
    pub closed: usize,
}

impl BroadcastReport {
    /// Total recipients the broadcast was addressed to.
    #[must_use]
    pub fn recipients(&self) -> usize {
        self.delivered + self.dropped + self.closed
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Connection>,
    sessions: HashMap<String, HashSet<ConnectionId>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    state: RwLock<RegistryState>,
    dropped_frames: AtomicU64,
}

/// Registry of live connections, partitioned by session.
///
/// Cloning yields a handle to the same registry.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the global set and to its session partition.
    pub fn register(&self, connection: Connection) -> ConnectionId {
        let id = connection.id;
        let session_id = connection.session_id.clone();
        let client_id = connection.client_id.clone();

        let mut state = self.write();
        state
            .sessions
            .entry(session_id.clone())
            .or_default()
            .insert(id);
        state.connections.insert(id, connection);
        let peers = state.sessions.get(&session_id).map_or(0, HashSet::len);
        drop(state);

        tracing::info!(
            name: "hub.connection.registered",
            connection_id = %id,
            client_id = %client_id,
            session_id = %session_id,
            session_connections = peers,
            "Connection registered"
        );
        id
    }

    /// Remove a connection and close its outbound queue.
    ///
    /// Returns `false` if the connection was not registered, which makes
    /// repeated calls harmless.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut state = self.write();
        let Some(connection) = state.connections.remove(&id) else {
            return false;
        };
        if let Some(partition) = state.sessions.get_mut(&connection.session_id) {
            partition.remove(&id);
            if partition.is_empty() {
                state.sessions.remove(&connection.session_id);
            }
        }
        drop(state);

        tracing::info!(
            name: "hub.connection.unregistered",
            connection_id = %id,
            client_id = %connection.client_id,
            session_id = %connection.session_id,
            "Connection unregistered"
        );
        // Dropping `connection` drops the queue's only sender.
        true
    }

    /// Queue `payload` for every connection currently bound to `session_id`.
    ///
    /// Never blocks: a recipient with a full queue misses this frame.
    pub fn broadcast_to_session(&self, session_id: &str, payload: &Payload) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let state = self.read();
        let Some(partition) = state.sessions.get(session_id) else {
            return report;
        };

        for id in partition {
            let Some(connection) = state.connections.get(id) else {
                continue;
            };
            match connection.tx.try_send(payload.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    self.inner.dropped_frames.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        name: "hub.frame.dropped",
                        connection_id = %id,
                        session_id = %session_id,
                        "Outbound queue full, dropping frame"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    report.closed += 1;
                    tracing::debug!(
                        name: "hub.frame.undeliverable",
                        connection_id = %id,
                        session_id = %session_id,
                        "Outbound pump already stopped"
                    );
                }
            }
        }
        report
    }

    /// Serialize `frame` once and broadcast it to `session_id`.
    pub fn broadcast_frame(&self, session_id: &str, frame: &Frame) -> BroadcastReport {
        match frame.to_payload() {
            Ok(payload) => self.broadcast_to_session(session_id, &payload),
            Err(e) => {
                tracing::error!(name: "hub.frame.encode_failed", error = %e, "Failed to encode frame");
                BroadcastReport::default()
            }
        }
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.read().connections.contains_key(&id)
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.read().connections.len()
    }

    /// Number of sessions with at least one live connection.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.read().sessions.len()
    }

    /// Number of live connections bound to `session_id`.
    #[must_use]
    pub fn session_connection_count(&self, session_id: &str) -> usize {
        self.read().sessions.get(session_id).map_or(0, HashSet::len)
    }

    /// Frames dropped on full queues since startup.
    #[must_use]
    pub fn dropped_frames(&self) -> u64 {
        self.inner.dropped_frames.load(Ordering::Relaxed)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.inner
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
