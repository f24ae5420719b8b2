//! Session-scoped real-time message hub.
//!
//! The hub ties together the [`ConnectionRegistry`], the
//! [`ConversationStore`] and a [`CompletionGateway`]. Every WebSocket
//! connection is served by a connection agent (see [`Hub::serve_connection`])
//! that runs two pumps:
//!
//! - the inbound pump decodes frames and drives turns
//!   (store → fan-out → gateway → store → fan-out);
//! - the outbound pump drains the connection's bounded queue onto the wire.
//!
//! ```text
//!   client ──frame──▶ inbound pump ──append──▶ ConversationStore
//!                         │  ▲
//!                         │  └──complete──▶ CompletionGateway
//!                         ▼
//!                 ConnectionRegistry ──try_send──▶ outbound queues ──▶ clients
//! ```
//!
//! The gateway call stalls only the connection that issued it. Registry locks
//! are never held across it.

mod agent;
pub mod frame;
pub mod registry;

pub use agent::{ConnectionBinding, InboundOutcome};
pub use frame::{ASSISTANT_ID, Frame, FrameKind, Payload};
pub use registry::{BroadcastReport, Connection, ConnectionId, ConnectionRegistry};

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::StoreError;
use crate::llm::CompletionGateway;
use crate::session::{ConversationStore, Session};

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Tunables for the hub.
#[derive(Debug, Clone)]
pub struct HubSettings {
    /// Pending frames per connection before new frames are dropped.
    pub queue_capacity: usize,
    /// Optional deadline for a single completion call.
    pub completion_timeout: Option<Duration>,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            completion_timeout: None,
        }
    }
}

/// The message hub shared by all connections.
pub struct Hub {
    registry: ConnectionRegistry,
    store: ConversationStore,
    gateway: Arc<dyn CompletionGateway>,
    settings: HubSettings,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("registry", &self.registry)
            .field("settings", &self.settings)
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Create a hub over the given store and gateway.
    #[must_use]
    pub fn new(
        store: ConversationStore,
        gateway: Arc<dyn CompletionGateway>,
        settings: HubSettings,
    ) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            store,
            gateway,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    /// Live connection registry.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Conversation store.
    #[must_use]
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Hub settings.
    #[must_use]
    pub fn settings(&self) -> &HubSettings {
        &self.settings
    }

    /// Close a session and notify its live connections.
    ///
    /// Connections stay open; further turns are answered with an error frame.
    pub fn close_session(&self, session_id: &str) -> Result<Session, StoreError> {
        let session = self.store.close_session(session_id)?;
        self.registry.broadcast_frame(
            session_id,
            &Frame::status(session.status.as_str()).in_session(session_id),
        );
        Ok(session)
    }

    /// Stop every connection agent. Each sends a close frame and exits.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            tracing::info!(
                name: "hub.shutdown",
                connections = self.registry.connection_count(),
                "Shutting down hub"
            );
        }
        self.shutdown.cancel();
    }

    /// Whether [`Hub::shutdown`] has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
