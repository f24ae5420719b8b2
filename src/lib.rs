//! MedSeek
//!
//! A session-scoped real-time message hub that relays WebSocket chat between
//! clients and a DeepSeek-compatible completion API.
//!
//! # Architecture
//!
//! - **Server**: Axum-based HTTP server with a session API and WebSocket endpoint
//! - **Hub**: connection registry, per-connection agents and session fan-out
//! - **Completion Gateway**: OpenAI-compatible chat completions client
//! - **Conversation Store**: in-memory sessions and ordered message history
//!
//! # Modules
//!
//! - [`config`]: layered configuration (CLI, environment, file)
//! - [`error`]: error types shared across modules
//! - [`hub`]: real-time hub and connection agents
//! - [`llm`]: completion gateway and specialty preambles
//! - [`server`]: HTTP routes and server lifecycle
//! - [`session`]: conversation store

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod error;
pub mod hub;
pub mod llm;
pub mod server;
pub mod session;

use crate::config::AppConfig;
use crate::hub::Hub;
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Real-time hub owning the registry, store and gateway.
    pub hub: Arc<Hub>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Bundle the hub and configuration.
    #[must_use]
    pub fn new(hub: Arc<Hub>, config: Arc<AppConfig>) -> Self {
        Self { hub, config }
    }
}
