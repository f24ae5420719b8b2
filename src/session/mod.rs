//! Session and conversation history management.
//!
//! This module provides in-memory storage for consultation sessions and their
//! ordered message history. Sessions are identified by opaque strings (UUIDs
//! when created through the HTTP API) and live for the lifetime of the process.
//!
//! # Architecture
//!
//! - [`Session`]: Metadata snapshot of a single consultation
//! - [`Message`]: An immutable entry in a session's history
//! - [`ConversationStore`]: Thread-safe store for all sessions and messages
//!
//! # Example
//!
//! ```rust
//! use medseek::llm::MessageRole;
//! use medseek::session::ConversationStore;
//!
//! let store = ConversationStore::new();
//! let session = store.create_session("s-1", "u1", None).unwrap();
//! assert_eq!(session.specialty, "obstetrics");
//!
//! store.append_message("s-1", "u1", MessageRole::User, "Hello!").unwrap();
//! assert_eq!(store.list_messages("s-1").len(), 1);
//! ```

mod store;

pub use store::{ConversationStore, DEFAULT_SPECIALTY, Message, Session, SessionStatus};
