//! Conversation store: session metadata and per-session message history.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::llm::{ChatMessage, MessageRole};

/// Specialty applied when a session is created without one.
pub const DEFAULT_SPECIALTY: &str = "obstetrics";

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepting connections and turns.
    Active,
    /// Closed by the user; history remains readable.
    Closed,
    /// Reserved for archival, which this service does not perform.
    Archived,
}

impl SessionStatus {
    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Archived => "archived",
        }
    }
}

/// Snapshot of a consultation session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Assigned specialist, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doctor_id: Option<String>,
    /// Consultation specialty; selects the system preamble.
    pub specialty: String,
    /// Creation time.
    pub start_time: DateTime<Utc>,
    /// Close time, set once on the first close.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Current status.
    pub status: SessionStatus,
}

/// A single message in a session's history.
///
/// Messages are immutable once appended. `seq` is the zero-based position in
/// the session and `id` is derived from it, so both are stable and contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier unique within the session (`<session_id>-<seq>`).
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Author (client id, or `assistant`).
    pub user_id: String,
    /// Author role.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
    /// Position in the session history.
    pub seq: usize,
    /// Append time.
    pub created_at: DateTime<Utc>,
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self::new(message.role, message.content.clone())
    }
}

#[derive(Debug)]
struct SessionEntry {
    session: RwLock<Session>,
    messages: RwLock<Vec<Message>>,
}

/// Thread-safe store for sessions and their message history.
///
/// The session map and each session's history sit behind separate locks, so
/// appends to different sessions never contend with each other. Cloning the
/// store is cheap and yields a handle to the same data.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    inner: Arc<ConversationStoreInner>,
}

#[derive(Debug)]
struct ConversationStoreInner {
    sessions: RwLock<HashMap<String, Arc<SessionEntry>>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ConversationStoreInner {
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Create a session.
    ///
    /// A blank or absent specialty is replaced by [`DEFAULT_SPECIALTY`].
    /// Session ids are never reused: creating an existing id fails with
    /// [`StoreError::AlreadyExists`].
    pub fn create_session(
        &self,
        session_id: &str,
        user_id: &str,
        specialty: Option<&str>,
    ) -> Result<Session, StoreError> {
        let specialty = specialty
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SPECIALTY);

        let session = Session {
            id: session_id.to_string(),
            user_id: user_id.to_string(),
            doctor_id: None,
            specialty: specialty.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: SessionStatus::Active,
        };

        let mut guard = write(&self.inner.sessions);
        if guard.contains_key(session_id) {
            return Err(StoreError::AlreadyExists(session_id.to_string()));
        }
        guard.insert(
            session_id.to_string(),
            Arc::new(SessionEntry {
                session: RwLock::new(session.clone()),
                messages: RwLock::new(Vec::new()),
            }),
        );
        drop(guard);

        tracing::info!(
            name: "session.created",
            session_id = %session.id,
            user_id = %session.user_id,
            specialty = %session.specialty,
            "Session created"
        );
        Ok(session)
    }

    /// Append a message to a session and return it.
    ///
    /// The sequence number is assigned under the history's write lock, so
    /// concurrent appends are linearized and readers never see a partial one.
    pub fn append_message(
        &self,
        session_id: &str,
        author_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<Message, StoreError> {
        let entry = self
            .entry(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;

        if read(&entry.session).status != SessionStatus::Active {
            return Err(StoreError::Closed(session_id.to_string()));
        }

        let mut messages = write(&entry.messages);
        let seq = messages.len();
        let message = Message {
            id: format!("{session_id}-{seq}"),
            session_id: session_id.to_string(),
            user_id: author_id.to_string(),
            role,
            content: content.to_string(),
            seq,
            created_at: Utc::now(),
        };
        messages.push(message.clone());
        Ok(message)
    }

    /// Ordered history of a session; empty for unknown sessions.
    #[must_use]
    pub fn list_messages(&self, session_id: &str) -> Vec<Message> {
        self.entry(session_id)
            .map(|entry| read(&entry.messages).clone())
            .unwrap_or_default()
    }

    /// Close a session.
    ///
    /// Closing is idempotent: a second close succeeds and keeps the original
    /// close timestamp.
    pub fn close_session(&self, session_id: &str) -> Result<Session, StoreError> {
        let entry = self
            .entry(session_id)
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;

        let mut session = write(&entry.session);
        if session.status == SessionStatus::Active {
            session.status = SessionStatus::Closed;
            session.end_time = Some(Utc::now());
            tracing::info!(name: "session.closed", session_id = %session_id, "Session closed");
        }
        Ok(session.clone())
    }

    /// Snapshot of a session, if it exists.
    #[must_use]
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.entry(session_id)
            .map(|entry| read(&entry.session).clone())
    }

    /// Number of sessions ever created in this process.
    #[must_use]
    pub fn session_count(&self) -> usize {
        read(&self.inner.sessions).len()
    }

    fn entry(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        read(&self.inner.sessions).get(session_id).cloned()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_session_applies_default_specialty() {
        let store = ConversationStore::new();

        let session = store.create_session("s1", "u1", None).unwrap();
        assert_eq!(session.specialty, DEFAULT_SPECIALTY);
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.end_time.is_none());

        let blank = store.create_session("s2", "u1", Some("  ")).unwrap();
        assert_eq!(blank.specialty, DEFAULT_SPECIALTY);

        let peds = store.create_session("s3", "u1", Some("pediatrics")).unwrap();
        assert_eq!(peds.specialty, "pediatrics");
        assert_eq!(store.session_count(), 3);
    }

    #[test]
    fn test_duplicate_session_is_rejected() {
        let store = ConversationStore::new();
        store.create_session("s1", "u1", None).unwrap();

        let err = store.create_session("s1", "u2", None).unwrap_err();
        assert_eq!(err, StoreError::AlreadyExists("s1".into()));
        assert_eq!(store.get_session("s1").unwrap().user_id, "u1");
    }

    #[test]
    fn test_messages_keep_append_order_and_contiguous_ids() {
        let store = ConversationStore::new();
        store.create_session("s1", "u1", None).unwrap();

        let contents = ["first", "second", "third", "fourth"];
        for (i, content) in contents.iter().enumerate() {
            let role = if i % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            store.append_message("s1", "u1", role, content).unwrap();
        }

        let messages = store.list_messages("s1");
        assert_eq!(messages.len(), contents.len());
        for (i, message) in messages.iter().enumerate() {
            assert_eq!(message.seq, i);
            assert_eq!(message.id, format!("s1-{i}"));
            assert_eq!(message.content, contents[i]);
            assert_eq!(message.session_id, "s1");
        }

        // Identifiers are stable across reads.
        assert_eq!(store.list_messages("s1"), messages);
    }

    #[test]
    fn test_append_to_unknown_session_fails() {
        let store = ConversationStore::new();
        let err = store
            .append_message("missing", "u1", MessageRole::User, "hi")
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound("missing".into()));
    }

    #[test]
    fn test_list_unknown_session_is_empty() {
        let store = ConversationStore::new();
        assert!(store.list_messages("missing").is_empty());
        assert!(store.get_session("missing").is_none());
    }

    #[test]
    fn test_close_session_is_idempotent() {
        let store = ConversationStore::new();
        store.create_session("s1", "u1", None).unwrap();

        let first = store.close_session("s1").unwrap();
        assert_eq!(first.status, SessionStatus::Closed);
        let closed_at = first.end_time.unwrap();

        let second = store.close_session("s1").unwrap();
        assert_eq!(second.status, SessionStatus::Closed);
        assert_eq!(second.end_time, Some(closed_at));
    }

    #[test]
    fn test_close_unknown_session_is_not_found() {
        let store = ConversationStore::new();
        assert_eq!(
            store.close_session("missing").unwrap_err(),
            StoreError::NotFound("missing".into())
        );
    }

    #[test]
    fn test_closed_session_rejects_appends() {
        let store = ConversationStore::new();
        store.create_session("s1", "u1", None).unwrap();
        store
            .append_message("s1", "u1", MessageRole::User, "before")
            .unwrap();
        store.close_session("s1").unwrap();

        let err = store
            .append_message("s1", "u1", MessageRole::User, "after")
            .unwrap_err();
        assert_eq!(err, StoreError::Closed("s1".into()));
        assert_eq!(store.list_messages("s1").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_linearizable() {
        use tokio::task::JoinSet;

        let store = ConversationStore::new();
        store.create_session("s1", "u1", None).unwrap();

        let mut join_set = JoinSet::new();
        for i in 0..64 {
            let store = store.clone();
            join_set.spawn(async move {
                store
                    .append_message("s1", "u1", MessageRole::User, &format!("msg-{i}"))
                    .unwrap()
            });
        }
        while let Some(result) = join_set.join_next().await {
            result.unwrap();
        }

        let messages = store.list_messages("s1");
        assert_eq!(messages.len(), 64);

        let seqs: Vec<usize> = messages.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, (0..64).collect::<Vec<_>>());

        let mut contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        contents.sort_unstable();
        contents.dedup();
        assert_eq!(contents.len(), 64);
    }
}
