//! Completion gateway abstractions.
//!
//! This module turns an ordered, role-tagged conversation into a request
//! against a remote OpenAI-compatible chat completions service (DeepSeek by
//! default) and hands back the generated text.
//!
//! # Overview
//!
//! The [`CompletionGateway`] trait is the seam the hub talks to. It offers a
//! single-shot [`CompletionGateway::complete`] call and an incremental
//! [`CompletionGateway::complete_streaming`] variant that feeds fragments to a
//! caller-supplied callback.
//!
//! # Implementations
//!
//! - [`ChatCompletionsGateway`]: HTTP client for `/chat/completions`
//!
//! Prompt preambles are chosen per consultation specialty by
//! [`prompts::preamble_for`].

pub mod chat_completions;
pub mod prompts;

pub use chat_completions::ChatCompletionsGateway;

use crate::error::GatewayError;

/// Connection and model settings for the upstream completion service.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL of the API (e.g., `https://api.deepseek.com`).
    pub base_url: String,
    /// Bearer token sent with every request.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `deepseek-chat`).
    pub model: String,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .finish()
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instruction preamble.
    System,
    /// End-user turn.
    User,
    /// Model reply.
    Assistant,
}

/// A role-tagged message as sent to the completion service.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    /// Role of the message author.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
}

impl ChatMessage {
    /// Create a message with the given role.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Callback receiving streamed text fragments in arrival order.
///
/// Returning an error aborts the stream.
pub type ChunkSink<'a> = dyn FnMut(&str) -> anyhow::Result<()> + Send + 'a;

/// Prepend the preamble to the history, producing the request message list.
#[must_use]
pub fn build_messages(preamble: &str, history: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(preamble));
    messages.extend_from_slice(history);
    messages
}

/// A stateless adapter to a remote text-generation service.
///
/// Implementations never retry: every failure is returned to the caller,
/// which owns retry and deadline policy.
#[async_trait::async_trait]
pub trait CompletionGateway: Send + Sync {
    /// Request a full completion for `history`, preceded by `preamble`.
    ///
    /// # Errors
    ///
    /// Returns a distinct [`GatewayError`] variant for transport failures,
    /// non-success statuses, malformed bodies and empty choice lists.
    async fn complete(
        &self,
        preamble: &str,
        history: &[ChatMessage],
    ) -> Result<String, GatewayError>;

    /// Request a completion and deliver it incrementally to `on_chunk`.
    ///
    /// Gateways without incremental delivery fall back to a single chunk
    /// holding the full completion. Fragments already handed to `on_chunk`
    /// are never retracted.
    async fn complete_streaming(
        &self,
        preamble: &str,
        history: &[ChatMessage],
        on_chunk: &mut ChunkSink<'_>,
    ) -> Result<(), GatewayError> {
        let text = self.complete(preamble, history).await?;
        on_chunk(&text).map_err(GatewayError::Aborted)
    }
}
