//! Per-connection agent: inbound and outbound pumps plus turn handling.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::llm::{ChatMessage, MessageRole, prompts};

use super::frame::{ASSISTANT_ID, Frame, FrameKind, Payload};
use super::registry::{Connection, ConnectionId};
use super::Hub;

/// How long the outbound pump waits for the peer to accept the close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Identity of a connection, taken from the upgrade request.
///
/// These values are authoritative: identifiers carried inside frames are
/// overwritten with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionBinding {
    /// Client identifier.
    pub client_id: String,
    /// Session the connection joins.
    pub session_id: String,
}

impl ConnectionBinding {
    /// Bind `client_id` to `session_id`.
    #[must_use]
    pub fn new(client_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            session_id: session_id.into(),
        }
    }
}

/// What the inbound pump did with one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Malformed, empty or not meant for processing.
    Skipped,
    /// Relayed to the session without persistence.
    Relayed,
    /// A full turn completed and the reply was fanned out.
    Replied,
    /// The turn failed and an error frame was fanned out.
    Failed,
}

impl Hub {
    /// Serve one upgraded WebSocket until it closes or the hub shuts down.
    pub async fn serve_connection(self: Arc<Self>, socket: WebSocket, binding: ConnectionBinding) {
        let (connection, outbound) = Connection::new(
            binding.client_id.clone(),
            binding.session_id.clone(),
            self.settings.queue_capacity,
        );
        let id = self.registry.register(connection);

        let teardown = self.shutdown.child_token();
        let (sink, mut stream) = socket.split();
        let writer = tokio::spawn(outbound_pump(sink, outbound, teardown.clone(), id));

        loop {
            let next = tokio::select! {
                () = teardown.cancelled() => break,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(WsMessage::Text(text))) => {
                    if !self.dispatch(&binding, text.as_str()).await {
                        break;
                    }
                }
                Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        if !self.dispatch(&binding, text).await {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            name: "hub.frame.malformed",
                            connection_id = %id,
                            error = %e,
                            "Skipping binary frame that is not UTF-8"
                        );
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(
                        name: "hub.connection.read_failed",
                        connection_id = %id,
                        error = %e,
                        "WebSocket read failed"
                    );
                    break;
                }
            }
        }

        self.registry.unregister(id);
        teardown.cancel();
        if let Err(e) = writer.await {
            tracing::warn!(
                name: "hub.connection.writer_panicked",
                connection_id = %id,
                error = %e,
                "Outbound pump terminated abnormally"
            );
        }
    }

    /// Run one inbound frame unless the hub shuts down first.
    async fn dispatch(&self, binding: &ConnectionBinding, text: &str) -> bool {
        tokio::select! {
            () = self.shutdown.cancelled() => false,
            _ = self.handle_inbound(binding, text) => true,
        }
    }

    /// Process one inbound text frame from `binding`.
    pub async fn handle_inbound(&self, binding: &ConnectionBinding, text: &str) -> InboundOutcome {
        let frame = match Frame::decode(text) {
            Ok(frame) => frame.stamped(&binding.client_id, &binding.session_id),
            Err(e) => {
                tracing::warn!(
                    name: "hub.frame.malformed",
                    client_id = %binding.client_id,
                    session_id = %binding.session_id,
                    error = %e,
                    "Skipping malformed frame"
                );
                return InboundOutcome::Skipped;
            }
        };

        match frame.kind {
            FrameKind::Message if frame.content.trim().is_empty() => InboundOutcome::Skipped,
            FrameKind::Message => self.run_turn(binding, &frame).await,
            FrameKind::Status => {
                self.registry.broadcast_frame(&binding.session_id, &frame);
                InboundOutcome::Relayed
            }
            FrameKind::Error => InboundOutcome::Skipped,
        }
    }

    async fn run_turn(&self, binding: &ConnectionBinding, frame: &Frame) -> InboundOutcome {
        let session_id = binding.session_id.as_str();

        if let Err(e) = self.store.append_message(
            session_id,
            &binding.client_id,
            MessageRole::User,
            &frame.content,
        ) {
            tracing::warn!(name: "hub.turn.rejected", session_id = %session_id, error = %e, "Turn rejected");
            self.fan_out_error(session_id, &e);
            return InboundOutcome::Failed;
        }
        self.registry.broadcast_frame(session_id, frame);

        let specialty = self
            .store
            .get_session(session_id)
            .map(|s| s.specialty)
            .unwrap_or_default();
        let history: Vec<ChatMessage> = self
            .store
            .list_messages(session_id)
            .iter()
            .map(ChatMessage::from)
            .collect();

        match self
            .request_completion(prompts::preamble_for(&specialty), &history)
            .await
        {
            Ok(reply) => {
                if let Err(e) = self.store.append_message(
                    session_id,
                    ASSISTANT_ID,
                    MessageRole::Assistant,
                    &reply,
                ) {
                    tracing::warn!(
                        name: "hub.turn.reply_not_persisted",
                        session_id = %session_id,
                        error = %e,
                        "Reply could not be persisted"
                    );
                    self.fan_out_error(session_id, &e);
                    return InboundOutcome::Failed;
                }
                self.registry
                    .broadcast_frame(session_id, &Frame::assistant(reply));
                tracing::debug!(name: "hub.turn.completed", session_id = %session_id, "Turn completed");
                InboundOutcome::Replied
            }
            Err(e) => {
                tracing::warn!(name: "hub.turn.failed", session_id = %session_id, error = %e, "Completion failed");
                self.fan_out_error(session_id, &e);
                InboundOutcome::Failed
            }
        }
    }

    async fn request_completion(
        &self,
        preamble: &str,
        history: &[ChatMessage],
    ) -> Result<String, GatewayError> {
        let call = self.gateway.complete(preamble, history);
        match self.settings.completion_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_elapsed| GatewayError::Timeout(limit))?,
            None => call.await,
        }
    }

    fn fan_out_error(&self, session_id: &str, err: &dyn std::fmt::Display) {
        self.registry.broadcast_frame(
            session_id,
            &Frame::error(format!("Error processing message: {err}")),
        );
    }
}

/// Drain the outbound queue onto the wire.
///
/// Ends with a close frame once the registry drops the queue's sender or
/// `teardown` fires mid-write. A write failure cancels `teardown` so the
/// inbound pump stops as well.
async fn outbound_pump<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<Payload>,
    teardown: CancellationToken,
    id: ConnectionId,
) where
    S: Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(payload) = outbound.recv().await {
        let written = tokio::select! {
            () = teardown.cancelled() => break,
            written = sink.send(WsMessage::Text(payload)) => written,
        };
        if let Err(e) = written {
            tracing::debug!(
                name: "hub.connection.write_failed",
                connection_id = %id,
                error = %e,
                "WebSocket write failed"
            );
            teardown.cancel();
            return;
        }
    }
    // The peer may already be gone or have stopped reading.
    let _ = tokio::time::timeout(CLOSE_GRACE, sink.send(WsMessage::Close(None))).await;
}
