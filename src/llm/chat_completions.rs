//! OpenAI-compatible Chat Completions gateway.
//!
//! This module implements [`CompletionGateway`] against `/chat/completions`,
//! supporting single-shot responses and server-sent event streaming.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

use super::{ChatMessage, ChunkSink, CompletionGateway, LlmSettings, build_messages};

/// Stream of text fragments produced by a streaming completion.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Gateway for the Chat Completions API.
#[derive(Clone)]
pub struct ChatCompletionsGateway {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsGateway")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChatCompletionsGateway {
    /// Create a gateway with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    /// Full URL of the completions endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    /// Send the request and return the response once its status is known
    /// to be a success.
    async fn send(
        &self,
        preamble: &str,
        history: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        let body = CompletionRequest {
            model: &self.settings.model,
            messages: build_messages(preamble, history),
            stream,
        };

        let mut rb = self.http.post(self.endpoint()).json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = rb.bearer_auth(k);
        }

        tracing::debug!(
            name: "llm.request.sent",
            model = %self.settings.model,
            messages = body.messages.len(),
            stream,
            "Sending completion request"
        );

        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    /// Start a streaming completion and return its text fragments.
    pub async fn stream_fragments(
        &self,
        preamble: &str,
        history: &[ChatMessage],
    ) -> Result<FragmentStream, GatewayError> {
        let resp = self.send(preamble, history, true).await?;
        Ok(Box::pin(sse_fragments(resp.bytes_stream())))
    }
}

#[async_trait::async_trait]
impl CompletionGateway for ChatCompletionsGateway {
    async fn complete(
        &self,
        preamble: &str,
        history: &[ChatMessage],
    ) -> Result<String, GatewayError> {
        let resp = self.send(preamble, history, false).await?;
        let body = resp.text().await?;
        let parsed: CompletionResponse = serde_json::from_str(&body)?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(GatewayError::EmptyChoices)
    }

    async fn complete_streaming(
        &self,
        preamble: &str,
        history: &[ChatMessage],
        on_chunk: &mut ChunkSink<'_>,
    ) -> Result<(), GatewayError> {
        let mut fragments = self.stream_fragments(preamble, history).await?;
        while let Some(fragment) = fragments.next().await {
            on_chunk(&fragment?).map_err(GatewayError::Aborted)?;
        }
        Ok(())
    }
}

/// Outcome of parsing one server-sent event line.
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Fragment(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|text| !text.is_empty())
            .map_or(SseLine::Skip, SseLine::Fragment),
        Err(e) => {
            tracing::debug!(name: "llm.stream.malformed", error = %e, "Skipping malformed stream chunk");
            SseLine::Skip
        }
    }
}

/// Turn a raw SSE byte stream into text fragments, ending at `[DONE]`.
fn sse_fragments<S, B, E>(byte_stream: S) -> impl Stream<Item = Result<String, GatewayError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<GatewayError> + Send,
{
    async_stream::try_stream! {
        let mut buf = Vec::<u8>::new();
        let mut done = false;

        futures::pin_mut!(byte_stream);
        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(<E as Into<GatewayError>>::into)?;
            buf.extend_from_slice(chunk.as_ref());

            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line = buf.drain(..=pos).collect::<Vec<_>>();
                match parse_sse_line(&String::from_utf8_lossy(&line)) {
                    SseLine::Fragment(text) => yield text,
                    SseLine::Done => {
                        done = true;
                        break;
                    }
                    SseLine::Skip => {}
                }
            }
            if done {
                break;
            }
        }

        // A final line may arrive without a trailing newline.
        if !done && !buf.is_empty() {
            if let SseLine::Fragment(text) = parse_sse_line(&String::from_utf8_lossy(&buf)) {
                yield text;
            }
        }
    }
}
