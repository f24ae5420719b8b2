//! Test utilities and common setup.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{Json, Router, extract::State, http::HeaderMap, routing::post};
use medseek::AppState;
use medseek::config::{AppConfig, HubConfig, LlmConfig, ServerConfig};
use medseek::error::GatewayError;
use medseek::hub::{Hub, HubSettings};
use medseek::llm::{ChatMessage, CompletionGateway, LlmSettings};
use medseek::session::ConversationStore;
use serde_json::{Value, json};

/// Configuration that does not depend on the process environment.
pub fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            port: 0,
            host: "127.0.0.1".into(),
            static_dirs: Vec::new(),
            request_timeout_secs: 30,
        },
        llm: LlmConfig {
            base_url: "http://127.0.0.1:9".into(),
            model: "deepseek-chat".into(),
            api_key: Some("test-key".into()),
        },
        hub: HubConfig {
            queue_capacity: 64,
            completion_timeout_secs: None,
        },
    }
}

/// Gateway that answers every request with the same reply.
#[derive(Debug)]
pub struct FixedGateway(pub &'static str);

#[async_trait::async_trait]
impl CompletionGateway for FixedGateway {
    async fn complete(&self, _: &str, _: &[ChatMessage]) -> Result<String, GatewayError> {
        Ok(self.0.to_string())
    }
}

/// Application state over the given gateway.
pub fn test_state(gateway: Arc<dyn CompletionGateway>) -> AppState {
    let hub = Arc::new(Hub::new(
        ConversationStore::new(),
        gateway,
        HubSettings::default(),
    ));
    AppState::new(hub, Arc::new(test_config()))
}

/// Router over a gateway that always replies "ok".
pub fn test_app() -> (Router, AppState) {
    let state = test_state(Arc::new(FixedGateway("ok")));
    (medseek::server::build_router(state.clone()), state)
}

/// Serve `app` on an ephemeral local port.
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Requests received by a fake upstream, with their authorization header.
#[derive(Debug, Clone, Default)]
pub struct Recorded(pub Arc<Mutex<Vec<(Option<String>, Value)>>>);

impl Recorded {
    pub fn requests(&self) -> Vec<(Option<String>, Value)> {
        self.0.lock().unwrap().clone()
    }
}

/// Fake completion API answering `/chat/completions` with `respond`.
pub async fn spawn_upstream<F>(respond: F) -> (String, Recorded)
where
    F: Fn(&Value) -> axum::response::Response + Clone + Send + Sync + 'static,
{
    let recorded = Recorded::default();
    let app = Router::new()
        .route(
            "/chat/completions",
            post(
                move |State(rec): State<Recorded>, headers: HeaderMap, Json(body): Json<Value>| {
                    let respond = respond.clone();
                    async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        let response = respond(&body);
                        rec.0.lock().unwrap().push((auth, body));
                        response
                    }
                },
            ),
        )
        .with_state(recorded.clone());

    let addr = spawn_server(app).await;
    (format!("http://{addr}"), recorded)
}

/// A non-streaming completion body holding `text`.
pub fn completion_body(text: &str) -> Value {
    json!({
        "id": "cmpl-1",
        "object": "chat.completion",
        "model": "deepseek-chat",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop"
        }]
    })
}

/// Gateway settings pointing at `base_url`.
pub fn llm_settings(base_url: &str) -> LlmSettings {
    LlmSettings {
        base_url: base_url.to_string(),
        api_key: Some("test-key".into()),
        model: "deepseek-chat".into(),
    }
}

/// Base URL on which nothing is listening.
pub async fn closed_base_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Poll `condition` until it holds or five seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
