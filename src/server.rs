use axum::{
    Json, Router,
    extract::{
        Query, Request, State,
        rejection::JsonRejection,
        ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    http::{HeaderName, Method, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use tracing::info;

use crate::AppState;
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::hub::{ConnectionBinding, Hub};
use crate::llm::ChatCompletionsGateway;
use crate::session::{ConversationStore, Message, SessionStatus};

/// Start the Axum server with the provided configuration.
///
/// Returns once a shutdown signal has been handled and all connections are
/// drained.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let settings = config.llm_settings()?;
    info!(
        name: "llm.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        "LLM configuration loaded"
    );

    let gateway = Arc::new(ChatCompletionsGateway::new(settings));
    let hub = Arc::new(Hub::new(
        ConversationStore::new(),
        gateway,
        config.hub_settings(),
    ));

    let state = AppState::new(Arc::clone(&hub), Arc::clone(&config));
    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    let stop = CancellationToken::new();
    tokio::spawn(shutdown_signal(Arc::clone(&hub), stop.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(stop.cancelled_owned())
        .await?;

    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let mut api = Router::new()
        .route("/api/session/create", post(api_create_session))
        .route("/api/session/messages", get(api_session_messages))
        .route("/api/session/close", post(api_close_session));

    if let Some(limit) = config.request_timeout() {
        api = api.layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(limit, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => ApiError::Timeout.into_response(),
                }
            },
        ));
    }

    let mut app = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .merge(api);

    match config
        .server
        .static_dirs
        .iter()
        .find(|dir| Path::new(dir.as_str()).is_dir())
    {
        Some(dir) => {
            info!(name: "server.static.enabled", dir = %dir, "Serving static files");
            app = app.fallback_service(ServeDir::new(dir));
        }
        None => {
            tracing::warn!(
                name: "server.static.missing",
                tried = ?config.server.static_dirs,
                "No static file directory found"
            );
        }
    }

    app.layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
            Method::HEAD,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-requested-with"),
        ])
        .max_age(Duration::from_secs(86_400))
}

/// Wait for Ctrl-C or SIGTERM, close every connection, then stop the server.
async fn shutdown_signal(hub: Arc<Hub>, stop: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(name: "server.signal.failed", error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(name: "server.signal.failed", error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!(name: "server.shutdown", "Shutdown signal received");
    hub.shutdown();
    stop.cancel();
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Request body for session creation.
#[derive(Debug, Deserialize)]
struct CreateSessionRequest {
    user_id: String,
    #[serde(default)]
    specialty: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateSessionResponse {
    session_id: String,
    status: SessionStatus,
}

/// POST /api/session/create
async fn api_create_session(
    State(state): State<AppState>,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?;
    let user_id = req.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::BadRequest("Missing user_id".into()));
    }

    let session_id = uuid::Uuid::new_v4().to_string();
    let session = state
        .hub
        .store()
        .create_session(&session_id, user_id, req.specialty.as_deref())?;

    Ok(Json(CreateSessionResponse {
        session_id: session.id,
        status: session.status,
    }))
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    #[serde(default)]
    session_id: Option<String>,
}

impl SessionQuery {
    fn require(&self) -> Result<&str, ApiError> {
        self.session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::BadRequest("Missing session_id".into()))
    }
}

/// GET /api/session/messages?session_id=
async fn api_session_messages(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let session_id = query.require()?;
    Ok(Json(state.hub.store().list_messages(session_id)))
}

/// POST /api/session/close?session_id=
async fn api_close_session(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session_id = query.require()?;
    let session = state.hub.close_session(session_id)?;

    Ok(Json(serde_json::json!({ "status": session.status })))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// GET /ws?session_id=&user_id=
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let (Some(session_id), Some(user_id)) = (non_blank(query.session_id), non_blank(query.user_id))
    else {
        return Err(ApiError::BadRequest("Missing session_id or user_id".into()));
    };

    let session = state
        .hub
        .store()
        .get_session(&session_id)
        .ok_or_else(|| ApiError::NotFound(format!("session not found: {session_id}")))?;
    if session.status != SessionStatus::Active {
        return Err(ApiError::Gone(format!("session is closed: {session_id}")));
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let hub = Arc::clone(&state.hub);
    let binding = ConnectionBinding::new(user_id, session_id);
    Ok(ws
        .on_upgrade(move |socket| hub.serve_connection(socket, binding))
        .into_response())
}
