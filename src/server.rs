use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Path, Query, Request, State, rejection::JsonRejection},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::AppState;
use crate::chat::ChatTurn;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::llm::{LlmDriver, MessagesDriver, ResponseFormat};
use crate::session::{SessionSnapshot, SessionStats, spawn_expiry_sweeper};

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    let request_timeout = state.config.server.request_timeout();
    let static_dir = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        .route("/", get(index_redirect))
        .route("/health", get(health))
        .route("/chat", post(api_chat))
        .route("/session/stats", get(api_session_stats))
        .route("/session/{id}", delete(api_clear_session))
        .route("/session/{id}/messages", get(api_session_messages))
        .fallback_service(static_dir)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(move |req: Request, next: Next| {
            request_timeout_middleware(request_timeout, req, next)
        }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Axum server with the provided configuration.
///
/// Runs until Ctrl-C or SIGTERM, then stops the expiry sweeper and releases
/// the upstream client.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let settings = config.llm.settings();
    info!(
        name: "llm.config.loaded",
        api_url = %settings.api_url,
        model = %settings.model,
        max_tokens = settings.max_tokens,
        timeout_secs = settings.timeout.as_secs(),
        "LLM configuration loaded"
    );

    let driver: Arc<dyn LlmDriver> = Arc::new(MessagesDriver::new(settings)?);
    let state = AppState::new(Arc::clone(&config), driver);

    let shutdown = CancellationToken::new();
    let sweeper = spawn_expiry_sweeper(
        state.sessions.clone(),
        config.sessions.timeout(),
        config.sessions.sweep_interval(),
        shutdown.clone(),
    );

    let chat = Arc::clone(&state.chat);
    let app = router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        static_dir = %config.server.static_dir,
        "Server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Session expiry sweeper ended abnormally");
    }
    chat.shutdown().await;
    info!("Graceful shutdown complete");
    Ok(())
}

async fn request_timeout_middleware(duration: Duration, req: Request, next: Next) -> Response {
    match tokio::time::timeout(duration, next.run(req)).await {
        Ok(res) => res,
        Err(_) => AppError::Timeout("Request timed out".to_string()).into_response(),
    }
}

/// Wait for either Ctrl+C or SIGTERM (Unix only).
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let reason = match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler; falling back to Ctrl+C only");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
            "ctrl-c"
        }
    };
    info!(reason, "Shutdown signal received");
}

/// On non-Unix platforms, only Ctrl+C is available.
#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!(reason = "ctrl-c", "Shutdown signal received");
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for chat API.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    /// User message content.
    #[serde(default)]
    message: String,
    /// Optional session ID (creates new if not provided or unknown).
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    format: ResponseFormat,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f32>,
}

/// Response from chat API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    response: String,
    session_id: String,
    message_count: usize,
}

/// POST /chat - Run one chat turn.
async fn api_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(req) = payload?;

    info!(
        session_id = ?req.session_id,
        format = ?req.format,
        message_length = req.message.len(),
        "Received chat request"
    );

    let reply = state
        .chat
        .send(ChatTurn {
            message: req.message,
            session_id: req.session_id,
            format: req.format,
            model: req.model,
            temperature: req.temperature,
        })
        .await?;

    Ok(Json(ChatResponse {
        response: reply.response,
        session_id: reply.session_id,
        message_count: reply.message_count,
    }))
}

#[derive(Debug, Deserialize)]
struct ClearQuery {
    /// Remove the record instead of only wiping its history.
    #[serde(default)]
    purge: bool,
}

/// Confirmation body for session mutations.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionAck {
    message: &'static str,
    session_id: String,
}

/// DELETE /session/{id} - Clear a session's history (or remove it with `?purge=true`).
async fn api_clear_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ClearQuery>,
) -> Result<Json<SessionAck>, AppError> {
    let (found, message) = if query.purge {
        (state.sessions.delete(&id), "Session deleted")
    } else {
        (state.sessions.clear(&id), "Session cleared")
    };

    if !found {
        return Err(AppError::NotFound("Session not found".to_string()));
    }
    Ok(Json(SessionAck {
        message,
        session_id: id,
    }))
}

/// GET /session/{id}/messages - Read a session's history without refreshing it.
async fn api_session_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    state
        .sessions
        .get(&id)
        .map(|session| Json(session.snapshot()))
        .ok_or_else(|| AppError::NotFound("Session not found".to_string()))
}

/// GET /session/stats - Session and message totals.
async fn api_session_stats(State(state): State<AppState>) -> Json<SessionStats> {
    Json(state.sessions.stats())
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

/// GET /health - Liveness probe.
async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

/// GET / - Send browsers to the chat page.
async fn index_redirect() -> Redirect {
    Redirect::to("/index.html")
}
