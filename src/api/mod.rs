//! Local HTTP transport for an orchestrator.
//! Requests go to the installed agent's dispatcher; recorded events stream over `/api/ws`.

pub mod ws;

use crate::agent::PageAgent;
use crate::error::AgentError;
use axum::{
    body::Bytes,
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;

/// Shared state behind every route.
pub struct ApiContext {
    pub agent: Arc<PageAgent>,
}

pub type ApiState = Arc<ApiContext>;

/// API key authentication middleware.
/// Skips authentication for GET /api/health so callers can probe the server.
async fn api_key_auth(
    State(expected_key): State<String>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if request.uri().path() == "/api/health" {
        return Ok(next.run(request).await);
    }
    let provided = request
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok());
    match provided {
        Some(k) if k == expected_key => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Logs every call with timing and status.
async fn request_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    if path != "/api/health" {
        tracing::debug!(
            "{} {} -> {} in {}ms",
            method,
            path,
            response.status(),
            started.elapsed().as_millis()
        );
    }
    response
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        // Dispatcher
        .route("/api/request", post(handle_request))
        // WebSocket (recorded events)
        .route("/api/ws", get(ws::ws_handler))
        // Utility
        .route("/api/health", get(health))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn health() -> &'static str {
    "ok"
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Always 200: failures are reported in the body as `ok: false`.
async fn handle_request(State(state): State<ApiState>, body: Bytes) -> Json<Value> {
    let response = match serde_json::from_slice::<Value>(&body) {
        Ok(request) => state.agent.handle(request).await,
        Err(e) => json!({
            "ok": false,
            "message": AgentError::MalformedRequest(e.to_string()).to_string(),
        }),
    };
    Json(response)
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Build the full API app (router + optional API key auth + CORS).
pub fn app(state: ApiState, api_key: Option<String>) -> Router {
    use tower::limit::ConcurrencyLimitLayer;
    let base_router = router(state);
    if let Some(key) = api_key {
        base_router.route_layer(middleware::from_fn_with_state(key, api_key_auth))
    } else {
        base_router
    }
    .layer(middleware::from_fn(request_log))
    .layer(ConcurrencyLimitLayer::new(32))
    .layer(
        tower_http::cors::CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static("x-api-key"),
            ]),
    )
}

pub async fn run_server(state: ApiState, port: u16, api_key: Option<String>) -> Result<(), String> {
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .map_err(|e| format!("Failed to bind API port {}: {}", port, e))?;
    let app = app(state, api_key);
    tracing::info!("Page agent API listening on http://127.0.0.1:{}", port);
    axum::serve(listener, app)
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}
