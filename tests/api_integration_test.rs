//! Integration tests for the local HTTP API.
//! Tests health, the request endpoint, error reporting and API key auth.

use axum::http::StatusCode;
use page_agent::api::{app, ApiContext, ApiState};
use page_agent::config::AgentConfig;
use page_agent::host::{ElementSpec, MemoryPage, PageHost};
use page_agent::{EventEmitter, PageAgent};
use std::sync::Arc;
use tower::ServiceExt;

async fn make_state() -> (Arc<MemoryPage>, ApiState) {
    let page = Arc::new(MemoryPage::new("https://example.com/", "Example", 1280.0, 720.0));
    page.append(
        page.body(),
        ElementSpec::new("button").id("go").text("Go").rect(20.0, 20.0, 80.0, 30.0),
    );
    let mut config = AgentConfig::default();
    config.input.target_settle_ms = 0;
    let agent = PageAgent::install(page.clone(), &config, EventEmitter::new())
        .await
        .unwrap();
    (page, Arc::new(ApiContext { agent }))
}

/// App without API key
async fn make_app_no_auth() -> axum::Router {
    app(make_state().await.1, None)
}

/// App with API key required (except /api/health)
async fn make_app_with_auth(api_key: &str) -> axum::Router {
    app(make_state().await.1, Some(api_key.to_string()))
}

fn json_body(val: &serde_json::Value) -> axum::body::Body {
    axum::body::Body::from(serde_json::to_vec(val).unwrap())
}

fn post_request(body: axum::body::Body) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method("POST")
        .uri("/api/request")
        .header("content-type", "application/json")
        .body(body)
        .unwrap()
}

async fn read_json(res: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_api_health() {
    let app = make_app_no_auth().await;
    let req = axum::http::Request::builder()
        .uri("/api/health")
        .body(axum::body::Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"ok");
}

// ---------------------------------------------------------------------------
// Request endpoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_api_ping() {
    let app = make_app_no_auth().await;
    let res = app
        .oneshot(post_request(json_body(&serde_json::json!({"type": "ping"}))))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await, serde_json::json!({"ok": true}));
}

#[tokio::test]
async fn test_api_page_state_then_click_by_id() {
    let (page, state) = make_state().await;

    let res = app(state.clone(), None)
        .oneshot(post_request(json_body(&serde_json::json!({"type": "get_page_state"}))))
        .await
        .unwrap();
    let snapshot = read_json(res).await;
    assert_eq!(snapshot["ok"], true);
    assert_eq!(snapshot["url"], "https://example.com/");
    assert_eq!(snapshot["viewport"], serde_json::json!({"width": 1280.0, "height": 720.0}));
    assert_eq!(snapshot["elements"][0]["type"], "button");

    let res = app(state, None)
        .oneshot(post_request(json_body(&serde_json::json!({
            "type": "perform_action",
            "action": {"type": "click", "target": "e_1"}
        }))))
        .await
        .unwrap();
    let result = read_json(res).await;
    assert_eq!(result["ok"], true, "{}", result);

    let go = page.query("#go").await.unwrap().unwrap();
    assert!(page.events_for(go).contains(&"click".to_string()));
}

#[tokio::test]
async fn test_api_failures_are_ok_false_with_200() {
    let app = make_app_no_auth().await;

    let res = app
        .clone()
        .oneshot(post_request(axum::body::Body::from("{not json")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = read_json(res).await;
    assert_eq!(body["ok"], false);
    assert!(body["message"].as_str().unwrap().starts_with("Malformed request"));

    let res = app
        .clone()
        .oneshot(post_request(json_body(&serde_json::json!({"type": "unknown"}))))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await["ok"], false);

    let res = app
        .oneshot(post_request(json_body(&serde_json::json!({
            "type": "perform_action",
            "action": {"type": "click", "target": "#missing"}
        }))))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = read_json(res).await;
    assert_eq!(body["ok"], false);
    assert!(body["message"].as_str().unwrap().contains("#missing"));
}

// ---------------------------------------------------------------------------
// API key auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_api_key_health_exempt() {
    let app = make_app_with_auth("secret-key").await;
    let req = axum::http::Request::builder()
        .uri("/api/health")
        .body(axum::body::Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_api_key_required_without_header() {
    let app = make_app_with_auth("secret-key").await;
    let res = app
        .oneshot(post_request(json_body(&serde_json::json!({"type": "ping"}))))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_api_key_wrong_key() {
    let app = make_app_with_auth("secret-key").await;
    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/api/request")
        .header("content-type", "application/json")
        .header("X-API-Key", "wrong-key")
        .body(json_body(&serde_json::json!({"type": "ping"})))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_api_key_correct_key() {
    let app = make_app_with_auth("secret-key").await;
    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/api/request")
        .header("content-type", "application/json")
        .header("X-API-Key", "secret-key")
        .body(json_body(&serde_json::json!({"type": "ping"})))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
