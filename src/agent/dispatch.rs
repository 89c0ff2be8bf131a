//! Request Dispatcher: the single inbound entry point of an installed agent.

use crate::agent::action::InputSynthesizer;
use crate::agent::cursor::VirtualCursor;
use crate::agent::emitter::EventEmitter;
use crate::agent::indicator::{IndicatorView, StatusIndicator};
use crate::agent::locator::{ElementRegistry, Locator};
use crate::agent::recorder::Recorder;
use crate::agent::snapshot::Snapshotter;
use crate::agent::types::AgentRequest;
use crate::config::{validate_config, AgentConfig};
use crate::error::{AgentError, Result};
use crate::host::PageHost;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// The agent installed into one page.
///
/// `get_page_state` and `perform_action` hold the registry for their whole
/// run, so they never interleave. The recorder runs on its own tasks.
pub struct PageAgent {
    host: Arc<dyn PageHost>,
    emitter: EventEmitter,
    snapshotter: Snapshotter,
    synthesizer: InputSynthesizer,
    registry: tokio::sync::Mutex<ElementRegistry>,
    recorder: tokio::sync::Mutex<Recorder>,
    indicator: parking_lot::Mutex<StatusIndicator>,
}

impl PageAgent {
    pub async fn install(
        host: Arc<dyn PageHost>,
        config: &AgentConfig,
        emitter: EventEmitter,
    ) -> Result<Arc<Self>> {
        validate_config(config)?;
        let key = host.page_key();
        if !host.claim_install().await? {
            tracing::info!("Page {} already carries the agent guard, reusing page state", key);
        }

        let locator = Locator::new(config.locator.clone());
        let cursor = VirtualCursor::new(host.clone(), config.cursor.clone());
        cursor.ensure_overlays().await?;

        let agent = Arc::new(Self {
            snapshotter: Snapshotter::new(config.snapshot.clone(), locator.clone()),
            synthesizer: InputSynthesizer::new(
                host.clone(),
                config.input.clone(),
                locator.clone(),
                cursor,
            ),
            recorder: tokio::sync::Mutex::new(Recorder::new(
                host.clone(),
                config.recorder.clone(),
                locator,
                emitter.clone(),
            )),
            registry: tokio::sync::Mutex::new(ElementRegistry::new()),
            indicator: parking_lot::Mutex::new(StatusIndicator::new()),
            emitter,
            host,
        });

        let view = agent.indicator.lock().view();
        agent.render_indicator(view).await;
        tracing::info!("Agent installed in page {}", key);
        Ok(agent)
    }

    pub fn page_key(&self) -> String {
        self.host.page_key()
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Handle one raw request. Always returns a response object; failures,
    /// including panics inside a handler, come back as `{ok: false, message}`.
    pub async fn handle(&self, request: Value) -> Value {
        let outcome = match serde_json::from_value::<AgentRequest>(request) {
            Ok(request) => AssertUnwindSafe(self.dispatch(request))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(AgentError::Internal(panic_message(panic)))),
            Err(e) => Err(AgentError::MalformedRequest(e.to_string())),
        };

        outcome.unwrap_or_else(|e| {
            if matches!(e, AgentError::Internal(_)) {
                tracing::warn!("Request failed: {}", e);
            } else {
                tracing::debug!("Request failed: {}", e);
            }
            json!({ "ok": false, "message": e.to_string() })
        })
    }

    /// Route a parsed request to its handler
    pub async fn dispatch(&self, request: AgentRequest) -> Result<Value> {
        match request {
            AgentRequest::Ping => Ok(json!({ "ok": true })),
            AgentRequest::GetPageState => {
                let mut registry = self.registry.lock().await;
                let state = self
                    .snapshotter
                    .capture(self.host.as_ref(), &mut registry)
                    .await?;
                ok_with(&state)
            }
            AgentRequest::PerformAction { action } => {
                let registry = self.registry.lock().await;
                let result = self.synthesizer.perform(&action, &registry).await;
                to_value(&result)
            }
            AgentRequest::SetRunningIndicator { active, step } => {
                let view = self.indicator.lock().set_running(active, step);
                if let Some(view) = view {
                    self.render_indicator(view).await;
                }
                Ok(json!({ "ok": true }))
            }
            AgentRequest::StartRecording { recording_id } => {
                if recording_id.trim().is_empty() {
                    return Err(AgentError::MalformedRequest(
                        "recordingId must not be empty".to_string(),
                    ));
                }
                self.recorder.lock().await.start(&recording_id).await?;
                let view = self.indicator.lock().set_recording(true);
                if let Some(view) = view {
                    self.render_indicator(view).await;
                }
                Ok(json!({ "ok": true }))
            }
            AgentRequest::StopRecording => {
                self.recorder.lock().await.stop().await;
                let view = self.indicator.lock().set_recording(false);
                if let Some(view) = view {
                    self.render_indicator(view).await;
                }
                Ok(json!({ "ok": true }))
            }
        }
    }

    pub async fn active_recording(&self) -> Option<String> {
        self.recorder
            .lock()
            .await
            .active_recording()
            .map(|id| id.to_string())
    }

    /// Stop recording and return the overlays to idle
    pub async fn shutdown(&self) {
        self.recorder.lock().await.stop().await;
        let view = {
            let mut indicator = self.indicator.lock();
            indicator.set_recording(false);
            indicator.set_running(false, 0);
            indicator.view()
        };
        self.render_indicator(view).await;
        if let Err(e) = self.synthesizer.cursor().hide().await {
            tracing::debug!("Failed to hide cursor on shutdown: {}", e);
        }
        tracing::info!("Agent in page {} shut down", self.host.page_key());
    }

    async fn render_indicator(&self, view: IndicatorView) {
        if let Err(e) = self.host.render_indicator(&view).await {
            tracing::warn!("Failed to render status indicator: {}", e);
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| AgentError::Internal(e.to_string()))
}

/// `{ok: true, ...fields}`
fn ok_with<T: Serialize>(value: &T) -> Result<Value> {
    let mut response = Map::new();
    response.insert("ok".to_string(), Value::Bool(true));
    match to_value(value)? {
        Value::Object(fields) => response.extend(fields),
        other => {
            response.insert("data".to_string(), other);
        }
    }
    Ok(Value::Object(response))
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "handler panicked".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::indicator::IndicatorState;
    use crate::host::{ElementSpec, MemoryPage};

    async fn agent() -> (Arc<MemoryPage>, Arc<PageAgent>) {
        let page = Arc::new(MemoryPage::new("https://example.com/", "Example", 1000.0, 800.0));
        page.append(
            page.body(),
            ElementSpec::new("button").id("go").text("Go").rect(10.0, 10.0, 80.0, 30.0),
        );
        let agent = PageAgent::install(page.clone(), &AgentConfig::default(), EventEmitter::new())
            .await
            .unwrap();
        (page, agent)
    }

    // ------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_ping() {
        let (_, agent) = agent().await;
        assert_eq!(agent.handle(json!({"type": "ping"})).await, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_malformed_requests_are_reported() {
        let (_, agent) = agent().await;
        for request in [
            json!({}),
            json!({"type": "teleport"}),
            json!({"type": "perform_action"}),
            json!("ping"),
        ] {
            let response = agent.handle(request).await;
            assert_eq!(response["ok"], false);
            assert!(response["message"]
                .as_str()
                .unwrap()
                .starts_with("Malformed request"));
        }

        let response = agent
            .handle(json!({"type": "start_recording", "recordingId": " "}))
            .await;
        assert_eq!(response["ok"], false);
    }

    #[tokio::test]
    async fn test_page_state_is_flattened() {
        let (_, agent) = agent().await;
        let response = agent.handle(json!({"type": "get_page_state"})).await;
        assert_eq!(response["ok"], true);
        assert_eq!(response["title"], "Example");
        assert_eq!(response["elements"][0]["id"], "e_1");
        assert_eq!(response["elements"][0]["selector"], "#go");
    }

    #[tokio::test]
    async fn test_action_failure_is_a_result() {
        let (_, agent) = agent().await;
        let response = agent
            .handle(json!({
                "type": "perform_action",
                "action": {"type": "click", "target": "e_9"}
            }))
            .await;
        assert_eq!(response["ok"], false);
        assert!(response["message"].as_str().unwrap().contains("e_9"));
    }

    // ------------------------------------------------------------------
    // Indicator
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_indicator_follows_running_and_recording() {
        let (page, agent) = agent().await;
        assert_eq!(page.indicator().unwrap().state, IndicatorState::Idle);

        agent
            .handle(json!({"type": "set_running_indicator", "active": true, "step": 3}))
            .await;
        let view = page.indicator().unwrap();
        assert_eq!(view.state, IndicatorState::Running);
        assert_eq!(view.step, 3);

        let response = agent
            .handle(json!({"type": "start_recording", "recordingId": "rec-1"}))
            .await;
        assert_eq!(response, json!({"ok": true}));
        assert_eq!(page.indicator().unwrap().state, IndicatorState::RunningRecording);
        assert_eq!(agent.active_recording().await.as_deref(), Some("rec-1"));
        assert!(page.is_listening());

        agent.handle(json!({"type": "stop_recording"})).await;
        assert_eq!(page.indicator().unwrap().state, IndicatorState::Running);
        assert!(!page.is_listening());
        assert_eq!(agent.active_recording().await, None);
    }

    #[tokio::test]
    async fn test_stop_without_recording_is_noop() {
        let (_, agent) = agent().await;
        let response = agent.handle(json!({"type": "stop_recording"})).await;
        assert_eq!(response, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_shutdown_returns_to_idle() {
        let (page, agent) = agent().await;
        agent
            .handle(json!({"type": "set_running_indicator", "active": true, "step": 1}))
            .await;
        agent
            .handle(json!({"type": "start_recording", "recordingId": "rec-1"}))
            .await;
        agent.shutdown().await;
        assert_eq!(page.indicator().unwrap().state, IndicatorState::Idle);
        assert!(!page.is_listening());
    }

    #[tokio::test]
    async fn test_install_rejects_invalid_config() {
        let page = Arc::new(MemoryPage::new("https://example.com/", "Example", 1000.0, 800.0));

        let mut config = AgentConfig::default();
        config.input.max_scroll_px = f64::NAN;
        let err = PageAgent::install(page.clone(), &config, EventEmitter::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::Config(_)));

        let mut config = AgentConfig::default();
        config.cursor.max_steps = 0;
        config.cursor.default_steps = 0;
        assert!(PageAgent::install(page.clone(), &config, EventEmitter::new())
            .await
            .is_err());
        assert!(page.indicator().is_none());
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("owned".to_string())), "owned");
        assert_eq!(panic_message(Box::new(7_u8)), "handler panicked");
    }
}
