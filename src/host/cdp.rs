//! [`PageHost`] over the Chrome DevTools protocol.
//!
//! Connects to an already running browser (`--remote-debugging-port`), picks a
//! page target and installs `page_bootstrap.js` into it. Every host call is a
//! `Runtime.evaluate` of `window.__pageAgent.<fn>(...)`; recorder events come
//! back through the `__pageAgentEmit` runtime binding.

use super::{
    ActivationMethod, CursorFrame, DomEvent, ElementFacts, FetchedAsset, FileAssignment,
    FilePayload, HostError, HostResult, KeyPhase, NodeHandle, PageGeometry, PageHost, Point,
    PointerPhase, RawPageEvent,
};
use crate::agent::indicator::IndicatorView;
use async_trait::async_trait;
use base64::Engine;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};

const BOOTSTRAP: &str = include_str!("page_bootstrap.js");
const EMIT_BINDING: &str = "__pageAgentEmit";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type PendingResponses = Arc<Mutex<HashMap<u32, oneshot::Sender<Value>>>>;
type ListenerSlot = Arc<parking_lot::Mutex<Option<mpsc::UnboundedSender<RawPageEvent>>>>;

/// One attached page target.
pub struct CdpPage {
    key: String,
    ws_tx: Mutex<WsSink>,
    responses: PendingResponses,
    listener: ListenerSlot,
    msg_id: AtomicU32,
    reader: JoinHandle<()>,
}

impl CdpPage {
    /// Attach to the first page target on `port` whose URL starts with
    /// `url_prefix` (any page target when `None`).
    pub async fn attach(port: u16, url_prefix: Option<&str>) -> HostResult<Self> {
        let list_url = format!("http://127.0.0.1:{}/json/list", port);
        let response = reqwest::get(&list_url)
            .await
            .map_err(|e| HostError(format!("Connection error: {}", e)))?;
        if !response.status().is_success() {
            return Err(HostError(format!("HTTP error: {}", response.status())));
        }
        let targets: Value = response
            .json()
            .await
            .map_err(|e| HostError(format!("Failed to parse targets response: {}", e)))?;

        let target = targets
            .as_array()
            .into_iter()
            .flatten()
            .find(|t| {
                t.get("type").and_then(|v| v.as_str()) == Some("page")
                    && url_prefix.map_or(true, |prefix| {
                        t.get("url")
                            .and_then(|v| v.as_str())
                            .is_some_and(|url| url.starts_with(prefix))
                    })
            })
            .ok_or_else(|| HostError("No page target found".to_string()))?;

        let ws_url = target
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HostError("No webSocketDebuggerUrl in page target".to_string()))?;
        let key = target
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        tracing::info!("Connecting to page target WebSocket: {}", ws_url);
        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| HostError(format!("Failed to connect WebSocket: {}", e)))?;
        let (tx, rx) = StreamExt::split(ws_stream);

        let responses: PendingResponses = Arc::new(Mutex::new(HashMap::new()));
        let listener: ListenerSlot = Arc::new(parking_lot::Mutex::new(None));
        let reader = tokio::spawn(read_loop(rx, responses.clone(), listener.clone()));

        let page = Self {
            key,
            ws_tx: Mutex::new(tx),
            responses,
            listener,
            msg_id: AtomicU32::new(1),
            reader,
        };

        page.send_command("Page.enable", json!({})).await?;
        page.send_command("Runtime.enable", json!({})).await?;
        page.send_command("Runtime.addBinding", json!({ "name": EMIT_BINDING }))
            .await?;
        page.send_command(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": BOOTSTRAP }),
        )
        .await?;
        page.evaluate(BOOTSTRAP).await?;
        tracing::info!("CDP page {} attached", page.key);

        Ok(page)
    }

    /// Send a CDP command and wait for its response
    async fn send_command(&self, method: &str, params: Value) -> HostResult<Value> {
        let id = self.msg_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.responses.lock().await.insert(id, tx);

        let command = json!({
            "id": id,
            "method": method,
            "params": params
        });

        tracing::trace!("CDP -> {} (id {})", method, id);
        let sent = self
            .ws_tx
            .lock()
            .await
            .send(WsMessage::Text(command.to_string()))
            .await;
        if let Err(e) = sent {
            self.responses.lock().await.remove(&id);
            return Err(HostError(format!("Failed to send command: {}", e)));
        }

        let response = match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(HostError("Response channel closed".to_string())),
            Err(_) => {
                self.responses.lock().await.remove(&id);
                return Err(HostError(format!("Command timeout: {}", method)));
            }
        };

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown CDP error");
            return Err(HostError(format!("{} failed: {}", method, message)));
        }
        Ok(response)
    }

    /// Evaluate an expression, awaiting promises, and return its value
    async fn evaluate(&self, expression: &str) -> HostResult<Value> {
        let response = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true
                }),
            )
            .await?;

        let result = response.get("result").cloned().unwrap_or(Value::Null);
        if let Some(details) = result.get("exceptionDetails") {
            let message = details
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|d| d.as_str())
                .or_else(|| details.get("text").and_then(|t| t.as_str()))
                .unwrap_or("script exception");
            return Err(HostError(message.to_string()));
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Call a page helper; reinstalls the helper if the document was replaced
    async fn call(&self, function: &str, args: Value) -> HostResult<Value> {
        let expression = helper_call(function, &args);
        if let Some(value) = helper_result(self.evaluate(&expression).await?) {
            return Ok(value);
        }

        tracing::debug!("Page helpers missing in {}, reinstalling", self.key);
        self.evaluate(BOOTSTRAP).await?;
        helper_result(self.evaluate(&expression).await?)
            .ok_or_else(|| HostError("page helpers could not be installed".to_string()))
    }

    async fn call_as<T: DeserializeOwned>(&self, function: &str, args: Value) -> HostResult<T> {
        let value = self.call(function, args).await?;
        serde_json::from_value(value)
            .map_err(|e| HostError(format!("unexpected {} result: {}", function, e)))
    }
}

impl Drop for CdpPage {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut rx: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    responses: PendingResponses,
    listener: ListenerSlot,
) {
    while let Some(msg) = rx.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                let Ok(json) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                if let Some(id) = json.get("id").and_then(|i| i.as_u64()) {
                    tracing::trace!("CDP <- response (id {}, {} bytes)", id, text.len());
                    if let Some(sender) = responses.lock().await.remove(&(id as u32)) {
                        let _ = sender.send(json);
                    }
                    continue;
                }
                let method = json.get("method").and_then(|m| m.as_str()).unwrap_or("");
                tracing::trace!("CDP <- {}", method);
                if method == "Runtime.bindingCalled" {
                    route_binding(&json["params"], &listener);
                }
            }
            Ok(WsMessage::Close(_)) => {
                tracing::debug!("WebSocket closed");
                break;
            }
            Err(e) => {
                tracing::debug!("WebSocket error: {:?}", e);
                break;
            }
            _ => {}
        }
    }
    // Fail pending commands instead of letting them run into the timeout
    responses.lock().await.clear();
}

/// `{installed: false}` when the helpers are gone, otherwise `{installed: true, value}`
fn helper_call(function: &str, args: &Value) -> String {
    format!(
        "(async () => {{ const agent = window.__pageAgent; \
         if (!agent) return {{ installed: false }}; \
         return {{ installed: true, value: await agent.{}(...{}) }}; }})()",
        function, args
    )
}

fn helper_result(outcome: Value) -> Option<Value> {
    if outcome.get("installed").and_then(|i| i.as_bool()) != Some(true) {
        return None;
    }
    Some(outcome.get("value").cloned().unwrap_or(Value::Null))
}

fn route_binding(params: &Value, listener: &ListenerSlot) {
    if params.get("name").and_then(|n| n.as_str()) != Some(EMIT_BINDING) {
        return;
    }
    let Some(payload) = params.get("payload").and_then(|p| p.as_str()) else {
        return;
    };
    match serde_json::from_str::<RawPageEvent>(payload) {
        Ok(event) => {
            let mut slot = listener.lock();
            if let Some(tx) = slot.as_ref() {
                if tx.send(event).is_err() {
                    *slot = None;
                }
            }
        }
        Err(e) => tracing::debug!("Dropping malformed page event: {}", e),
    }
}

#[derive(serde::Deserialize)]
struct AssignResult {
    assigned: bool,
    #[serde(default)]
    reason: Option<String>,
}

#[async_trait]
impl PageHost for CdpPage {
    fn page_key(&self) -> String {
        self.key.clone()
    }

    async fn claim_install(&self) -> HostResult<bool> {
        self.call_as("claimInstall", json!([])).await
    }

    async fn url(&self) -> HostResult<String> {
        self.call_as("url", json!([])).await
    }

    async fn title(&self) -> HostResult<String> {
        self.call_as("title", json!([])).await
    }

    async fn geometry(&self) -> HostResult<PageGeometry> {
        self.call_as("geometry", json!([])).await
    }

    async fn visible_text(&self) -> HostResult<String> {
        self.call_as("visibleText", json!([])).await
    }

    async fn interactive_elements(&self) -> HostResult<Vec<ElementFacts>> {
        self.call_as("interactiveElements", json!([])).await
    }

    async fn describe(&self, node: NodeHandle) -> HostResult<Option<ElementFacts>> {
        self.call_as("describe", json!([node.0])).await
    }

    async fn query(&self, address: &str) -> HostResult<Option<NodeHandle>> {
        self.call_as("query", json!([address])).await
    }

    async fn element_at(&self, point: Point) -> HostResult<Option<NodeHandle>> {
        self.call_as("elementAt", json!([point.x, point.y])).await
    }

    async fn scroll_by(&self, dy: f64, smooth: bool) -> HostResult<()> {
        self.call("scrollBy", json!([dy, smooth])).await.map(|_| ())
    }

    async fn scroll_into_view(&self, node: NodeHandle) -> HostResult<()> {
        self.call("scrollIntoView", json!([node.0])).await.map(|_| ())
    }

    async fn dispatch_pointer(
        &self,
        node: NodeHandle,
        phase: PointerPhase,
        point: Point,
    ) -> HostResult<()> {
        self.call("pointer", json!([node.0, phase, point.x, point.y]))
            .await
            .map(|_| ())
    }

    async fn focus(&self, node: NodeHandle) -> HostResult<bool> {
        self.call_as("focus", json!([node.0])).await
    }

    async fn focused(&self) -> HostResult<Option<NodeHandle>> {
        self.call_as("focused", json!([])).await
    }

    async fn activate(&self, node: NodeHandle) -> HostResult<ActivationMethod> {
        self.call_as("activate", json!([node.0])).await
    }

    async fn set_value(&self, node: NodeHandle, value: &str) -> HostResult<()> {
        self.call("setValue", json!([node.0, value])).await.map(|_| ())
    }

    async fn set_text_content(&self, node: NodeHandle, text: &str) -> HostResult<()> {
        self.call("setTextContent", json!([node.0, text]))
            .await
            .map(|_| ())
    }

    async fn dispatch_event(&self, node: NodeHandle, event: DomEvent) -> HostResult<()> {
        self.call("dispatchEvent", json!([node.0, event]))
            .await
            .map(|_| ())
    }

    async fn dispatch_key(
        &self,
        node: Option<NodeHandle>,
        key: &str,
        phase: KeyPhase,
    ) -> HostResult<()> {
        self.call("key", json!([node.map(|n| n.0), key, phase]))
            .await
            .map(|_| ())
    }

    async fn owning_form(&self, node: NodeHandle) -> HostResult<Option<NodeHandle>> {
        self.call_as("owningForm", json!([node.0])).await
    }

    async fn request_submit(&self, form: NodeHandle) -> HostResult<()> {
        self.call("requestSubmit", json!([form.0])).await.map(|_| ())
    }

    async fn assign_files(
        &self,
        node: NodeHandle,
        files: &[FilePayload],
    ) -> HostResult<FileAssignment> {
        let files: Vec<Value> = files
            .iter()
            .map(|f| {
                json!({
                    "name": f.name,
                    "mimeType": f.mime_type,
                    "data": base64::engine::general_purpose::STANDARD.encode(&f.bytes),
                })
            })
            .collect();
        let result: AssignResult = self.call_as("assignFiles", json!([node.0, files])).await?;
        if result.assigned {
            Ok(FileAssignment::Assigned)
        } else {
            Ok(FileAssignment::Unsupported(
                result
                    .reason
                    .unwrap_or_else(|| "file assignment rejected".to_string()),
            ))
        }
    }

    async fn fetch_asset(&self, url: &str) -> HostResult<FetchedAsset> {
        self.call_as("fetchAsset", json!([url])).await
    }

    async fn install_overlays(&self) -> HostResult<()> {
        self.call("installOverlays", json!([])).await.map(|_| ())
    }

    async fn render_cursor(&self, frame: CursorFrame) -> HostResult<()> {
        self.call("renderCursor", json!([frame])).await.map(|_| ())
    }

    async fn render_indicator(&self, view: &IndicatorView) -> HostResult<()> {
        self.call("renderIndicator", json!([view])).await.map(|_| ())
    }

    async fn attach_listeners(
        &self,
        keys: &[String],
    ) -> HostResult<mpsc::UnboundedReceiver<RawPageEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.listener.lock() = Some(tx);
        self.call("attachListeners", json!([keys])).await?;
        Ok(rx)
    }

    async fn detach_listeners(&self) -> HostResult<()> {
        let detached = self.call("detachListeners", json!([])).await.map(|_| ());
        // Events emitted before the detach response were already routed
        *self.listener.lock() = None;
        detached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::RawEventKind;

    #[test]
    fn test_bootstrap_exposes_helpers_used_by_host() {
        for helper in [
            "claimInstall",
            "interactiveElements",
            "elementAt",
            "scrollIntoView",
            "owningForm",
            "assignFiles",
            "fetchAsset",
            "renderIndicator",
            "attachListeners",
            "detachListeners",
        ] {
            assert!(
                BOOTSTRAP.contains(&format!("{}:", helper))
                    || BOOTSTRAP.contains(&format!("{}(", helper)),
                "missing helper {}",
                helper
            );
        }
        assert!(BOOTSTRAP.contains(EMIT_BINDING));
        assert!(BOOTSTRAP.contains("!concealsValue(el) ? String(el.value"));
        assert!(BOOTSTRAP.contains("if (!listenKeys.has(e.key)) return;"));
    }

    #[test]
    fn test_helper_call_leaves_bootstrap_out() {
        let expression = helper_call("attachListeners", &json!([["Enter", "Tab"]]));
        assert!(expression.contains("agent.attachListeners(...[[\"Enter\",\"Tab\"]])"));
        assert!(expression.len() < 300);
        assert!(!expression.contains("INTERACTIVE"));
    }

    #[test]
    fn test_helper_result() {
        assert_eq!(helper_result(json!({"installed": false})), None);
        assert_eq!(helper_result(Value::Null), None);
        assert_eq!(
            helper_result(json!({"installed": true, "value": "https://example.com/"})),
            Some(json!("https://example.com/"))
        );
        // helpers returning undefined drop the key
        assert_eq!(helper_result(json!({"installed": true})), Some(Value::Null));
    }

    #[test]
    fn test_route_binding_forwards_page_events() {
        let slot: ListenerSlot = Arc::new(parking_lot::Mutex::new(None));
        let (tx, mut rx) = mpsc::unbounded_channel();
        *slot.lock() = Some(tx);

        let params = json!({
            "name": EMIT_BINDING,
            "payload": r#"{"url":"https://example.com/","kind":"scroll","scrollY":300}"#
        });
        route_binding(&params, &slot);
        route_binding(&json!({"name": "other", "payload": "{}"}), &slot);
        route_binding(&json!({"name": EMIT_BINDING, "payload": "not json"}), &slot);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind, RawEventKind::Scroll { scroll_y: 300.0 });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_route_binding_clears_closed_listener() {
        let slot: ListenerSlot = Arc::new(parking_lot::Mutex::new(None));
        let (tx, rx) = mpsc::unbounded_channel();
        *slot.lock() = Some(tx);
        drop(rx);

        let params = json!({
            "name": EMIT_BINDING,
            "payload": r#"{"url":"u","kind":"scroll","scrollY":1}"#
        });
        route_binding(&params, &slot);
        assert!(slot.lock().is_none());
    }
}
