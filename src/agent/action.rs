//! Input Synthesizer: runs one action as a realistic input-event sequence.

use crate::agent::cursor::VirtualCursor;
use crate::agent::locator::{ElementRegistry, Locator};
use crate::agent::payload::resolve_payload;
use crate::agent::target::{describe_element, resolve_target, ResolvedTarget};
use crate::agent::types::{
    ActionRequest, ActionResult, ActionType, AttachFileArgs, ClickAtArgs, KeypressArgs,
    ScrollArgs, TypeArgs,
};
use crate::config::InputConfig;
use crate::error::{AgentError, Result};
use crate::host::{
    DomEvent, ElementFacts, FileAssignment, KeyPhase, NodeHandle, PageGeometry, PageHost, Point,
    PointerPhase,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// How a target accepts text, decided once from its facts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditableSurface {
    /// input / textarea / select: set `value`, fire input + change
    FormField,
    /// contenteditable: set text content, fire input
    Region,
    Unsupported,
}

impl EditableSurface {
    pub fn classify(facts: &ElementFacts) -> Self {
        match facts.tag.as_str() {
            "textarea" | "select" => EditableSurface::FormField,
            "input" => match facts.input_type.as_deref().unwrap_or("text") {
                "button" | "submit" | "reset" | "image" | "checkbox" | "radio" | "file"
                | "hidden" => EditableSurface::Unsupported,
                _ => EditableSurface::FormField,
            },
            _ if facts.content_editable => EditableSurface::Region,
            _ => EditableSurface::Unsupported,
        }
    }
}

pub struct InputSynthesizer {
    host: Arc<dyn PageHost>,
    config: InputConfig,
    locator: Locator,
    cursor: VirtualCursor,
}

impl InputSynthesizer {
    pub fn new(
        host: Arc<dyn PageHost>,
        config: InputConfig,
        locator: Locator,
        cursor: VirtualCursor,
    ) -> Self {
        Self {
            host,
            config,
            locator,
            cursor,
        }
    }

    pub fn cursor(&self) -> &VirtualCursor {
        &self.cursor
    }

    /// Execute one action. Every failure becomes `ok: false`.
    pub async fn perform(&self, request: &ActionRequest, registry: &ElementRegistry) -> ActionResult {
        tracing::debug!("Performing {:?} on {:?}", request.action, request.target);
        match self.execute(request, registry).await {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!("Action {:?} failed: {}", request.action, e);
                ActionResult::failure(e.to_string())
            }
        }
    }

    async fn execute(&self, request: &ActionRequest, registry: &ElementRegistry) -> Result<ActionResult> {
        match request.action {
            ActionType::Scroll => self.scroll(request.parse_args()?).await,
            ActionType::ClickAt => self.click_at(request.parse_args()?).await,
            ActionType::Click => {
                let target = self.prepare(request, registry).await?;
                self.click(target).await
            }
            ActionType::Type => {
                let args: TypeArgs = request.parse_args()?;
                let target = self.prepare(request, registry).await?;
                self.type_text(target, args).await
            }
            ActionType::Keypress => {
                let args: KeypressArgs = request.parse_args()?;
                let target = match &request.target {
                    Some(_) => Some(self.prepare(request, registry).await?),
                    None => None,
                };
                self.keypress(target, args).await
            }
            ActionType::AttachFile => {
                let args: AttachFileArgs = request.parse_args()?;
                let target = self.prepare(request, registry).await?;
                self.attach_file(target, args).await
            }
        }
    }

    /// Resolve, center in the viewport, let layout settle
    async fn prepare(&self, request: &ActionRequest, registry: &ElementRegistry) -> Result<ResolvedTarget> {
        let target = request
            .target
            .as_ref()
            .ok_or_else(|| AgentError::MalformedRequest("missing target".to_string()))?;
        let resolved = resolve_target(self.host.as_ref(), registry, target).await?;
        self.host.scroll_into_view(resolved.node).await?;
        sleep_ms(self.config.target_settle_ms).await;
        Ok(resolved)
    }

    // ------------------------------------------------------------------
    // scroll
    // ------------------------------------------------------------------

    async fn scroll(&self, args: ScrollArgs) -> Result<ActionResult> {
        let geometry = self.host.geometry().await?;
        let dy = scroll_delta(args.dy, geometry.viewport_height, &self.config);
        self.host.scroll_by(dy, true).await?;
        sleep_ms(self.config.scroll_settle_ms).await;
        Ok(ActionResult::success(format!("Scrolled by {}px", dy.round())).with("dy", dy))
    }

    // ------------------------------------------------------------------
    // click_at
    // ------------------------------------------------------------------

    async fn click_at(&self, args: ClickAtArgs) -> Result<ActionResult> {
        let geometry = self.host.geometry().await?;
        let point = resolve_point(
            args.x.as_ref().and_then(|v| v.as_f64()),
            args.y.as_ref().and_then(|v| v.as_f64()),
            args.normalized,
            &geometry,
        );

        let (steps, duration) = self.cursor.plan(args.steps, args.duration_ms);
        self.cursor.move_to(point, steps, duration).await?;

        let Some(node) = self.host.element_at(point).await? else {
            self.cursor.hide_later().await;
            return Err(AgentError::NoElementAtPoint {
                x: point.x.round() as i64,
                y: point.y.round() as i64,
            });
        };

        self.host.dispatch_pointer(node, PointerPhase::Move, point).await?;
        self.host.focus(node).await?;
        self.host.dispatch_pointer(node, PointerPhase::Down, point).await?;
        self.host.dispatch_pointer(node, PointerPhase::Up, point).await?;
        self.host.activate(node).await?;
        self.cursor.hide_later().await;

        let clicked = match self.host.describe(node).await? {
            Some(facts) => describe_element(&facts, &self.locator.label(&facts)),
            None => "element".to_string(),
        };
        Ok(
            ActionResult::success(format!(
                "Clicked {} at ({}, {})",
                clicked,
                point.x.round(),
                point.y.round()
            ))
            .with("point", json!({ "x": point.x, "y": point.y }))
            .with("clicked", clicked),
        )
    }

    // ------------------------------------------------------------------
    // click / type / keypress on a resolved target
    // ------------------------------------------------------------------

    async fn click(&self, target: ResolvedTarget) -> Result<ActionResult> {
        self.host.focus(target.node).await?;
        self.host.activate(target.node).await?;
        let clicked = describe_element(&target.facts, &self.locator.label(&target.facts));
        Ok(ActionResult::success(format!("Clicked {}", clicked)).with("clicked", clicked))
    }

    async fn type_text(&self, target: ResolvedTarget, args: TypeArgs) -> Result<ActionResult> {
        let node = target.node;
        match EditableSurface::classify(&target.facts) {
            EditableSurface::FormField => {
                self.host.focus(node).await?;
                self.host.set_value(node, &args.text).await?;
                self.host.dispatch_event(node, DomEvent::Input).await?;
                self.host.dispatch_event(node, DomEvent::Change).await?;
            }
            EditableSurface::Region => {
                self.host.focus(node).await?;
                self.host.set_text_content(node, &args.text).await?;
                self.host.dispatch_event(node, DomEvent::Input).await?;
            }
            EditableSurface::Unsupported => {
                return Err(AgentError::NotEditable(target.address));
            }
        }

        let mut result = ActionResult::success(format!(
            "Typed {} characters into {}",
            args.text.chars().count(),
            target.address
        ));
        if args.press_enter {
            let submitted = self.press(Some(node), "Enter").await?;
            result = result.with("submitted", submitted);
        }
        Ok(result)
    }

    async fn keypress(&self, target: Option<ResolvedTarget>, args: KeypressArgs) -> Result<ActionResult> {
        let key = args
            .key
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| "Enter".to_string());
        let node = match target {
            Some(target) => Some(target.node),
            None => self.host.focused().await?,
        };
        let submitted = self.press(node, &key).await?;
        Ok(ActionResult::success(format!("Pressed {}", key)).with("submitted", submitted))
    }

    /// Key down/up; Enter inside a form also requests submission
    async fn press(&self, node: Option<NodeHandle>, key: &str) -> Result<bool> {
        self.host.dispatch_key(node, key, KeyPhase::Down).await?;
        self.host.dispatch_key(node, key, KeyPhase::Up).await?;

        if key != "Enter" {
            return Ok(false);
        }
        let Some(node) = node else {
            return Ok(false);
        };
        match self.host.owning_form(node).await? {
            Some(form) => {
                self.host.request_submit(form).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ------------------------------------------------------------------
    // attach_file
    // ------------------------------------------------------------------

    async fn attach_file(&self, target: ResolvedTarget, args: AttachFileArgs) -> Result<ActionResult> {
        if !target.facts.is_input_type("file") {
            return Err(AgentError::NotFileInput(target.address));
        }

        let timeout = Duration::from_millis(self.config.fetch_timeout_ms);
        let payload = resolve_payload(self.host.as_ref(), &args, timeout).await?;
        let file_name = payload.name.clone();
        let file_size = payload.bytes.len();

        match self
            .host
            .assign_files(target.node, std::slice::from_ref(&payload))
            .await?
        {
            FileAssignment::Assigned => {}
            FileAssignment::Unsupported(reason) => {
                return Err(AgentError::TransferUnavailable(reason));
            }
        }
        self.host.dispatch_event(target.node, DomEvent::Input).await?;
        self.host.dispatch_event(target.node, DomEvent::Change).await?;

        Ok(ActionResult::success(format!(
            "Attached {} ({} bytes) to {}",
            file_name, file_size, target.address
        ))
        .with("fileName", file_name)
        .with("fileSize", file_size))
    }
}

/// Requested delta, or a page-ish default when absent, zero or too small to notice
pub fn scroll_delta(requested: Option<f64>, viewport_height: f64, config: &InputConfig) -> f64 {
    let default = viewport_height * config.scroll_fraction;
    let dy = match requested.filter(|dy| dy.is_finite()) {
        None => default,
        Some(dy) if dy == 0.0 => default,
        Some(dy) if dy.abs() < default * config.scroll_noise_fraction => default.copysign(dy),
        Some(dy) => dy,
    };
    dy.clamp(-config.max_scroll_px, config.max_scroll_px)
}

/// Viewport point for click_at; invalid coordinates fall back to the center
pub fn resolve_point(x: Option<f64>, y: Option<f64>, normalized: bool, geometry: &PageGeometry) -> Point {
    let axis = |value: Option<f64>, extent: f64| {
        let extent = extent.max(1.0);
        let pixel = match value.filter(|v| v.is_finite()) {
            Some(v) if normalized => v * extent,
            Some(v) => v,
            None => extent / 2.0,
        };
        pixel.clamp(0.0, extent - 1.0)
    };
    Point::new(
        axis(x, geometry.viewport_width),
        axis(y, geometry.viewport_height),
    )
}

async fn sleep_ms(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CursorConfig, LocatorConfig};
    use crate::host::{ElementSpec, MemoryPage};

    fn geometry(width: f64, height: f64) -> PageGeometry {
        PageGeometry {
            viewport_width: width,
            viewport_height: height,
            scroll_x: 0.0,
            scroll_y: 0.0,
            scroll_height: height,
        }
    }

    fn fast_config() -> InputConfig {
        InputConfig {
            scroll_settle_ms: 0,
            target_settle_ms: 0,
            ..Default::default()
        }
    }

    fn synthesizer(page: Arc<MemoryPage>) -> InputSynthesizer {
        let cursor = VirtualCursor::new(
            page.clone(),
            CursorConfig {
                default_duration_ms: 0,
                hide_after_ms: 0,
                ..Default::default()
            },
        );
        InputSynthesizer::new(page, fast_config(), Locator::new(LocatorConfig::default()), cursor)
    }

    // ------------------------------------------------------------------
    // Pure helpers
    // ------------------------------------------------------------------

    #[test]
    fn test_scroll_delta_defaults_and_noise() {
        let config = InputConfig::default();
        let default = 800.0 * 0.82;
        assert_eq!(scroll_delta(None, 800.0, &config), default);
        assert_eq!(scroll_delta(Some(0.0), 800.0, &config), default);
        assert_eq!(scroll_delta(Some(50.0), 800.0, &config), default);
        assert_eq!(scroll_delta(Some(-50.0), 800.0, &config), -default);
        assert_eq!(scroll_delta(Some(500.0), 800.0, &config), 500.0);
        assert_eq!(scroll_delta(Some(-9000.0), 800.0, &config), -4000.0);
        assert_eq!(scroll_delta(Some(f64::NAN), 800.0, &config), default);
    }

    #[test]
    fn test_resolve_point() {
        let g = geometry(1000.0, 800.0);
        assert_eq!(resolve_point(Some(0.5), Some(0.5), true, &g), Point::new(500.0, 400.0));
        assert_eq!(resolve_point(Some(120.0), Some(30.0), false, &g), Point::new(120.0, 30.0));
        assert_eq!(resolve_point(None, Some(f64::INFINITY), false, &g), Point::new(500.0, 400.0));
        assert_eq!(resolve_point(Some(1.5), Some(-0.2), true, &g), Point::new(999.0, 0.0));
        assert_eq!(resolve_point(Some(5000.0), Some(10.0), false, &g), Point::new(999.0, 10.0));
    }

    #[test]
    fn test_editable_surface_classification() {
        let mut facts = ElementFacts {
            tag: "input".to_string(),
            input_type: Some("email".to_string()),
            ..Default::default()
        };
        assert_eq!(EditableSurface::classify(&facts), EditableSurface::FormField);
        facts.input_type = Some("checkbox".to_string());
        assert_eq!(EditableSurface::classify(&facts), EditableSurface::Unsupported);

        facts.tag = "div".to_string();
        assert_eq!(EditableSurface::classify(&facts), EditableSurface::Unsupported);
        facts.content_editable = true;
        assert_eq!(EditableSurface::classify(&facts), EditableSurface::Region);
    }

    // ------------------------------------------------------------------
    // Event sequences
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_click_at_dispatches_full_sequence() {
        let page = Arc::new(MemoryPage::new("https://example.com", "t", 1000.0, 800.0));
        let button = page.append(
            page.body(),
            ElementSpec::new("button").id("center").text("Center").rect(450.0, 380.0, 100.0, 40.0),
        );
        let synth = synthesizer(page.clone());
        let request = ActionRequest::new(ActionType::ClickAt)
            .args(json!({"x": 0.5, "y": 0.5, "normalized": true}));

        let result = synth.perform(&request, &ElementRegistry::new()).await;
        assert!(result.ok, "{}", result.message);
        assert_eq!(result.data["point"], json!({"x": 500.0, "y": 400.0}));
        assert_eq!(
            page.events_for(button),
            vec![
                "pointermove", "mousemove", "focus", "pointerdown", "mousedown", "pointerup",
                "mouseup", "click"
            ]
        );
        assert!(!page.cursor().unwrap().visible, "cursor hidden after click");
    }

    #[tokio::test]
    async fn test_click_at_empty_point_fails() {
        let page = Arc::new(MemoryPage::new("https://example.com", "t", 1000.0, 800.0));
        let synth = synthesizer(page.clone());
        let request = ActionRequest::new(ActionType::ClickAt).args(json!({"x": 10, "y": 10}));
        let result = synth.perform(&request, &ElementRegistry::new()).await;
        assert!(!result.ok);
        assert!(result.message.contains("No element"), "{}", result.message);
    }

    #[tokio::test]
    async fn test_click_falls_back_to_synthetic_activation() {
        let page = Arc::new(MemoryPage::new("https://example.com", "t", 1000.0, 800.0));
        let icon = page.append(
            page.body(),
            ElementSpec::new("span")
                .id("icon")
                .attr("role", "button")
                .without_native_click()
                .rect(0.0, 0.0, 20.0, 20.0),
        );
        let synth = synthesizer(page.clone());
        let result = synth
            .perform(&ActionRequest::new(ActionType::Click).target("#icon"), &ElementRegistry::new())
            .await;
        assert!(result.ok);
        assert_eq!(page.events_for(icon), vec!["focus", "click:synthetic"]);
    }

    #[tokio::test]
    async fn test_type_into_field_and_region() {
        let page = Arc::new(MemoryPage::new("https://example.com", "t", 1000.0, 800.0));
        let input = page.append(page.body(), ElementSpec::new("input").id("q").rect(0.0, 0.0, 200.0, 30.0));
        let region = page.append(
            page.body(),
            ElementSpec::new("div").id("notes").editable().rect(0.0, 40.0, 200.0, 100.0),
        );
        let synth = synthesizer(page.clone());
        let registry = ElementRegistry::new();

        let result = synth
            .perform(
                &ActionRequest::new(ActionType::Type).target("#q").args(json!({"text": "rust"})),
                &registry,
            )
            .await;
        assert!(result.ok, "{}", result.message);
        assert_eq!(page.value_of(input), "rust");
        assert_eq!(page.events_for(input), vec!["focus", "input", "change"]);

        let result = synth
            .perform(
                &ActionRequest::new(ActionType::Type).target("#notes").args(json!({"text": "hi"})),
                &registry,
            )
            .await;
        assert!(result.ok);
        assert_eq!(page.text_of(region), "hi");
        assert_eq!(page.events_for(region), vec!["focus", "input"]);
    }

    #[tokio::test]
    async fn test_enter_submits_owning_form() {
        let page = Arc::new(MemoryPage::new("https://example.com", "t", 1000.0, 800.0));
        let form = page.append(page.body(), ElementSpec::new("form").id("search"));
        let input = page.append(form, ElementSpec::new("input").id("q").rect(0.0, 0.0, 200.0, 30.0));
        let synth = synthesizer(page.clone());

        let result = synth
            .perform(
                &ActionRequest::new(ActionType::Type)
                    .target("#q")
                    .args(json!({"text": "rust", "pressEnter": true})),
                &ElementRegistry::new(),
            )
            .await;
        assert!(result.ok);
        assert_eq!(result.data["submitted"], json!(true));
        assert_eq!(page.events_for(form), vec!["submit"]);
        assert!(page.events_for(input).ends_with(&["keydown:Enter".to_string(), "keyup:Enter".to_string()]));
    }

    #[tokio::test]
    async fn test_keypress_defaults_to_enter_on_focused_element() {
        let page = Arc::new(MemoryPage::new("https://example.com", "t", 1000.0, 800.0));
        let input = page.append(page.body(), ElementSpec::new("input").id("q").rect(0.0, 0.0, 200.0, 30.0));
        page.user_click(input);
        page.clear_events();
        let synth = synthesizer(page.clone());

        let result = synth
            .perform(&ActionRequest::new(ActionType::Keypress), &ElementRegistry::new())
            .await;
        assert!(result.ok);
        assert_eq!(result.data["submitted"], json!(false));
        assert_eq!(page.events_for(input), vec!["keydown:Enter", "keyup:Enter"]);
    }

    #[tokio::test]
    async fn test_attach_file() {
        let page = Arc::new(MemoryPage::new("https://example.com", "t", 1000.0, 800.0));
        let upload = page.append(
            page.body(),
            ElementSpec::new("input").id("upload").input_type("file").rect(0.0, 0.0, 200.0, 30.0),
        );
        page.append(page.body(), ElementSpec::new("input").id("name").rect(0.0, 40.0, 200.0, 30.0));
        let synth = synthesizer(page.clone());
        let registry = ElementRegistry::new();
        let attach = |target: &str| {
            ActionRequest::new(ActionType::AttachFile)
                .target(target)
                .args(json!({"base64": "aGVsbG8=", "name": "hello.txt"}))
        };

        let result = synth.perform(&attach("#upload"), &registry).await;
        assert!(result.ok, "{}", result.message);
        assert_eq!(result.data["fileName"], json!("hello.txt"));
        assert_eq!(result.data["fileSize"], json!(5));
        assert_eq!(page.files_of(upload), vec!["hello.txt".to_string()]);
        assert_eq!(page.events_for(upload), vec!["input", "change"]);

        let result = synth.perform(&attach("#name"), &registry).await;
        assert!(!result.ok);
        assert!(result.message.contains("not a file input"), "{}", result.message);

        page.set_file_transfer_supported(false);
        let result = synth.perform(&attach("#upload"), &registry).await;
        assert!(!result.ok);
        assert!(result.message.contains("transfer"), "{}", result.message);
    }

    #[tokio::test]
    async fn test_missing_target_is_malformed() {
        let page = Arc::new(MemoryPage::new("https://example.com", "t", 1000.0, 800.0));
        let synth = synthesizer(page);
        let result = synth
            .perform(&ActionRequest::new(ActionType::Click), &ElementRegistry::new())
            .await;
        assert!(!result.ok);
        assert!(result.message.contains("missing target"));
    }
}
