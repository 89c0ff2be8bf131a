//! In-process page model.
//!
//! A small document tree with layout boxes, computed style, focus, forms and
//! listeners. It answers every [`PageHost`] call the way a browser would for
//! the same tree, records the DOM events the agent dispatches, and can
//! simulate a human using the page (`user_*`) so the recorder sees real input.

use super::selector::{ElementTree, Selector};
use super::{
    ActivationMethod, ComputedStyle, CursorFrame, DomEvent, ElementFacts, FetchedAsset,
    FileAssignment, FilePayload, HostError, HostResult, KeyPhase, NodeHandle, PageGeometry,
    PageHost, PathSegment, Point, PointerPhase, RawEventKind, RawPageEvent, Rect,
};
use crate::agent::indicator::IndicatorView;
use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

const HTML: usize = 0;
const BODY: usize = 1;

/// Declarative description of an element to append.
#[derive(Debug, Clone)]
pub struct ElementSpec {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    value: String,
    rect: Rect,
    style: ComputedStyle,
    disabled: bool,
    content_editable: bool,
    native_click: bool,
}

impl ElementSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            text: String::new(),
            value: String::new(),
            rect: Rect::default(),
            style: ComputedStyle::default(),
            disabled: false,
            content_editable: false,
            native_click: true,
        }
    }

    pub fn id(self, id: &str) -> Self {
        self.attr("id", id)
    }

    pub fn class(mut self, class: &str) -> Self {
        let classes = match self.attrs.get("class") {
            Some(existing) if !existing.is_empty() => format!("{} {}", existing, class),
            _ => class.to_string(),
        };
        self.attrs.insert("class".to_string(), classes);
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn input_type(self, kind: &str) -> Self {
        self.attr("type", kind)
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    /// Box in document coordinates
    pub fn rect(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.rect = Rect::new(x, y, width, height);
        self
    }

    pub fn display_none(mut self) -> Self {
        self.style.display = "none".to_string();
        self
    }

    pub fn visibility_hidden(mut self) -> Self {
        self.style.visibility = "hidden".to_string();
        self
    }

    pub fn opacity(mut self, opacity: f64) -> Self {
        self.style.opacity = opacity;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn editable(mut self) -> Self {
        self.content_editable = true;
        self
    }

    /// Element without an `HTMLElement.click()` (e.g. SVG content)
    pub fn without_native_click(mut self) -> Self {
        self.native_click = false;
        self
    }
}

/// One DOM event the page observed, in dispatch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub node: Option<NodeHandle>,
    pub kind: String,
}

#[derive(Debug, Clone)]
struct NodeData {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    value: String,
    rect: Rect,
    style: ComputedStyle,
    disabled: bool,
    content_editable: bool,
    native_click: bool,
    files: Vec<String>,
    parent: Option<usize>,
    children: Vec<usize>,
    attached: bool,
}

impl NodeData {
    fn from_spec(spec: ElementSpec, parent: Option<usize>) -> Self {
        Self {
            tag: spec.tag,
            attrs: spec.attrs,
            text: spec.text,
            value: spec.value,
            rect: spec.rect,
            style: spec.style,
            disabled: spec.disabled,
            content_editable: spec.content_editable,
            native_click: spec.native_click,
            files: Vec::new(),
            parent,
            children: Vec::new(),
            attached: true,
        }
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(|s| s.as_str())
    }

    fn non_empty_attr(&self, name: &str) -> Option<String> {
        self.attr(name)
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.to_string())
    }

    fn classes(&self) -> Vec<String> {
        self.attr("class")
            .map(|c| c.split_whitespace().map(|s| s.to_string()).collect())
            .unwrap_or_default()
    }

    fn is_form_field(&self) -> bool {
        matches!(self.tag.as_str(), "input" | "textarea" | "select")
    }

    /// Password and hidden inputs never report their value
    fn conceals_value(&self) -> bool {
        self.tag == "input"
            && self
                .attr("type")
                .is_some_and(|t| t.eq_ignore_ascii_case("password") || t.eq_ignore_ascii_case("hidden"))
    }

    fn is_file_input(&self) -> bool {
        self.tag == "input" && self.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("file"))
    }
}

struct PageModel {
    url: String,
    title: String,
    viewport_width: f64,
    viewport_height: f64,
    scroll_x: f64,
    scroll_y: f64,
    content_height: Option<f64>,
    nodes: Vec<NodeData>,
    focused: Option<usize>,
    installed: bool,
    overlay_installs: usize,
    cursor_frames: Vec<CursorFrame>,
    indicator: Option<IndicatorView>,
    log: Vec<EventRecord>,
    listener: Option<mpsc::UnboundedSender<RawPageEvent>>,
    listen_keys: Vec<String>,
    assets: HashMap<String, FetchedAsset>,
    file_transfer: bool,
}

impl ElementTree for PageModel {
    type Id = usize;

    fn parent_element(&self, id: usize) -> Option<usize> {
        self.nodes[id].parent
    }

    fn tag_name(&self, id: usize) -> &str {
        &self.nodes[id].tag
    }

    fn element_id(&self, id: usize) -> Option<&str> {
        self.nodes[id].attr("id")
    }

    fn has_class(&self, id: usize, class: &str) -> bool {
        self.nodes[id]
            .attr("class")
            .is_some_and(|c| c.split_whitespace().any(|x| x == class))
    }

    fn nth_of_type(&self, id: usize) -> usize {
        self.same_tag_position(id).0
    }
}

impl PageModel {
    fn node(&self, handle: NodeHandle) -> HostResult<usize> {
        let index = handle.0 as usize;
        match self.nodes.get(index) {
            Some(node) if node.attached => Ok(index),
            Some(_) => Err(HostError(format!("node {} is detached", handle.0))),
            None => Err(HostError(format!("unknown node {}", handle.0))),
        }
    }

    fn document_order(&self) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack = vec![HTML];
        while let Some(index) = stack.pop() {
            order.push(index);
            for &child in self.nodes[index].children.iter().rev() {
                if self.nodes[child].attached {
                    stack.push(child);
                }
            }
        }
        order
    }

    fn ancestors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.nodes[index].parent, move |&i| self.nodes[i].parent)
    }

    /// (1-based index, count) among attached same-tag siblings
    fn same_tag_position(&self, index: usize) -> (usize, usize) {
        let Some(parent) = self.nodes[index].parent else {
            return (1, 1);
        };
        let tag = &self.nodes[index].tag;
        let siblings: Vec<usize> = self.nodes[parent]
            .children
            .iter()
            .copied()
            .filter(|&c| self.nodes[c].attached && &self.nodes[c].tag == tag)
            .collect();
        let position = siblings.iter().position(|&c| c == index).unwrap_or(0) + 1;
        (position, siblings.len())
    }

    fn effective_style(&self, index: usize) -> ComputedStyle {
        let own = &self.nodes[index].style;
        let mut style = own.clone();
        for ancestor in self.ancestors(index) {
            let a = &self.nodes[ancestor].style;
            if a.display == "none" {
                style.display = "none".to_string();
            }
            if a.visibility != "visible" && own.visibility == "visible" {
                style.visibility = a.visibility.clone();
            }
        }
        style
    }

    fn ancestor_opacity(&self, index: usize) -> f64 {
        self.ancestors(index)
            .map(|a| self.nodes[a].style.opacity)
            .product()
    }

    fn is_rendered(&self, index: usize) -> bool {
        self.effective_style(index).display != "none"
    }

    fn viewport_rect(&self, index: usize) -> Rect {
        if !self.is_rendered(index) {
            return Rect::default();
        }
        let r = self.nodes[index].rect;
        Rect::new(r.x - self.scroll_x, r.y - self.scroll_y, r.width, r.height)
    }

    fn inner_text(&self, index: usize) -> String {
        if !self.is_rendered(index) {
            return String::new();
        }
        let node = &self.nodes[index];
        let mut parts = Vec::new();
        if !node.text.trim().is_empty() {
            parts.push(node.text.trim().to_string());
        }
        for &child in &node.children {
            let child_node = &self.nodes[child];
            if !child_node.attached || child_node.style.display == "none" {
                continue;
            }
            let text = self.inner_text(child);
            if !text.is_empty() {
                parts.push(text);
            }
        }
        parts.join(" ")
    }

    fn is_interactive(&self, index: usize) -> bool {
        let node = &self.nodes[index];
        match node.tag.as_str() {
            "a" if node.attr("href").is_some() => return true,
            "button" | "input" | "select" | "textarea" => return true,
            _ => {}
        }
        if matches!(node.attr("role"), Some("button") | Some("link")) {
            return true;
        }
        if node.content_editable || matches!(node.attr("contenteditable"), Some("") | Some("true"))
        {
            return true;
        }
        node.attr("tabindex").is_some_and(|t| t.trim() != "-1")
    }

    fn is_focusable(&self, index: usize) -> bool {
        let node = &self.nodes[index];
        if node.disabled || !self.is_rendered(index) {
            return false;
        }
        self.is_interactive(index)
    }

    fn labelled_by_text(&self, index: usize) -> Option<String> {
        let node = &self.nodes[index];
        if let Some(ids) = node.attr("aria-labelledby") {
            let text: Vec<String> = ids
                .split_whitespace()
                .filter_map(|id| self.find_by_id(id))
                .map(|i| self.inner_text(i))
                .filter(|t| !t.is_empty())
                .collect();
            if !text.is_empty() {
                return Some(text.join(" "));
            }
        }
        if let Some(id) = node.attr("id") {
            let label = self.document_order().into_iter().find(|&i| {
                self.nodes[i].tag == "label" && self.nodes[i].attr("for") == Some(id)
            });
            if let Some(label) = label {
                return Some(self.inner_text(label)).filter(|t| !t.is_empty());
            }
        }
        self.ancestors(index)
            .find(|&a| self.nodes[a].tag == "label")
            .map(|label| self.inner_text(label))
            .filter(|t| !t.is_empty())
    }

    fn find_by_id(&self, id: &str) -> Option<usize> {
        self.document_order()
            .into_iter()
            .find(|&i| self.nodes[i].attr("id") == Some(id))
    }

    fn facts(&self, index: usize) -> ElementFacts {
        let node = &self.nodes[index];
        let mut style = self.effective_style(index);
        style.opacity *= self.ancestor_opacity(index);

        let mut ancestry = Vec::new();
        let mut current = Some(index);
        while let Some(i) = current {
            let n = &self.nodes[i];
            let (same_tag_index, same_tag_count) = self.same_tag_position(i);
            ancestry.push(PathSegment {
                tag: n.tag.clone(),
                id: n.non_empty_attr("id"),
                classes: n.classes(),
                same_tag_index,
                same_tag_count,
            });
            current = n.parent;
        }

        let (text, value) = if node.conceals_value() {
            (String::new(), None)
        } else if node.is_form_field() {
            (String::new(), Some(node.value.clone()))
        } else {
            (self.inner_text(index), None)
        };

        ElementFacts {
            handle: NodeHandle(index as u64),
            tag: node.tag.clone(),
            id: node.non_empty_attr("id"),
            classes: node.classes(),
            input_type: if node.tag == "input" {
                Some(node.attr("type").unwrap_or("text").to_ascii_lowercase())
            } else {
                None
            },
            role: node.non_empty_attr("role"),
            name: node.non_empty_attr("name"),
            title: node.non_empty_attr("title"),
            aria_label: node.non_empty_attr("aria-label"),
            labelled_by_text: self.labelled_by_text(index),
            placeholder: node.non_empty_attr("placeholder"),
            value,
            text,
            href: node.non_empty_attr("href"),
            accept: node.non_empty_attr("accept"),
            multiple: node.attr("multiple").is_some(),
            file_count: node.files.len(),
            rect: self.viewport_rect(index),
            style,
            disabled: node.disabled,
            content_editable: node.content_editable
                || matches!(node.attr("contenteditable"), Some("") | Some("true")),
            has_native_click: node.native_click,
            ancestry,
        }
    }

    fn geometry(&self) -> PageGeometry {
        let content_bottom = self
            .nodes
            .iter()
            .filter(|n| n.attached)
            .map(|n| n.rect.y + n.rect.height)
            .fold(0.0_f64, f64::max);
        let scroll_height = self
            .content_height
            .unwrap_or(content_bottom)
            .max(self.viewport_height);
        PageGeometry {
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            scroll_x: self.scroll_x,
            scroll_y: self.scroll_y,
            scroll_height,
        }
    }

    fn set_scroll_y(&mut self, y: f64) {
        let max = self.geometry().max_scroll_y();
        self.scroll_y = y.clamp(0.0, max);
    }

    fn record(&mut self, node: Option<usize>, kind: impl Into<String>) {
        self.log.push(EventRecord {
            node: node.map(|i| NodeHandle(i as u64)),
            kind: kind.into(),
        });
    }

    /// Deliver to the capturing listeners, if attached
    fn notify(&mut self, kind: RawEventKind) {
        if let Some(tx) = &self.listener {
            let event = RawPageEvent {
                url: self.url.clone(),
                kind,
            };
            if tx.send(event).is_err() {
                self.listener = None;
            }
        }
    }

    fn click(&mut self, index: usize, kind: &str) {
        self.record(Some(index), kind);
        let target = self.facts(index);
        self.notify(RawEventKind::Click {
            target: Some(target),
        });
    }

    fn fire(&mut self, index: usize, event: DomEvent) {
        match event {
            DomEvent::Input => {
                self.record(Some(index), "input");
                if !self.nodes[index].conceals_value() {
                    let target = self.facts(index);
                    self.notify(RawEventKind::Input { target });
                }
            }
            DomEvent::Change => {
                self.record(Some(index), "change");
                let target = self.facts(index);
                self.notify(RawEventKind::Change { target });
            }
        }
    }

    fn key(&mut self, index: Option<usize>, key: &str, phase: KeyPhase) {
        match phase {
            KeyPhase::Down => {
                self.record(index, format!("keydown:{}", key));
                if !self.listen_keys.iter().any(|k| k == key) {
                    return;
                }
                let target = index.map(|i| self.facts(i));
                self.notify(RawEventKind::KeyDown {
                    key: key.to_string(),
                    target,
                });
            }
            KeyPhase::Up => self.record(index, format!("keyup:{}", key)),
        }
    }
}

/// In-process [`PageHost`].
pub struct MemoryPage {
    key: String,
    model: Mutex<PageModel>,
}

impl MemoryPage {
    /// Empty document (`html > body`) with the given viewport.
    pub fn new(url: &str, title: &str, viewport_width: f64, viewport_height: f64) -> Self {
        let html = NodeData::from_spec(ElementSpec::new("html"), None);
        let body = NodeData::from_spec(ElementSpec::new("body"), Some(HTML));
        let mut nodes = vec![html, body];
        nodes[HTML].children.push(BODY);

        Self {
            key: uuid::Uuid::new_v4().to_string(),
            model: Mutex::new(PageModel {
                url: url.to_string(),
                title: title.to_string(),
                viewport_width,
                viewport_height,
                scroll_x: 0.0,
                scroll_y: 0.0,
                content_height: None,
                nodes,
                focused: None,
                installed: false,
                overlay_installs: 0,
                cursor_frames: Vec::new(),
                indicator: None,
                log: Vec::new(),
                listener: None,
                listen_keys: Vec::new(),
                assets: HashMap::new(),
                file_transfer: true,
            }),
        }
    }

    pub fn body(&self) -> NodeHandle {
        NodeHandle(BODY as u64)
    }

    pub fn append(&self, parent: NodeHandle, spec: ElementSpec) -> NodeHandle {
        let mut model = self.model.lock();
        let parent = parent.0 as usize;
        let index = model.nodes.len();
        model.nodes.push(NodeData::from_spec(spec, Some(parent)));
        model.nodes[parent].children.push(index);
        NodeHandle(index as u64)
    }

    /// Detach a subtree; its handles stay invalid afterwards
    pub fn remove(&self, node: NodeHandle) {
        let mut model = self.model.lock();
        let index = node.0 as usize;
        if index <= BODY || index >= model.nodes.len() {
            return;
        }
        if let Some(parent) = model.nodes[index].parent {
            model.nodes[parent].children.retain(|&c| c != index);
        }
        let mut stack = vec![index];
        while let Some(i) = stack.pop() {
            model.nodes[i].attached = false;
            stack.extend(model.nodes[i].children.clone());
        }
        if model.focused.is_some_and(|f| !model.nodes[f].attached) {
            model.focused = None;
        }
    }

    pub fn set_title(&self, title: &str) {
        self.model.lock().title = title.to_string();
    }

    pub fn set_text(&self, node: NodeHandle, text: &str) {
        self.model.lock().nodes[node.0 as usize].text = text.to_string();
    }

    pub fn set_content_height(&self, height: f64) {
        self.model.lock().content_height = Some(height);
    }

    pub fn set_file_transfer_supported(&self, supported: bool) {
        self.model.lock().file_transfer = supported;
    }

    pub fn register_asset(&self, url: &str, status: u16, content_type: Option<&str>, bytes: &[u8]) {
        self.model.lock().assets.insert(
            url.to_string(),
            FetchedAsset {
                status,
                content_type: content_type.map(|s| s.to_string()),
                encoded: base64::engine::general_purpose::STANDARD.encode(bytes),
            },
        );
    }

    /// Register a response whose body is not valid base64 once it leaves the page
    pub fn register_corrupt_asset(&self, url: &str) {
        self.model.lock().assets.insert(
            url.to_string(),
            FetchedAsset {
                status: 200,
                content_type: None,
                encoded: "%%not-base64%%".to_string(),
            },
        );
    }

    // ---------------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------------

    pub fn events(&self) -> Vec<EventRecord> {
        self.model.lock().log.clone()
    }

    pub fn events_for(&self, node: NodeHandle) -> Vec<String> {
        self.model
            .lock()
            .log
            .iter()
            .filter(|e| e.node == Some(node))
            .map(|e| e.kind.clone())
            .collect()
    }

    pub fn clear_events(&self) {
        self.model.lock().log.clear();
    }

    pub fn value_of(&self, node: NodeHandle) -> String {
        self.model.lock().nodes[node.0 as usize].value.clone()
    }

    pub fn text_of(&self, node: NodeHandle) -> String {
        self.model.lock().nodes[node.0 as usize].text.clone()
    }

    pub fn files_of(&self, node: NodeHandle) -> Vec<String> {
        self.model.lock().nodes[node.0 as usize].files.clone()
    }

    pub fn scroll_y(&self) -> f64 {
        self.model.lock().scroll_y
    }

    pub fn focused_node(&self) -> Option<NodeHandle> {
        self.model.lock().focused.map(|i| NodeHandle(i as u64))
    }

    pub fn cursor(&self) -> Option<CursorFrame> {
        self.model.lock().cursor_frames.last().copied()
    }

    pub fn cursor_frames(&self) -> Vec<CursorFrame> {
        self.model.lock().cursor_frames.clone()
    }

    pub fn indicator(&self) -> Option<IndicatorView> {
        self.model.lock().indicator.clone()
    }

    pub fn overlay_installs(&self) -> usize {
        self.model.lock().overlay_installs
    }

    pub fn is_listening(&self) -> bool {
        self.model.lock().listener.is_some()
    }

    // ---------------------------------------------------------------------
    // Human input
    // ---------------------------------------------------------------------

    pub fn user_click(&self, node: NodeHandle) {
        let mut model = self.model.lock();
        let index = node.0 as usize;
        if model.is_focusable(index) {
            model.focused = Some(index);
        }
        model.click(index, "click");
    }

    pub fn user_type(&self, node: NodeHandle, text: &str) {
        let mut model = self.model.lock();
        let index = node.0 as usize;
        model.focused = Some(index);
        if model.nodes[index].is_form_field() {
            model.nodes[index].value = text.to_string();
        } else {
            model.nodes[index].text = text.to_string();
        }
        model.fire(index, DomEvent::Input);
    }

    pub fn user_select_files(&self, node: NodeHandle, names: &[&str]) {
        let mut model = self.model.lock();
        let index = node.0 as usize;
        model.nodes[index].files = names.iter().map(|n| n.to_string()).collect();
        model.fire(index, DomEvent::Input);
        model.fire(index, DomEvent::Change);
    }

    /// Key press at the focused element
    pub fn user_key(&self, key: &str) {
        let mut model = self.model.lock();
        let focused = model.focused;
        model.key(focused, key, KeyPhase::Down);
        model.key(focused, key, KeyPhase::Up);
    }

    pub fn user_scroll_to(&self, y: f64) {
        let mut model = self.model.lock();
        model.set_scroll_y(y);
        let scroll_y = model.scroll_y;
        model.notify(RawEventKind::Scroll { scroll_y });
    }

    /// In-page route change: the URL changes without a document load
    pub fn navigate(&self, url: &str) {
        self.model.lock().url = url.to_string();
    }
}

#[async_trait]
impl PageHost for MemoryPage {
    fn page_key(&self) -> String {
        self.key.clone()
    }

    async fn claim_install(&self) -> HostResult<bool> {
        let mut model = self.model.lock();
        if model.installed {
            return Ok(false);
        }
        model.installed = true;
        Ok(true)
    }

    async fn url(&self) -> HostResult<String> {
        Ok(self.model.lock().url.clone())
    }

    async fn title(&self) -> HostResult<String> {
        Ok(self.model.lock().title.clone())
    }

    async fn geometry(&self) -> HostResult<PageGeometry> {
        Ok(self.model.lock().geometry())
    }

    async fn visible_text(&self) -> HostResult<String> {
        Ok(self.model.lock().inner_text(BODY))
    }

    async fn interactive_elements(&self) -> HostResult<Vec<ElementFacts>> {
        let model = self.model.lock();
        Ok(model
            .document_order()
            .into_iter()
            .filter(|&i| model.is_interactive(i))
            .map(|i| model.facts(i))
            .collect())
    }

    async fn describe(&self, node: NodeHandle) -> HostResult<Option<ElementFacts>> {
        let model = self.model.lock();
        Ok(model.node(node).ok().map(|i| model.facts(i)))
    }

    async fn query(&self, address: &str) -> HostResult<Option<NodeHandle>> {
        let selector = Selector::parse(address).map_err(|e| HostError(e.to_string()))?;
        let model = self.model.lock();
        Ok(model
            .document_order()
            .into_iter()
            .find(|&i| selector.matches(&*model, i))
            .map(|i| NodeHandle(i as u64)))
    }

    async fn element_at(&self, point: Point) -> HostResult<Option<NodeHandle>> {
        let model = self.model.lock();
        let hit = model
            .document_order()
            .into_iter()
            .filter(|&i| {
                let style = model.effective_style(i);
                style.visibility == "visible" && model.viewport_rect(i).contains(point)
            })
            .last();
        Ok(hit.map(|i| NodeHandle(i as u64)))
    }

    async fn scroll_by(&self, dy: f64, _smooth: bool) -> HostResult<()> {
        let mut model = self.model.lock();
        let target = model.scroll_y + dy;
        model.set_scroll_y(target);
        let scroll_y = model.scroll_y;
        model.notify(RawEventKind::Scroll { scroll_y });
        Ok(())
    }

    async fn scroll_into_view(&self, node: NodeHandle) -> HostResult<()> {
        let mut model = self.model.lock();
        let index = model.node(node)?;
        let rect = model.nodes[index].rect;
        let target = rect.y + rect.height / 2.0 - model.viewport_height / 2.0;
        let before = model.scroll_y;
        model.set_scroll_y(target);
        if model.scroll_y != before {
            let scroll_y = model.scroll_y;
            model.notify(RawEventKind::Scroll { scroll_y });
        }
        Ok(())
    }

    async fn dispatch_pointer(
        &self,
        node: NodeHandle,
        phase: PointerPhase,
        _point: Point,
    ) -> HostResult<()> {
        let mut model = self.model.lock();
        let index = model.node(node)?;
        let (pointer, mouse) = match phase {
            PointerPhase::Move => ("pointermove", "mousemove"),
            PointerPhase::Down => ("pointerdown", "mousedown"),
            PointerPhase::Up => ("pointerup", "mouseup"),
        };
        model.record(Some(index), pointer);
        model.record(Some(index), mouse);
        Ok(())
    }

    async fn focus(&self, node: NodeHandle) -> HostResult<bool> {
        let mut model = self.model.lock();
        let index = model.node(node)?;
        if !model.is_focusable(index) {
            return Ok(false);
        }
        model.focused = Some(index);
        model.record(Some(index), "focus");
        Ok(true)
    }

    async fn focused(&self) -> HostResult<Option<NodeHandle>> {
        Ok(self.focused_node())
    }

    async fn activate(&self, node: NodeHandle) -> HostResult<ActivationMethod> {
        let mut model = self.model.lock();
        let index = model.node(node)?;
        if model.nodes[index].native_click {
            model.click(index, "click");
            Ok(ActivationMethod::Native)
        } else {
            model.click(index, "click:synthetic");
            Ok(ActivationMethod::Synthetic)
        }
    }

    async fn set_value(&self, node: NodeHandle, value: &str) -> HostResult<()> {
        let mut model = self.model.lock();
        let index = model.node(node)?;
        model.nodes[index].value = value.to_string();
        Ok(())
    }

    async fn set_text_content(&self, node: NodeHandle, text: &str) -> HostResult<()> {
        let mut model = self.model.lock();
        let index = model.node(node)?;
        model.nodes[index].text = text.to_string();
        let children = std::mem::take(&mut model.nodes[index].children);
        for child in children {
            model.nodes[child].attached = false;
        }
        Ok(())
    }

    async fn dispatch_event(&self, node: NodeHandle, event: DomEvent) -> HostResult<()> {
        let mut model = self.model.lock();
        let index = model.node(node)?;
        model.fire(index, event);
        Ok(())
    }

    async fn dispatch_key(
        &self,
        node: Option<NodeHandle>,
        key: &str,
        phase: KeyPhase,
    ) -> HostResult<()> {
        let mut model = self.model.lock();
        let index = match node {
            Some(n) => Some(model.node(n)?),
            None => None,
        };
        model.key(index, key, phase);
        Ok(())
    }

    async fn owning_form(&self, node: NodeHandle) -> HostResult<Option<NodeHandle>> {
        let model = self.model.lock();
        let index = model.node(node)?;
        if model.nodes[index].tag == "form" {
            return Ok(Some(node));
        }
        let form = model
            .ancestors(index)
            .find(|&a| model.nodes[a].tag == "form")
            .map(|a| NodeHandle(a as u64));
        Ok(form)
    }

    async fn request_submit(&self, form: NodeHandle) -> HostResult<()> {
        let mut model = self.model.lock();
        let index = model.node(form)?;
        model.record(Some(index), "submit");
        Ok(())
    }

    async fn assign_files(
        &self,
        node: NodeHandle,
        files: &[FilePayload],
    ) -> HostResult<FileAssignment> {
        let mut model = self.model.lock();
        let index = model.node(node)?;
        if !model.file_transfer {
            return Ok(FileAssignment::Unsupported(
                "DataTransfer is not constructible".to_string(),
            ));
        }
        model.nodes[index].files = files.iter().map(|f| f.name.clone()).collect();
        Ok(FileAssignment::Assigned)
    }

    async fn fetch_asset(&self, url: &str) -> HostResult<FetchedAsset> {
        self.model
            .lock()
            .assets
            .get(url)
            .cloned()
            .ok_or_else(|| HostError(format!("TypeError: Failed to fetch {}", url)))
    }

    async fn install_overlays(&self) -> HostResult<()> {
        self.model.lock().overlay_installs += 1;
        Ok(())
    }

    async fn render_cursor(&self, frame: CursorFrame) -> HostResult<()> {
        self.model.lock().cursor_frames.push(frame);
        Ok(())
    }

    async fn render_indicator(&self, view: &IndicatorView) -> HostResult<()> {
        self.model.lock().indicator = Some(view.clone());
        Ok(())
    }

    async fn attach_listeners(
        &self,
        keys: &[String],
    ) -> HostResult<mpsc::UnboundedReceiver<RawPageEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut model = self.model.lock();
        model.listener = Some(tx);
        model.listen_keys = keys.to_vec();
        Ok(rx)
    }

    async fn detach_listeners(&self) -> HostResult<()> {
        self.model.lock().listener = None;
        Ok(())
    }
}
