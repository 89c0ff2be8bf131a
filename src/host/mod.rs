//! Page host: everything that has to physically happen inside the live page.
//!
//! The agent logic (ranking, addressing, state machines, recorder
//! normalization) lives in `crate::agent` and talks to the page only through
//! [`PageHost`]. [`MemoryPage`] is an in-process page model; [`CdpPage`]
//! drives a real Chrome tab over the DevTools protocol.

pub mod cdp;
pub mod memory;
pub mod selector;

pub use cdp::CdpPage;
pub use memory::{ElementSpec, EventRecord, MemoryPage};

use crate::agent::indicator::IndicatorView;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Nodes the agent considers interactive. Mirrored by `MemoryPage::is_interactive`.
pub const INTERACTIVE_SELECTOR: &str = "a[href], button, input, select, textarea, \
     [role=\"button\"], [role=\"link\"], [contenteditable=\"\"], [contenteditable=\"true\"], \
     [tabindex]:not([tabindex=\"-1\"])";

/// Failure inside the host (transport, script evaluation, invalid selector).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HostError(pub String);

impl From<String> for HostError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for HostError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

pub type HostResult<T> = std::result::Result<T, HostError>;

/// Opaque page-side node reference, valid while the node stays attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeHandle(pub u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x < self.x + self.width
            && point.y >= self.y
            && point.y < self.y + self.height
    }
}

/// Viewport and scroll geometry, in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageGeometry {
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
    pub scroll_height: f64,
}

impl PageGeometry {
    pub fn max_scroll_y(&self) -> f64 {
        (self.scroll_height - self.viewport_height).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComputedStyle {
    pub display: String,
    pub visibility: String,
    pub opacity: f64,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            display: "block".to_string(),
            visibility: "visible".to_string(),
            opacity: 1.0,
        }
    }
}

/// One level of an element's ancestry, as needed for a structural address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathSegment {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    /// 1-based position among same-tag siblings
    pub same_tag_index: usize,
    pub same_tag_count: usize,
}

/// Raw facts about one element, read from the page in a single pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementFacts {
    pub handle: NodeHandle,
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    pub input_type: Option<String>,
    pub role: Option<String>,
    pub name: Option<String>,
    pub title: Option<String>,
    pub aria_label: Option<String>,
    /// Text of the aria-labelledby targets or the associated `<label>`
    pub labelled_by_text: Option<String>,
    pub placeholder: Option<String>,
    pub value: Option<String>,
    pub text: String,
    pub href: Option<String>,
    pub accept: Option<String>,
    pub multiple: bool,
    pub file_count: usize,
    /// Viewport-relative box
    pub rect: Rect,
    pub style: ComputedStyle,
    pub disabled: bool,
    pub content_editable: bool,
    pub has_native_click: bool,
    /// Element first, then its ancestors
    pub ancestry: Vec<PathSegment>,
}

impl ElementFacts {
    pub fn is_input_type(&self, kind: &str) -> bool {
        self.tag == "input"
            && self
                .input_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case(kind))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerPhase {
    Move,
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPhase {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomEvent {
    Input,
    Change,
}

/// How `activate` clicked the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationMethod {
    Native,
    Synthetic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilePayload {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileAssignment {
    Assigned,
    /// The page context has no usable file-transfer mechanism
    Unsupported(String),
}

/// Response of a credentialed fetch made from the page. The body stays
/// base64-encoded as it crossed the page boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FetchedAsset {
    pub status: u16,
    pub content_type: Option<String>,
    pub encoded: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CursorFrame {
    pub x: f64,
    pub y: f64,
    pub visible: bool,
}

/// A user interaction observed by the capturing listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPageEvent {
    pub url: String,
    #[serde(flatten)]
    pub kind: RawEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawEventKind {
    Click {
        #[serde(default)]
        target: Option<ElementFacts>,
    },
    Input {
        target: ElementFacts,
    },
    Change {
        target: ElementFacts,
    },
    #[serde(rename = "keydown")]
    KeyDown {
        key: String,
        #[serde(default)]
        target: Option<ElementFacts>,
    },
    Scroll {
        #[serde(rename = "scrollY")]
        scroll_y: f64,
    },
}

#[async_trait]
pub trait PageHost: Send + Sync {
    /// Stable key for this page session
    fn page_key(&self) -> String;

    /// Set the page-side installation guard. Returns `true` only for the first caller.
    async fn claim_install(&self) -> HostResult<bool>;

    async fn url(&self) -> HostResult<String>;
    async fn title(&self) -> HostResult<String>;
    async fn geometry(&self) -> HostResult<PageGeometry>;

    /// Raw visible text of the document body
    async fn visible_text(&self) -> HostResult<String>;

    /// Attached nodes matching [`INTERACTIVE_SELECTOR`], in document order
    async fn interactive_elements(&self) -> HostResult<Vec<ElementFacts>>;

    /// Facts for a node, or `None` if it is detached or not an element
    async fn describe(&self, node: NodeHandle) -> HostResult<Option<ElementFacts>>;

    /// First attached element matching a structural address
    async fn query(&self, address: &str) -> HostResult<Option<NodeHandle>>;

    /// Topmost element at a viewport point
    async fn element_at(&self, point: Point) -> HostResult<Option<NodeHandle>>;

    async fn scroll_by(&self, dy: f64, smooth: bool) -> HostResult<()>;

    /// Scroll so the node sits in the vertical center of the viewport
    async fn scroll_into_view(&self, node: NodeHandle) -> HostResult<()>;

    /// Dispatch the pointer and mouse event pair for `phase`
    async fn dispatch_pointer(
        &self,
        node: NodeHandle,
        phase: PointerPhase,
        point: Point,
    ) -> HostResult<()>;

    async fn focus(&self, node: NodeHandle) -> HostResult<bool>;
    async fn focused(&self) -> HostResult<Option<NodeHandle>>;

    /// Native click when the element supports it, synthetic click event otherwise
    async fn activate(&self, node: NodeHandle) -> HostResult<ActivationMethod>;

    async fn set_value(&self, node: NodeHandle, value: &str) -> HostResult<()>;
    async fn set_text_content(&self, node: NodeHandle, text: &str) -> HostResult<()>;
    async fn dispatch_event(&self, node: NodeHandle, event: DomEvent) -> HostResult<()>;

    /// Key event at `node`, or at the document when `None`
    async fn dispatch_key(
        &self,
        node: Option<NodeHandle>,
        key: &str,
        phase: KeyPhase,
    ) -> HostResult<()>;

    /// The node itself if it is a form, otherwise its enclosing form
    async fn owning_form(&self, node: NodeHandle) -> HostResult<Option<NodeHandle>>;
    async fn request_submit(&self, form: NodeHandle) -> HostResult<()>;

    async fn assign_files(
        &self,
        node: NodeHandle,
        files: &[FilePayload],
    ) -> HostResult<FileAssignment>;

    /// Fetch with the page's credentials
    async fn fetch_asset(&self, url: &str) -> HostResult<FetchedAsset>;

    /// Inject overlay styles and nodes
    async fn install_overlays(&self) -> HostResult<()>;
    async fn render_cursor(&self, frame: CursorFrame) -> HostResult<()>;
    async fn render_indicator(&self, view: &IndicatorView) -> HostResult<()>;

    /// Attach capturing listeners. Events flow until [`PageHost::detach_listeners`]
    /// closes the channel; attaching again replaces the previous channel.
    ///
    /// Only keydowns for `keys` are reported. Input events on password and
    /// hidden inputs are never reported, and their facts carry no value.
    async fn attach_listeners(
        &self,
        keys: &[String],
    ) -> HostResult<mpsc::UnboundedReceiver<RawPageEvent>>;
    async fn detach_listeners(&self) -> HostResult<()>;
}
