use crate::error::{AgentError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Perception
// ---------------------------------------------------------------------------

/// Semantic kind of an element, as shown to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Link,
    Button,
    TextInput,
    Textarea,
    Select,
    Checkbox,
    Radio,
    File,
    #[serde(rename = "contenteditable")]
    ContentEditable,
    Generic,
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Link => "link",
            ElementKind::Button => "button",
            ElementKind::TextInput => "text_input",
            ElementKind::Textarea => "textarea",
            ElementKind::Select => "select",
            ElementKind::Checkbox => "checkbox",
            ElementKind::Radio => "radio",
            ElementKind::File => "file",
            ElementKind::ContentEditable => "contenteditable",
            ElementKind::Generic => "generic",
        }
    }
}

/// Integer viewport box
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntRect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl From<crate::host::Rect> for IntRect {
    fn from(rect: crate::host::Rect) -> Self {
        Self {
            x: rect.x.round() as i64,
            y: rect.y.round() as i64,
            width: rect.width.round() as i64,
            height: rect.height.round() as i64,
        }
    }
}

/// One row of the perceived page. Valid only for the snapshot that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    /// Ephemeral handle (`e_N`)
    pub id: String,
    /// Structural address
    pub selector: String,
    pub tag: String,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub label: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    pub rect: IntRect,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollState {
    pub x: f64,
    pub y: f64,
    pub max_y: f64,
    pub at_top: bool,
    pub at_bottom: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub viewport: Viewport,
    pub scroll: ScrollState,
    pub elements: Vec<ElementDescriptor>,
    pub text_snippet: String,
    pub dom_signature: String,
    pub timestamp: u64,
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Scroll,
    ClickAt,
    Click,
    Type,
    Keypress,
    AttachFile,
}

/// Reference to an element in a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    /// `e_<n>` for an ephemeral id, anything else is a structural address
    Reference(String),
    Selector { selector: String },
    Id { id: String },
}

/// A target after deciding which lookup path it takes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRef {
    ElementId(String),
    Address(String),
}

impl Target {
    pub fn to_ref(&self) -> Result<TargetRef> {
        let reference = match self {
            Target::Reference(r) => {
                let r = r.trim();
                if is_element_id(r) {
                    return Ok(TargetRef::ElementId(r.to_string()));
                }
                r
            }
            Target::Selector { selector } => selector.trim(),
            Target::Id { id } => {
                let id = id.trim();
                if !is_element_id(id) {
                    return Err(AgentError::MalformedRequest(format!(
                        "'{}' is not an element id",
                        id
                    )));
                }
                return Ok(TargetRef::ElementId(id.to_string()));
            }
        };
        if reference.is_empty() {
            return Err(AgentError::MalformedRequest("empty target".to_string()));
        }
        Ok(TargetRef::Address(reference.to_string()))
    }
}

fn is_element_id(s: &str) -> bool {
    s.strip_prefix("e_")
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(rename = "type")]
    pub action: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,
    #[serde(default)]
    pub args: Value,
}

impl ActionRequest {
    pub fn new(action: ActionType) -> Self {
        Self {
            action,
            target: None,
            args: Value::Null,
        }
    }

    pub fn target(mut self, target: &str) -> Self {
        self.target = Some(Target::Reference(target.to_string()));
        self
    }

    pub fn args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }

    /// Decode `args` into the shape the action expects; absent args decode as `{}`
    pub fn parse_args<T: DeserializeOwned>(&self) -> Result<T> {
        let args = match &self.args {
            Value::Null => Value::Object(Map::new()),
            other => other.clone(),
        };
        serde_json::from_value(args)
            .map_err(|e| AgentError::MalformedRequest(format!("invalid args: {}", e)))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScrollArgs {
    pub dy: Option<f64>,
}

/// `x`/`y` stay loosely typed: anything that is not a finite number falls back
/// to the viewport center.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClickAtArgs {
    pub x: Option<Value>,
    pub y: Option<Value>,
    pub normalized: bool,
    pub steps: Option<u32>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeArgs {
    pub text: String,
    #[serde(default)]
    pub press_enter: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeypressArgs {
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AttachFileArgs {
    pub base64: Option<String>,
    pub data_url: Option<String>,
    pub url: Option<String>,
    pub name: Option<String>,
    pub mime_type: Option<String>,
}

/// Outcome of one action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub ok: bool,
    pub message: String,
    /// Action-specific fields, flattened into the response
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl ActionResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Inbound request, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentRequest {
    Ping,
    GetPageState,
    PerformAction {
        action: ActionRequest,
    },
    SetRunningIndicator {
        #[serde(default)]
        active: bool,
        #[serde(default)]
        step: u32,
    },
    StartRecording {
        #[serde(rename = "recordingId")]
        recording_id: String,
    },
    StopRecording,
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

/// One normalized user interaction. Emitted, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEvent {
    pub recording_id: String,
    pub at: u64,
    pub url: String,
    #[serde(flatten)]
    pub kind: RecordedKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordedKind {
    Navigate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    Click {
        selector: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Type {
        selector: String,
        text: String,
        #[serde(
            rename = "inputType",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        input_type: Option<String>,
    },
    FileSelect {
        selector: String,
        #[serde(rename = "fileCount")]
        file_count: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accept: Option<String>,
        multiple: bool,
    },
    Keypress {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
    },
    Scroll {
        dy: f64,
        #[serde(rename = "scrollY")]
        scroll_y: f64,
    },
}
