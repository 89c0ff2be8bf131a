use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    /// Element discovery and addressing
    #[serde(default)]
    pub locator: LocatorConfig,

    /// Page snapshot bounds
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Input synthesis tuning
    #[serde(default)]
    pub input: InputConfig,

    /// Virtual cursor animation
    #[serde(default)]
    pub cursor: CursorConfig,

    /// Interaction recorder
    #[serde(default)]
    pub recorder: RecorderConfig,

    /// DevTools connection used by the binary
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Local HTTP API for the orchestrator
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocatorConfig {
    /// Upper bound on elements in one snapshot
    #[serde(default = "default_max_elements")]
    pub max_elements: usize,

    /// Boxes narrower or shorter than this are treated as invisible
    #[serde(default = "default_min_size_px")]
    pub min_size_px: f64,

    /// Vertical distance within which elements count as one row
    #[serde(default = "default_row_tolerance_px")]
    pub row_tolerance_px: f64,

    /// Levels (element included) walked when building a structural address
    #[serde(default = "default_max_address_depth")]
    pub max_address_depth: usize,

    /// Classes emitted per address level
    #[serde(default = "default_max_classes")]
    pub max_classes: usize,

    #[serde(default = "default_label_max_chars")]
    pub label_max_chars: usize,

    /// Bound for the text/placeholder/ariaLabel fields of a descriptor
    #[serde(default = "default_text_max_chars")]
    pub text_max_chars: usize,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            max_elements: default_max_elements(),
            min_size_px: default_min_size_px(),
            row_tolerance_px: default_row_tolerance_px(),
            max_address_depth: default_max_address_depth(),
            max_classes: default_max_classes(),
            label_max_chars: default_label_max_chars(),
            text_max_chars: default_text_max_chars(),
        }
    }
}

fn default_max_elements() -> usize {
    60
}

fn default_min_size_px() -> f64 {
    3.0
}

fn default_row_tolerance_px() -> f64 {
    8.0
}

fn default_max_address_depth() -> usize {
    6
}

fn default_max_classes() -> usize {
    2
}

fn default_label_max_chars() -> usize {
    80
}

fn default_text_max_chars() -> usize {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotConfig {
    #[serde(default = "default_text_snippet_chars")]
    pub text_snippet_chars: usize,

    /// Prefix of the text snippet folded into the dom signature
    #[serde(default = "default_signature_text_chars")]
    pub signature_text_chars: usize,

    /// Pixel slack for atTop / atBottom
    #[serde(default = "default_edge_tolerance_px")]
    pub edge_tolerance_px: f64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            text_snippet_chars: default_text_snippet_chars(),
            signature_text_chars: default_signature_text_chars(),
            edge_tolerance_px: default_edge_tolerance_px(),
        }
    }
}

fn default_text_snippet_chars() -> usize {
    1600
}

fn default_signature_text_chars() -> usize {
    600
}

fn default_edge_tolerance_px() -> f64 {
    2.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputConfig {
    /// Default scroll distance as a fraction of viewport height
    #[serde(default = "default_scroll_fraction")]
    pub scroll_fraction: f64,

    /// Deltas below this fraction of the default are replaced by the default
    #[serde(default = "default_scroll_noise_fraction")]
    pub scroll_noise_fraction: f64,

    #[serde(default = "default_max_scroll_px")]
    pub max_scroll_px: f64,

    #[serde(default = "default_scroll_settle_ms")]
    pub scroll_settle_ms: u64,

    /// Pause after scrolling a target into view
    #[serde(default = "default_target_settle_ms")]
    pub target_settle_ms: u64,

    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            scroll_fraction: default_scroll_fraction(),
            scroll_noise_fraction: default_scroll_noise_fraction(),
            max_scroll_px: default_max_scroll_px(),
            scroll_settle_ms: default_scroll_settle_ms(),
            target_settle_ms: default_target_settle_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

fn default_scroll_fraction() -> f64 {
    0.82
}

fn default_scroll_noise_fraction() -> f64 {
    0.65
}

fn default_max_scroll_px() -> f64 {
    4000.0
}

fn default_scroll_settle_ms() -> u64 {
    350
}

fn default_target_settle_ms() -> u64 {
    120
}

fn default_fetch_timeout_ms() -> u64 {
    15000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CursorConfig {
    #[serde(default = "default_cursor_steps")]
    pub default_steps: u32,

    #[serde(default = "default_cursor_max_steps")]
    pub max_steps: u32,

    #[serde(default = "default_cursor_duration_ms")]
    pub default_duration_ms: u64,

    #[serde(default = "default_cursor_max_duration_ms")]
    pub max_duration_ms: u64,

    /// Delay before the cursor hides after a click; 0 hides immediately
    #[serde(default = "default_cursor_hide_after_ms")]
    pub hide_after_ms: u64,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            default_steps: default_cursor_steps(),
            max_steps: default_cursor_max_steps(),
            default_duration_ms: default_cursor_duration_ms(),
            max_duration_ms: default_cursor_max_duration_ms(),
            hide_after_ms: default_cursor_hide_after_ms(),
        }
    }
}

fn default_cursor_steps() -> u32 {
    12
}

fn default_cursor_max_steps() -> u32 {
    60
}

fn default_cursor_duration_ms() -> u64 {
    240
}

fn default_cursor_max_duration_ms() -> u64 {
    2000
}

fn default_cursor_hide_after_ms() -> u64 {
    800
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecorderConfig {
    /// URL polling interval for in-page navigation detection
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_scroll_debounce_ms")]
    pub scroll_debounce_ms: u64,

    #[serde(default = "default_scroll_min_px")]
    pub scroll_min_px: f64,

    #[serde(default = "default_recorder_text_max_chars")]
    pub text_max_chars: usize,

    #[serde(default = "default_key_allow_list")]
    pub key_allow_list: Vec<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            scroll_debounce_ms: default_scroll_debounce_ms(),
            scroll_min_px: default_scroll_min_px(),
            text_max_chars: default_recorder_text_max_chars(),
            key_allow_list: default_key_allow_list(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_scroll_debounce_ms() -> u64 {
    250
}

fn default_scroll_min_px() -> f64 {
    120.0
}

fn default_recorder_text_max_chars() -> usize {
    500
}

fn default_key_allow_list() -> Vec<String> {
    [
        "Enter",
        "Tab",
        "Escape",
        "ArrowUp",
        "ArrowDown",
        "ArrowLeft",
        "ArrowRight",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrowserConfig {
    /// Chrome remote debugging port
    #[serde(default = "default_cdp_port")]
    pub cdp_port: u16,

    /// Attach to the first page target whose URL starts with this prefix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_url_prefix: Option<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            cdp_port: default_cdp_port(),
            target_url_prefix: None,
        }
    }
}

fn default_cdp_port() -> u16 {
    9222
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_api_port")]
    pub port: u16,

    /// Required in the X-API-Key header when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_api_port(),
            api_key: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_port() -> u16 {
    38473
}
