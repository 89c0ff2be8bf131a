use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Target not found: element id {0} is unknown or stale (ids are only valid for the latest snapshot)")]
    StaleElementId(String),

    #[error("No element at ({x}, {y})")]
    NoElementAtPoint { x: i64, y: i64 },

    #[error("Target is not editable: {0}")]
    NotEditable(String),

    #[error("Target is not a file input: {0}")]
    NotFileInput(String),

    #[error("File transfer is not available in this page: {0}")]
    TransferUnavailable(String),

    #[error("Invalid base64 payload: {0}")]
    InvalidPayload(String),

    #[error("Empty file payload")]
    EmptyPayload,

    #[error("Failed to fetch asset: {0}")]
    Fetch(String),

    #[error("Failed to decode asset: {0}")]
    Decode(String),

    #[error("Host error: {0}")]
    Host(#[from] crate::host::HostError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
