pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod host;

pub use agent::{AgentSessions, EventEmitter, PageAgent};
pub use config::AgentConfig;
pub use error::{AgentError, Result};
pub use host::{CdpPage, MemoryPage, PageHost};
