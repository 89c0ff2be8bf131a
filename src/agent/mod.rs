//! The page agent: locating, snapshotting, acting, recording and dispatch.

pub mod action;
pub mod cursor;
pub mod dispatch;
pub mod emitter;
pub mod indicator;
pub mod locator;
pub mod payload;
pub mod recorder;
pub mod session;
pub mod snapshot;
pub mod target;
pub mod types;

pub use dispatch::PageAgent;
pub use emitter::EventEmitter;
pub use session::AgentSessions;
pub use types::*;
