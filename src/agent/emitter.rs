//! Outbound push channel for recorded events.
//!
//! Best effort: `emit` may silently drop an event (no subscribers, or a
//! subscriber lagging behind) and never fails or blocks the caller.

use crate::agent::types::RecordedEvent;
use tokio::sync::broadcast;

/// Maximum number of events buffered per subscriber.
const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<RecordedEvent>,
}

impl EventEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: RecordedEvent) {
        tracing::debug!(
            "Recorded {} event for {}",
            event_type(&event),
            event.recording_id
        );
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordedEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

fn event_type(event: &RecordedEvent) -> &'static str {
    use crate::agent::types::RecordedKind::*;
    match event.kind {
        Navigate { .. } => "navigate",
        Click { .. } => "click",
        Type { .. } => "type",
        FileSelect { .. } => "file_select",
        Keypress { .. } => "keypress",
        Scroll { .. } => "scroll",
    }
}
