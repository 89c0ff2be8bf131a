//! Interaction Recorder.
//!
//! [`RecordingSession`] turns raw page events into [`RecordedEvent`]s and is
//! pure (time is passed in). [`Recorder`] owns the live part: the listener
//! channel from the host, the URL poll timer and the scroll debounce timer.

use crate::agent::emitter::EventEmitter;
use crate::agent::locator::{collapse_whitespace, truncate_chars, Locator};
use crate::agent::types::{now_ms, RecordedEvent, RecordedKind};
use crate::config::RecorderConfig;
use crate::error::Result;
use crate::host::{ElementFacts, PageHost, RawEventKind, RawPageEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
struct PendingScroll {
    scroll_y: f64,
    at: u64,
    url: String,
}

/// Per-recording state, reset by every start.
#[derive(Debug)]
pub struct RecordingSession {
    recording_id: String,
    started_at: u64,
    last_url: String,
    last_scroll_y: f64,
    pending_scroll: Option<PendingScroll>,
    config: RecorderConfig,
    locator: Locator,
}

impl RecordingSession {
    pub fn new(
        recording_id: &str,
        url: &str,
        scroll_y: f64,
        now: u64,
        config: RecorderConfig,
        locator: Locator,
    ) -> Self {
        Self {
            recording_id: recording_id.to_string(),
            started_at: now,
            last_url: url.to_string(),
            last_scroll_y: scroll_y,
            pending_scroll: None,
            config,
            locator,
        }
    }

    pub fn recording_id(&self) -> &str {
        &self.recording_id
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    /// Normalize one raw event. A pending scroll is flushed first so the
    /// stream keeps page order.
    pub fn ingest(&mut self, event: RawPageEvent, now: u64) -> Vec<RecordedEvent> {
        if let RawEventKind::Scroll { scroll_y } = event.kind {
            self.pending_scroll = Some(PendingScroll {
                scroll_y,
                at: now,
                url: event.url,
            });
            return Vec::new();
        }

        let mut out = Vec::new();
        out.extend(self.flush_scroll(now));
        if let Some(kind) = self.normalize(event.kind) {
            out.push(self.event(event.url, now, kind));
        }
        out
    }

    /// URL poll tick; emits `navigate` when the URL moved
    pub fn observe_url(&mut self, url: &str, now: u64) -> Vec<RecordedEvent> {
        if url == self.last_url {
            return Vec::new();
        }
        let mut out = Vec::new();
        out.extend(self.flush_scroll(now));
        let from = std::mem::replace(&mut self.last_url, url.to_string());
        out.push(self.event(
            url.to_string(),
            now,
            RecordedKind::Navigate { from: Some(from) },
        ));
        out
    }

    /// When the pending scroll becomes due, if any
    pub fn scroll_due_at(&self) -> Option<u64> {
        self.pending_scroll
            .as_ref()
            .map(|p| p.at + self.config.scroll_debounce_ms)
    }

    /// Emit the pending scroll once the stream has been quiet long enough
    pub fn flush_due(&mut self, now: u64) -> Vec<RecordedEvent> {
        match self.scroll_due_at() {
            Some(due) if now >= due => self.flush_scroll(now).into_iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Net delta since the last emitted scroll; below the threshold the
    /// movement is held back and keeps accumulating.
    fn flush_scroll(&mut self, now: u64) -> Option<RecordedEvent> {
        let pending = self.pending_scroll.take()?;
        let dy = pending.scroll_y - self.last_scroll_y;
        if dy.abs() < self.config.scroll_min_px {
            return None;
        }
        self.last_scroll_y = pending.scroll_y;
        Some(self.event(
            pending.url,
            now,
            RecordedKind::Scroll {
                dy,
                scroll_y: pending.scroll_y,
            },
        ))
    }

    fn normalize(&self, kind: RawEventKind) -> Option<RecordedKind> {
        match kind {
            RawEventKind::Click { target } => {
                let target = target?;
                let selector = self.address_or_drop(&target, "click")?;
                let label = self.locator.label(&target);
                Some(RecordedKind::Click {
                    selector,
                    text: Some(label).filter(|l| !l.is_empty()),
                })
            }
            RawEventKind::Input { target } => {
                if target.is_input_type("password")
                    || target.is_input_type("hidden")
                    || target.is_input_type("file")
                {
                    return None;
                }
                let selector = self.address_or_drop(&target, "input")?;
                let raw = match &target.value {
                    Some(value) => value.clone(),
                    None => collapse_whitespace(&target.text),
                };
                Some(RecordedKind::Type {
                    selector,
                    text: truncate_chars(&raw, self.config.text_max_chars),
                    input_type: target.input_type.clone(),
                })
            }
            RawEventKind::Change { target } => {
                if !target.is_input_type("file") {
                    return None;
                }
                let selector = self.address_or_drop(&target, "file selection")?;
                Some(RecordedKind::FileSelect {
                    selector,
                    file_count: target.file_count,
                    accept: target.accept.clone(),
                    multiple: target.multiple,
                })
            }
            RawEventKind::KeyDown { key, target } => {
                if !self.config.key_allow_list.iter().any(|k| k == &key) {
                    return None;
                }
                Some(RecordedKind::Keypress {
                    key,
                    selector: target.and_then(|t| self.locator.address(&t)),
                })
            }
            RawEventKind::Scroll { .. } => None,
        }
    }

    fn address_or_drop(&self, target: &ElementFacts, what: &str) -> Option<String> {
        let address = self.locator.address(target);
        if address.is_none() {
            tracing::debug!("Dropping {} on <{}>: no structural address", what, target.tag);
        }
        address
    }

    fn event(&self, url: String, at: u64, kind: RecordedKind) -> RecordedEvent {
        RecordedEvent {
            recording_id: self.recording_id.clone(),
            at,
            url,
            kind,
        }
    }
}

struct ActiveRecording {
    recording_id: String,
    listener_task: JoinHandle<()>,
    poll_task: JoinHandle<()>,
}

/// Owner of the single active recording for a page.
pub struct Recorder {
    host: Arc<dyn PageHost>,
    config: RecorderConfig,
    locator: Locator,
    emitter: EventEmitter,
    active: Option<ActiveRecording>,
}

impl Recorder {
    pub fn new(
        host: Arc<dyn PageHost>,
        config: RecorderConfig,
        locator: Locator,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            host,
            config,
            locator,
            emitter,
            active: None,
        }
    }

    pub fn active_recording(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.recording_id.as_str())
    }

    /// Start a new session, silently stopping any previous one
    pub async fn start(&mut self, recording_id: &str) -> Result<()> {
        self.stop().await;

        let url = self.host.url().await?;
        let scroll_y = self.host.geometry().await?.scroll_y;
        let session = Arc::new(Mutex::new(RecordingSession::new(
            recording_id,
            &url,
            scroll_y,
            now_ms(),
            self.config.clone(),
            self.locator.clone(),
        )));

        let rx = self
            .host
            .attach_listeners(&self.config.key_allow_list)
            .await?;
        let listener_task = tokio::spawn(listen(rx, session.clone(), self.emitter.clone()));
        let poll_task = tokio::spawn(poll_url(
            self.host.clone(),
            session,
            self.emitter.clone(),
            Duration::from_millis(self.config.poll_interval_ms),
        ));

        self.active = Some(ActiveRecording {
            recording_id: recording_id.to_string(),
            listener_task,
            poll_task,
        });
        tracing::info!("Recording {} started on {}", recording_id, url);
        Ok(())
    }

    /// Detach listeners and clear timers. No-op when nothing is active.
    ///
    /// Events the page produced before the listeners came off are still
    /// emitted; a scroll still inside its debounce window is discarded.
    pub async fn stop(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.poll_task.abort();
        let _ = active.poll_task.await;

        match self.host.detach_listeners().await {
            Ok(()) => {
                let _ = active.listener_task.await;
            }
            Err(e) => {
                tracing::warn!("Failed to detach recorder listeners: {}", e);
                active.listener_task.abort();
            }
        }
        tracing::info!("Recording {} stopped", active.recording_id);
    }
}

async fn listen(
    mut rx: mpsc::UnboundedReceiver<RawPageEvent>,
    session: Arc<Mutex<RecordingSession>>,
    emitter: EventEmitter,
) {
    loop {
        let due_in = session
            .lock()
            .scroll_due_at()
            .map(|due| due.saturating_sub(now_ms()));

        let event = match due_in {
            Some(ms) => {
                tokio::select! {
                    event = rx.recv() => event,
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                        let events = session.lock().flush_due(now_ms());
                        events.into_iter().for_each(|e| emitter.emit(e));
                        continue;
                    }
                }
            }
            None => rx.recv().await,
        };

        let Some(event) = event else {
            break;
        };
        let events = session.lock().ingest(event, now_ms());
        events.into_iter().for_each(|e| emitter.emit(e));
    }
}

async fn poll_url(
    host: Arc<dyn PageHost>,
    session: Arc<Mutex<RecordingSession>>,
    emitter: EventEmitter,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let url = match host.url().await {
            Ok(url) => url,
            Err(e) => {
                tracing::debug!("URL poll failed: {}", e);
                continue;
            }
        };
        let events = session.lock().observe_url(&url, now_ms());
        events.into_iter().for_each(|e| emitter.emit(e));
    }
}
