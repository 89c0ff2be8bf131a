//! Virtual Cursor: a visual pointer overlay animated before synthetic clicks.

use crate::config::CursorConfig;
use crate::error::Result;
use crate::host::{CursorFrame, PageHost, Point};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Last known simulated pointer position
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CursorState {
    pub x: f64,
    pub y: f64,
    pub visible: bool,
}

pub struct VirtualCursor {
    host: Arc<dyn PageHost>,
    config: CursorConfig,
    state: Arc<Mutex<CursorState>>,
    /// Bumped by every move; a pending hide only fires if it is still current
    generation: Arc<AtomicU64>,
    overlays_installed: AtomicBool,
}

impl VirtualCursor {
    pub fn new(host: Arc<dyn PageHost>, config: CursorConfig) -> Self {
        Self {
            host,
            config,
            state: Arc::new(Mutex::new(CursorState::default())),
            generation: Arc::new(AtomicU64::new(0)),
            overlays_installed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> CursorState {
        *self.state.lock()
    }

    /// Inject styles and overlay nodes once per page session
    pub async fn ensure_overlays(&self) -> Result<()> {
        if self.overlays_installed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.host.install_overlays().await {
            self.overlays_installed.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }

    /// Clamp caller-supplied animation parameters to the configured limits
    pub fn plan(&self, steps: Option<u32>, duration_ms: Option<u64>) -> (u32, Duration) {
        let steps = steps
            .unwrap_or(self.config.default_steps)
            .clamp(1, self.config.max_steps);
        let duration = duration_ms
            .unwrap_or(self.config.default_duration_ms)
            .min(self.config.max_duration_ms);
        (steps, Duration::from_millis(duration))
    }

    /// Animate from the last position to `target`
    pub async fn move_to(&self, target: Point, steps: u32, duration: Duration) -> Result<()> {
        self.ensure_overlays().await?;
        self.generation.fetch_add(1, Ordering::SeqCst);

        let from = {
            let state = self.state.lock();
            Point::new(state.x, state.y)
        };
        let steps = steps.max(1);
        let pause = duration / steps;
        for step in 1..=steps {
            let point = interpolate(from, target, step as f64 / steps as f64);
            let frame = CursorFrame {
                x: point.x,
                y: point.y,
                visible: true,
            };
            self.host.render_cursor(frame).await?;
            *self.state.lock() = CursorState {
                x: point.x,
                y: point.y,
                visible: true,
            };
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }
        Ok(())
    }

    /// Hide the overlay, keeping the position for the next move
    pub async fn hide(&self) -> Result<()> {
        hide_now(self.host.as_ref(), &self.state).await
    }

    /// Hide after `hide_after_ms` unless another move starts first
    pub async fn hide_later(&self) {
        if self.config.hide_after_ms == 0 {
            if let Err(e) = self.hide().await {
                tracing::warn!("Failed to hide cursor: {}", e);
            }
            return;
        }

        let scheduled = self.generation.load(Ordering::SeqCst);
        let generation = self.generation.clone();
        let host = self.host.clone();
        let state = self.state.clone();
        let delay = Duration::from_millis(self.config.hide_after_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if generation.load(Ordering::SeqCst) != scheduled {
                return;
            }
            if let Err(e) = hide_now(host.as_ref(), &state).await {
                tracing::debug!("Deferred cursor hide failed: {}", e);
            }
        });
    }
}

async fn hide_now(host: &dyn PageHost, state: &Mutex<CursorState>) -> Result<()> {
    let frame = {
        let mut state = state.lock();
        state.visible = false;
        CursorFrame {
            x: state.x,
            y: state.y,
            visible: false,
        }
    };
    host.render_cursor(frame).await?;
    Ok(())
}

/// Linear interpolation on each axis, `t` in `[0, 1]`
pub fn interpolate(from: Point, to: Point, t: f64) -> Point {
    Point::new(from.x + (to.x - from.x) * t, from.y + (to.y - from.y) * t)
}
