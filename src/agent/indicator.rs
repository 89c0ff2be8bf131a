//! Status Indicator state machine. Rendering is the host's job.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorState {
    Idle,
    Running,
    Recording,
    RunningRecording,
}

impl IndicatorState {
    pub fn from_flags(running: bool, recording: bool) -> Self {
        match (running, recording) {
            (false, false) => IndicatorState::Idle,
            (true, false) => IndicatorState::Running,
            (false, true) => IndicatorState::Recording,
            (true, true) => IndicatorState::RunningRecording,
        }
    }
}

/// What the overlay shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorView {
    pub state: IndicatorState,
    pub step: u32,
    pub label: String,
}

#[derive(Debug, Default)]
pub struct StatusIndicator {
    running: bool,
    recording: bool,
    step: u32,
}

impl StatusIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the new view when anything changed
    pub fn set_running(&mut self, active: bool, step: u32) -> Option<IndicatorView> {
        if self.running == active && self.step == step {
            return None;
        }
        self.running = active;
        self.step = step;
        Some(self.view())
    }

    pub fn set_recording(&mut self, active: bool) -> Option<IndicatorView> {
        if self.recording == active {
            return None;
        }
        self.recording = active;
        Some(self.view())
    }

    pub fn view(&self) -> IndicatorView {
        let state = IndicatorState::from_flags(self.running, self.recording);
        let running = if self.step > 0 {
            format!("Agent running (step {})", self.step)
        } else {
            "Agent running".to_string()
        };
        let label = match state {
            IndicatorState::Idle => String::new(),
            IndicatorState::Running => running,
            IndicatorState::Recording => "Recording".to_string(),
            IndicatorState::RunningRecording => format!("{}, recording", running),
        };
        IndicatorView {
            state,
            step: self.step,
            label,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_flags_drive_four_states() {
        let mut indicator = StatusIndicator::new();
        assert_eq!(indicator.view().state, IndicatorState::Idle);

        let view = indicator.set_running(true, 3).unwrap();
        assert_eq!(view.state, IndicatorState::Running);
        assert_eq!(view.label, "Agent running (step 3)");

        let view = indicator.set_recording(true).unwrap();
        assert_eq!(view.state, IndicatorState::RunningRecording);
        assert_eq!(view.label, "Agent running (step 3), recording");

        let view = indicator.set_running(false, 3).unwrap();
        assert_eq!(view.state, IndicatorState::Recording);

        let view = indicator.set_recording(false).unwrap();
        assert_eq!(view.state, IndicatorState::Idle);
        assert!(view.label.is_empty());
    }

    #[test]
    fn test_unchanged_input_does_not_rerender() {
        let mut indicator = StatusIndicator::new();
        assert!(indicator.set_running(false, 0).is_none());
        assert!(indicator.set_running(true, 1).is_some());
        assert!(indicator.set_running(true, 1).is_none());
        assert!(indicator.set_running(true, 2).is_some(), "step change re-renders");
        assert!(indicator.set_recording(false).is_none());
    }

    #[test]
    fn test_view_wire_shape() {
        let view = IndicatorState::from_flags(true, true);
        assert_eq!(
            serde_json::to_value(view).unwrap(),
            serde_json::json!("running_recording")
        );
    }
}
