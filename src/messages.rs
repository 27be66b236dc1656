use crate::mode::ModeState;

/// Requests from the control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    ToggleDetection,
    ToggleRecording,
    CaptureStill,
    Status,
    Quit,
}

/// Orchestrator status (observable via watch channel)
#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    pub mode: ModeState,
    pub message: String,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            mode: ModeState::Idle,
            message: "Starting".to_string(),
        }
    }
}
