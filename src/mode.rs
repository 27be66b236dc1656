//! Orchestrator mode and the table of allowed transitions
//!
//! `plan` is pure: it only decides which action a trigger maps to in the
//! current mode. Executing the action (and picking the final mode when an
//! effect fails) is the orchestrator's job.

use crate::{Error, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeState {
    #[default]
    Idle,
    Detecting,
    RecordingLocal,
    RecordingViaWorker,
}

impl ModeState {
    /// Whether a worker process (not the local pump) should hold the camera
    pub fn worker_owns_camera(self) -> bool {
        matches!(self, Self::Detecting | Self::RecordingViaWorker)
    }

    pub fn is_recording(self) -> bool {
        matches!(self, Self::RecordingLocal | Self::RecordingViaWorker)
    }
}

impl fmt::Display for ModeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Detecting => write!(f, "detecting"),
            Self::RecordingLocal => write!(f, "recording locally"),
            Self::RecordingViaWorker => write!(f, "recording via worker"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    StartDetection,
    StopDetection,
    StartRecording,
    StopRecording,
    CaptureStill,
}

impl Trigger {
    /// Trigger for a detection on/off toggle in `state`
    pub fn toggle_detection(state: ModeState) -> Self {
        if state.worker_owns_camera() {
            Self::StopDetection
        } else {
            Self::StartDetection
        }
    }

    /// Trigger for a recording on/off toggle in `state`
    pub fn toggle_recording(state: ModeState) -> Self {
        if state.is_recording() {
            Self::StopRecording
        } else {
            Self::StartRecording
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartDetection => write!(f, "start detection"),
            Self::StopDetection => write!(f, "stop detection"),
            Self::StartRecording => write!(f, "start recording"),
            Self::StopRecording => write!(f, "stop recording"),
            Self::CaptureStill => write!(f, "capture a still"),
        }
    }
}

/// What the orchestrator must do for an accepted trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Stop the pump, reset the mailboxes, launch the detection worker
    SpawnDetectionWorker,
    /// Terminate the detection worker and restart the pump
    StopDetectionWorker,
    StartLocalRecording,
    StopLocalRecording,
    /// Ask the worker side to start recording
    StartWorkerRecording,
    /// Ask the worker side to stop recording, then resume detection
    StopWorkerRecording,
    /// Post a token to the capture mailbox
    SignalCapture,
    /// Save the pump's latest frame
    LocalCapture,
}

impl Action {
    /// Mode the system is in once the action succeeds
    pub fn target(self, from: ModeState) -> ModeState {
        match self {
            Self::SpawnDetectionWorker | Self::StopWorkerRecording => ModeState::Detecting,
            Self::StopDetectionWorker | Self::StopLocalRecording => ModeState::Idle,
            Self::StartLocalRecording => ModeState::RecordingLocal,
            Self::StartWorkerRecording => ModeState::RecordingViaWorker,
            Self::SignalCapture | Self::LocalCapture => from,
        }
    }
}

pub fn plan(state: ModeState, trigger: Trigger) -> Result<Action> {
    use ModeState::*;
    use Trigger::*;

    match (state, trigger) {
        (Idle, StartDetection) => Ok(Action::SpawnDetectionWorker),
        (Detecting, StopDetection) => Ok(Action::StopDetectionWorker),

        (Idle, StartRecording) => Ok(Action::StartLocalRecording),
        (RecordingLocal, StopRecording) => Ok(Action::StopLocalRecording),

        (Detecting, StartRecording) => Ok(Action::StartWorkerRecording),
        (RecordingViaWorker, StopRecording) => Ok(Action::StopWorkerRecording),

        (Detecting | RecordingViaWorker, CaptureStill) => Ok(Action::SignalCapture),
        (Idle | RecordingLocal, CaptureStill) => Ok(Action::LocalCapture),

        (state, trigger) => Err(Error::InvalidTransition {
            action: trigger.to_string(),
            state: state.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATES: [ModeState; 4] = [
        ModeState::Idle,
        ModeState::Detecting,
        ModeState::RecordingLocal,
        ModeState::RecordingViaWorker,
    ];

    const TRIGGERS: [Trigger; 5] = [
        Trigger::StartDetection,
        Trigger::StopDetection,
        Trigger::StartRecording,
        Trigger::StopRecording,
        Trigger::CaptureStill,
    ];

    #[test]
    fn test_transition_table() {
        let cases = [
            (ModeState::Idle, Trigger::StartDetection, ModeState::Detecting),
            (ModeState::Detecting, Trigger::StopDetection, ModeState::Idle),
            (ModeState::Idle, Trigger::StartRecording, ModeState::RecordingLocal),
            (ModeState::RecordingLocal, Trigger::StopRecording, ModeState::Idle),
            (
                ModeState::Detecting,
                Trigger::StartRecording,
                ModeState::RecordingViaWorker,
            ),
            (
                ModeState::RecordingViaWorker,
                Trigger::StopRecording,
                ModeState::Detecting,
            ),
            (ModeState::Detecting, Trigger::CaptureStill, ModeState::Detecting),
            (ModeState::Idle, Trigger::CaptureStill, ModeState::Idle),
            (
                ModeState::RecordingLocal,
                Trigger::CaptureStill,
                ModeState::RecordingLocal,
            ),
        ];

        for (from, trigger, to) in cases {
            let action = plan(from, trigger).unwrap();
            assert_eq!(action.target(from), to, "{} from {}", trigger, from);
        }
    }

    #[test]
    fn test_capture_routing() {
        assert_eq!(
            plan(ModeState::Detecting, Trigger::CaptureStill).unwrap(),
            Action::SignalCapture
        );
        assert_eq!(
            plan(ModeState::RecordingLocal, Trigger::CaptureStill).unwrap(),
            Action::LocalCapture
        );
    }

    #[test]
    fn test_local_recording_excludes_detection() {
        let err = plan(ModeState::RecordingLocal, Trigger::StartDetection).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(
            err.to_string(),
            "Cannot start detection while recording locally"
        );
    }

    #[test]
    fn test_detection_and_local_recording_never_coexist() {
        // No accepted action moves between Detecting/RecordingViaWorker and
        // RecordingLocal directly
        for from in STATES {
            for trigger in TRIGGERS {
                let Ok(action) = plan(from, trigger) else {
                    continue;
                };
                let to = action.target(from);
                if from.worker_owns_camera() {
                    assert_ne!(to, ModeState::RecordingLocal);
                }
                if from == ModeState::RecordingLocal {
                    assert!(!to.worker_owns_camera());
                }
            }
        }
    }

    #[test]
    fn test_toggles_follow_state() {
        assert_eq!(
            Trigger::toggle_detection(ModeState::Idle),
            Trigger::StartDetection
        );
        assert_eq!(
            Trigger::toggle_detection(ModeState::RecordingViaWorker),
            Trigger::StopDetection
        );
        assert_eq!(
            Trigger::toggle_recording(ModeState::Detecting),
            Trigger::StartRecording
        );
        assert_eq!(
            Trigger::toggle_recording(ModeState::RecordingLocal),
            Trigger::StopRecording
        );
    }

    #[test]
    fn test_repeated_triggers_are_rejected() {
        assert!(plan(ModeState::Idle, Trigger::StopDetection).is_err());
        assert!(plan(ModeState::Idle, Trigger::StopRecording).is_err());
        assert!(plan(ModeState::Detecting, Trigger::StartDetection).is_err());
        assert!(plan(ModeState::RecordingViaWorker, Trigger::StartRecording).is_err());
        assert!(plan(ModeState::RecordingViaWorker, Trigger::StopDetection).is_err());
    }
}
