//! Error types shared by the orchestration layer.
//!
//! Every variant is recoverable: the orchestrator turns it into a status
//! message and keeps running.

use crate::supervisor::WorkerKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The camera could not be opened or is claimed by someone else
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    /// The worker executable could not be launched
    #[error("Failed to launch {kind}: {reason}")]
    SpawnError { kind: WorkerKind, reason: String },

    /// The worker launched but exited cleanly during the startup probe
    #[error("{kind} exited immediately ({status})")]
    FailedToStart { kind: WorkerKind, status: String },

    /// The worker died with a failure status or signal before being stopped
    #[error("{kind} exited unexpectedly ({status})")]
    UnexpectedExit { kind: WorkerKind, status: String },

    #[error("{0} is already running")]
    AlreadyRunning(WorkerKind),

    /// Graceful stop did not finish within the grace period
    #[error("{kind} did not exit within {grace_ms}ms")]
    TerminationTimeout { kind: WorkerKind, grace_ms: u128 },

    /// No frame has been published yet
    #[error("No frame available yet")]
    FrameUnavailable,

    #[error("Failed to open recording sink: {0}")]
    SinkOpenFailure(String),

    #[error("Failed to save still image: {0}")]
    CaptureFailed(String),

    #[error("Cannot {action} while {state}")]
    InvalidTransition { action: String, state: String },

    /// Writing a signal mailbox failed
    #[error("Signal mailbox {path}: {source}")]
    Signal {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
