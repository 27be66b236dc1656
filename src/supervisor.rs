//! Lifecycle of external worker processes
//!
//! One `ProcessSupervisor` exists per `WorkerKind` and is the only thing that
//! signals that kind's OS process. Shutdown is always two-phase: SIGTERM,
//! wait up to the grace period, then SIGKILL and a short settle wait.

use crate::config::{SupervisorConfig, WorkersConfig};
use crate::{Error, Result};
use chrono::{DateTime, Local};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Detection,
    Recording,
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerKind::Detection => write!(f, "detection worker"),
            WorkerKind::Recording => write!(f, "recording worker"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Terminating,
    Terminated,
    FailedToStart,
}

#[derive(Debug, Clone)]
pub struct WorkerProcess {
    pub pid: u32,
    pub kind: WorkerKind,
    pub argv: Vec<String>,
    pub started_at: DateTime<Local>,
    pub state: WorkerState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// Nothing was running
    NotRunning,
    /// Exited within the grace period
    Graceful,
    /// Needed SIGKILL
    Forced,
}

/// Build the worker command line:
/// `<program> <args..> --input <camera|file> --hef <model> --labels-json <labels> [--show-fps]`
pub fn worker_argv(workers: &WorkersConfig, kind: WorkerKind) -> Vec<String> {
    let prefix = match kind {
        WorkerKind::Detection => &workers.detection_args,
        WorkerKind::Recording => &workers.recording_args,
    };

    let input = match &workers.input_file {
        Some(path) => path_arg(path),
        None => workers.camera_input.clone(),
    };

    let mut argv = Vec::with_capacity(prefix.len() + 8);
    argv.push(workers.program.clone());
    argv.extend(prefix.iter().cloned());
    argv.extend([
        "--input".to_string(),
        input,
        "--hef".to_string(),
        path_arg(&workers.model),
        "--labels-json".to_string(),
        path_arg(&workers.labels_json),
    ]);

    // The recording pipeline never took --show-fps
    if workers.show_fps && kind == WorkerKind::Detection {
        argv.push("--show-fps".to_string());
    }

    argv
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

struct LiveWorker {
    info: WorkerProcess,
    child: Child,
}

pub struct ProcessSupervisor {
    kind: WorkerKind,
    config: SupervisorConfig,
    current: Option<LiveWorker>,
    last: Option<WorkerProcess>,
}

impl ProcessSupervisor {
    pub fn new(kind: WorkerKind, config: SupervisorConfig) -> Self {
        Self {
            kind,
            config,
            current: None,
            last: None,
        }
    }

    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    pub fn is_alive(&self) -> bool {
        self.current.as_ref().is_some_and(|w| {
            matches!(w.info.state, WorkerState::Starting | WorkerState::Running)
        })
    }

    /// The live worker, or the most recent one if it has exited
    pub fn worker(&self) -> Option<&WorkerProcess> {
        self.current
            .as_ref()
            .map(|w| &w.info)
            .or(self.last.as_ref())
    }

    /// Launch the worker and wait out the startup probe
    ///
    /// A process that exits with status 0 during the probe is reported as
    /// `FailedToStart`; any other exit during the probe is `UnexpectedExit`.
    pub async fn spawn(&mut self, argv: Vec<String>) -> Result<WorkerProcess> {
        if self.is_alive() {
            return Err(Error::AlreadyRunning(self.kind));
        }

        let kind = self.kind;
        let (program, args) = argv.split_first().ok_or_else(|| Error::SpawnError {
            kind,
            reason: "empty command line".to_string(),
        })?;

        tracing::info!(%kind, "Executing: {}", argv.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::SpawnError {
                kind,
                reason: e.to_string(),
            })?;

        let pid = child.id().unwrap_or_default();
        let mut info = WorkerProcess {
            pid,
            kind,
            argv: argv.clone(),
            started_at: Local::now(),
            state: WorkerState::Starting,
        };

        match timeout(self.config.startup_probe(), child.wait()).await {
            Ok(Ok(status)) => {
                info.state = WorkerState::FailedToStart;
                tracing::warn!(%kind, pid, %status, "Worker exited during startup");
                self.last = Some(info);

                let text = status.to_string();
                return Err(if status.success() {
                    Error::FailedToStart { kind, status: text }
                } else {
                    Error::UnexpectedExit { kind, status: text }
                });
            }
            Ok(Err(e)) => {
                info.state = WorkerState::FailedToStart;
                self.last = Some(info);
                return Err(Error::SpawnError {
                    kind,
                    reason: e.to_string(),
                });
            }
            Err(_) => {}
        }

        info.state = WorkerState::Running;
        tracing::info!(%kind, pid, "Worker running");

        self.current = Some(LiveWorker {
            info: info.clone(),
            child,
        });
        Ok(info)
    }

    /// Reap a worker that exited on its own
    ///
    /// Returns the exit status description if the worker was running and has
    /// now exited.
    pub fn check_health(&mut self) -> Option<String> {
        let worker = self.current.as_mut()?;

        match worker.child.try_wait() {
            Ok(Some(status)) => {
                let kind = self.kind;
                tracing::warn!(%kind, pid = worker.info.pid, %status, "Worker exited unexpectedly");
                self.finish(WorkerState::Terminated);
                Some(status.to_string())
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(kind = %self.kind, "Failed to poll worker: {}", e);
                None
            }
        }
    }

    /// Stop the worker with the configured grace period
    pub async fn terminate(&mut self) -> TerminationOutcome {
        let grace = self.config.grace_period();
        self.terminate_with(grace).await
    }

    /// SIGTERM, wait up to `grace`, then SIGKILL and wait the kill settle time
    ///
    /// Never fails and never waits longer than `grace + kill_settle`.
    pub async fn terminate_with(&mut self, grace: Duration) -> TerminationOutcome {
        let kind = self.kind;
        let settle = self.config.kill_settle();

        let Some(worker) = self.current.as_mut() else {
            return TerminationOutcome::NotRunning;
        };

        if let Ok(Some(status)) = worker.child.try_wait() {
            tracing::info!(%kind, %status, "Worker had already exited");
            self.finish(WorkerState::Terminated);
            return TerminationOutcome::NotRunning;
        }

        worker.info.state = WorkerState::Terminating;
        let pid = worker.info.pid;
        tracing::info!(%kind, pid, "Stopping worker");

        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::warn!(%kind, pid, "Failed to send SIGTERM: {}", e);
        }

        let outcome = match timeout(grace, worker.child.wait()).await {
            Ok(_) => TerminationOutcome::Graceful,
            Err(_) => {
                let err = Error::TerminationTimeout {
                    kind,
                    grace_ms: grace.as_millis(),
                };
                tracing::warn!(pid, "{}, killing", err);

                if let Err(e) = worker.child.start_kill() {
                    tracing::warn!(%kind, pid, "Failed to send SIGKILL: {}", e);
                }
                if timeout(settle, worker.child.wait()).await.is_err() {
                    tracing::error!(%kind, pid, "Worker still alive after SIGKILL, abandoning wait");
                }
                TerminationOutcome::Forced
            }
        };

        tracing::info!(%kind, pid, ?outcome, "Worker stopped");
        self.finish(WorkerState::Terminated);
        outcome
    }

    fn finish(&mut self, state: WorkerState) {
        if let Some(mut worker) = self.current.take() {
            worker.info.state = state;
            self.last = Some(worker.info);
        }
    }
}
