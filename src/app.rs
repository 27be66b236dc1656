use crate::camera::{CameraArbiter, CameraBackend, Resolution};
use crate::config::{Config, RecordingStrategy};
use crate::hooks;
use crate::messages::{Status, UserCommand};
use crate::mode::{self, Action, ModeState, Trigger};
use crate::services::{FramePump, PumpEvent, PumpSettings};
use crate::signals::{self, SignalChannel};
use crate::supervisor::{ProcessSupervisor, WorkerKind, WorkerProcess, worker_argv};
use crate::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Owns the mode and every camera consumer
///
/// All transitions run on the task that owns the `App`, one at a time, so the
/// camera is never acquired and released concurrently.
pub struct App {
    config: Config,
    mode: ModeState,
    arbiter: Arc<CameraArbiter>,
    pump: FramePump,
    pump_events: mpsc::UnboundedReceiver<PumpEvent>,
    detection: ProcessSupervisor,
    recording: ProcessSupervisor,
    signals: SignalChannel,
    status: watch::Sender<Status>,
}

impl App {
    pub fn new(config: Config, backend: Arc<dyn CameraBackend>) -> Self {
        let resolution = Resolution {
            width: config.camera.width,
            height: config.camera.height,
        };
        let arbiter = Arc::new(CameraArbiter::new(backend, resolution));
        let (pump, pump_events) =
            FramePump::new(Arc::clone(&arbiter), PumpSettings::from(&config.camera));
        let (status, _) = watch::channel(Status::default());

        Self {
            detection: ProcessSupervisor::new(WorkerKind::Detection, config.supervisor.clone()),
            recording: ProcessSupervisor::new(WorkerKind::Recording, config.supervisor.clone()),
            signals: SignalChannel::new(&config.paths),
            config,
            mode: ModeState::Idle,
            arbiter,
            pump,
            pump_events,
            status,
        }
    }

    pub fn mode(&self) -> ModeState {
        self.mode
    }

    pub fn arbiter(&self) -> &CameraArbiter {
        &self.arbiter
    }

    pub fn pump(&self) -> &FramePump {
        &self.pump
    }

    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    pub fn worker(&self, kind: WorkerKind) -> Option<&WorkerProcess> {
        self.supervisor(kind).worker()
    }

    pub fn is_worker_alive(&self, kind: WorkerKind) -> bool {
        self.supervisor(kind).is_alive()
    }

    fn supervisor(&self, kind: WorkerKind) -> &ProcessSupervisor {
        match kind {
            WorkerKind::Detection => &self.detection,
            WorkerKind::Recording => &self.recording,
        }
    }

    fn supervisor_mut(&mut self, kind: WorkerKind) -> &mut ProcessSupervisor {
        match kind {
            WorkerKind::Detection => &mut self.detection,
            WorkerKind::Recording => &mut self.recording,
        }
    }

    fn publish(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(mode = %self.mode, "{}", message);
        self.status.send_replace(Status {
            mode: self.mode,
            message,
        });
    }

    /// Bring up the local preview; a camera failure is reported, not fatal
    pub async fn start(&mut self) {
        if let Err(e) = self.config.paths.ensure() {
            tracing::warn!("Failed to create data directories: {}", e);
        }

        match self.pump.start() {
            Ok(()) => self.publish("Camera ready"),
            Err(e) => {
                tracing::error!("Local capture unavailable: {}", e);
                self.publish(e.to_string());
            }
        }
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<UserCommand>) -> anyhow::Result<()> {
        self.start().await;

        let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tracing::debug!("Main loop: waiting for event");
            tokio::select! {
                Some(command) = commands.recv() => {
                    if command == UserCommand::Quit {
                        tracing::info!("Quit requested");
                        break;
                    }
                    self.handle_command(command).await;
                }
                Some(event) = self.pump_events.recv() => {
                    self.handle_pump_event(event);
                }
                _ = health.tick() => {
                    self.check_workers();
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Received Ctrl+C, shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        tracing::info!("camctl shutdown complete");
        Ok(())
    }

    pub async fn handle_command(&mut self, command: UserCommand) {
        let trigger = match command {
            UserCommand::ToggleDetection => Trigger::toggle_detection(self.mode),
            UserCommand::ToggleRecording => Trigger::toggle_recording(self.mode),
            UserCommand::CaptureStill => Trigger::CaptureStill,
            UserCommand::Status => {
                self.report_status();
                return;
            }
            UserCommand::Quit => return,
        };

        // Failures are already published as status
        let _ = self.dispatch(trigger).await;
    }

    /// Validate and execute one transition, publishing the outcome
    pub async fn dispatch(&mut self, trigger: Trigger) -> Result<ModeState> {
        match self.transition(trigger).await {
            Ok(message) => {
                self.publish(message);
                Ok(self.mode)
            }
            Err(e) => {
                tracing::error!("Failed to {}: {}", trigger, e);
                self.publish(e.to_string());
                Err(e)
            }
        }
    }

    async fn transition(&mut self, trigger: Trigger) -> Result<String> {
        let action = mode::plan(self.mode, trigger)?;
        tracing::debug!(from = %self.mode, ?action, "Executing {}", trigger);

        match action {
            Action::SpawnDetectionWorker => {
                self.spawn_detection_worker().await?;
                Ok("Detection started".to_string())
            }
            Action::StopDetectionWorker => {
                self.stop_worker(WorkerKind::Detection).await;
                self.mode = ModeState::Idle;
                self.pump.start()?;
                Ok("Detection stopped".to_string())
            }
            Action::StartLocalRecording => {
                let path = self.start_local_recording()?;
                self.mode = ModeState::RecordingLocal;
                Ok(format!("Recording to {}", path.display()))
            }
            Action::StopLocalRecording => {
                self.mode = ModeState::Idle;
                match self.pump.stop_recording().await? {
                    Some(path) => Ok(format!("Recording saved to {}", path.display())),
                    None => Ok("Recording stopped".to_string()),
                }
            }
            Action::StartWorkerRecording => {
                self.start_worker_recording().await?;
                Ok("Recording started".to_string())
            }
            Action::StopWorkerRecording => {
                self.stop_worker_recording().await?;
                Ok("Recording stopped, detection resumed".to_string())
            }
            Action::SignalCapture => {
                self.signals.request_capture(&signals::capture_token())?;
                Ok("Capture requested".to_string())
            }
            Action::LocalCapture => {
                self.config.paths.ensure()?;
                let path = self.pump.capture_still(&self.config.paths.captures_dir).await?;
                Ok(format!("Captured {}", path.display()))
            }
        }
    }

    fn start_local_recording(&mut self) -> Result<PathBuf> {
        self.config.paths.ensure()?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = self
            .config
            .paths
            .recordings_dir
            .join(format!("recording_{}.mjpeg", timestamp));

        self.pump.start_recording(&path)?;
        Ok(path)
    }

    /// Hand the camera to a fresh detection worker
    ///
    /// Every path that needs detection running goes through here. On failure
    /// the local preview is restored and the mode is `Idle`.
    async fn spawn_detection_worker(&mut self) -> Result<()> {
        self.spawn_worker(WorkerKind::Detection).await?;
        self.mode = ModeState::Detecting;
        Ok(())
    }

    async fn spawn_worker(&mut self, kind: WorkerKind) -> Result<()> {
        // Finalizes any local recording and closes the device
        self.pump.stop().await;

        if let Err(e) = self.prepare_worker_launch().await {
            self.restore_local_preview();
            return Err(e);
        }

        let argv = worker_argv(&self.config.workers, kind);
        let worker = match self.supervisor_mut(kind).spawn(argv).await {
            Ok(worker) => worker,
            Err(e) => {
                self.restore_local_preview();
                return Err(e);
            }
        };

        if let Err(e) = self.arbiter.lend_to_worker(kind, worker.pid) {
            self.supervisor_mut(kind).terminate().await;
            self.restore_local_preview();
            return Err(e);
        }

        Ok(())
    }

    async fn prepare_worker_launch(&self) -> Result<()> {
        self.config.paths.ensure()?;
        self.signals.reset()?;

        let settle = self.config.camera.release_settle();
        if !settle.is_zero() {
            tracing::debug!("Waiting {:?} for the camera to settle", settle);
            tokio::time::sleep(settle).await;
        }
        Ok(())
    }

    fn restore_local_preview(&mut self) {
        self.mode = ModeState::Idle;
        if let Err(e) = self.pump.start() {
            tracing::error!("Failed to restore local capture: {}", e);
        }
    }

    async fn stop_worker(&mut self, kind: WorkerKind) {
        self.supervisor_mut(kind).terminate().await;
        self.arbiter.reclaim_from_worker(kind);
    }

    async fn start_worker_recording(&mut self) -> Result<()> {
        match self.config.workers.recording_strategy {
            RecordingStrategy::Signal => {
                self.signals.set_recording(true)?;
            }
            RecordingStrategy::DedicatedWorker => {
                self.stop_worker(WorkerKind::Detection).await;

                if let Err(e) = self.spawn_worker(WorkerKind::Recording).await {
                    tracing::warn!("Recording worker failed, resuming detection");
                    self.resume_detection().await;
                    return Err(e);
                }
                if let Err(e) = self.signals.set_recording(true) {
                    tracing::warn!("Failed to signal the recording worker, resuming detection");
                    self.stop_worker(WorkerKind::Recording).await;
                    self.resume_detection().await;
                    return Err(e);
                }
            }
        }

        self.mode = ModeState::RecordingViaWorker;
        Ok(())
    }

    /// Fall back to detection after a failed recording start; `Idle` if that fails too
    async fn resume_detection(&mut self) {
        if let Err(e) = self.spawn_detection_worker().await {
            tracing::error!("Failed to resume detection: {}", e);
        }
    }

    async fn stop_worker_recording(&mut self) -> Result<()> {
        match self.config.workers.recording_strategy {
            RecordingStrategy::Signal => {
                self.signals.set_recording(false)?;
                if self.detection.is_alive() {
                    self.mode = ModeState::Detecting;
                    return Ok(());
                }
                tracing::warn!("Detection worker is gone, starting a new one");
            }
            RecordingStrategy::DedicatedWorker => {
                if let Err(e) = self.signals.set_recording(false) {
                    tracing::warn!("Failed to clear record flag: {}", e);
                }
                self.stop_worker(WorkerKind::Recording).await;

                if let Some(command) = &self.config.hooks.on_recording_finished {
                    hooks::run_hook("on_recording_finished", command);
                }
            }
        }

        self.spawn_detection_worker().await
    }

    fn handle_pump_event(&mut self, event: PumpEvent) {
        let local = matches!(self.mode, ModeState::Idle | ModeState::RecordingLocal);

        match event {
            PumpEvent::DeviceLost { generation, reason }
                if local && generation == self.pump.generation() =>
            {
                self.mode = ModeState::Idle;
                let e = Error::DeviceUnavailable(reason);
                tracing::error!("Local capture stopped: {}", e);
                self.publish(e.to_string());
            }
            PumpEvent::RecordingAborted { generation, reason }
                if local && generation == self.pump.generation() =>
            {
                self.mode = ModeState::Idle;
                self.publish(format!("Recording aborted: {}", reason));
            }
            event => tracing::debug!("Ignoring stale pump event: {:?}", event),
        }
    }

    /// Reap workers that exited on their own and fall back to local capture
    pub fn check_workers(&mut self) {
        for kind in [WorkerKind::Detection, WorkerKind::Recording] {
            let Some(status) = self.supervisor_mut(kind).check_health() else {
                continue;
            };

            self.arbiter.reclaim_from_worker(kind);

            if self.mode.worker_owns_camera() {
                self.restore_local_preview();
                self.publish(format!("{} exited unexpectedly ({})", kind, status));
            }
        }
    }

    fn report_status(&self) {
        let mut message = format!("Mode: {}, camera: {}", self.mode, self.arbiter.holder());

        for kind in [WorkerKind::Detection, WorkerKind::Recording] {
            if let Some(worker) = self.worker(kind).filter(|_| self.is_worker_alive(kind)) {
                message.push_str(&format!(
                    ", {} pid {} since {}",
                    kind,
                    worker.pid,
                    worker.started_at.format("%H:%M:%S")
                ));
            }
        }

        if self.pump.is_recording() {
            message.push_str(", local recording active");
        }

        self.publish(message);
    }

    /// Best-effort cleanup: stop recording, release the camera, stop workers
    pub async fn shutdown(&mut self) {
        tracing::info!("Shutting down");

        if self.mode == ModeState::RecordingViaWorker {
            if let Err(e) = self.signals.set_recording(false) {
                tracing::warn!("Failed to clear record flag: {}", e);
            }
        }

        if let Err(e) = self.pump.stop_recording().await {
            tracing::warn!("Failed to finalize recording: {}", e);
        }
        self.pump.stop().await;

        for kind in [WorkerKind::Recording, WorkerKind::Detection] {
            self.stop_worker(kind).await;
        }

        self.mode = ModeState::Idle;
        self.publish("Stopped");
    }
}
