use crate::camera::CameraArbiter;
use crate::config::CameraConfig;
use crate::mode::ModeState;
use crate::video::{MjpegSink, VideoSink, draw_overlay};
use crate::{Error, Result};
use image::{ImageFormat, RgbImage};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};

pub type SharedFrame = Option<Arc<RgbImage>>;

/// Things the capture thread reports on its own
#[derive(Debug, Clone, PartialEq)]
pub enum PumpEvent {
    /// Repeated read errors ended the loop; the camera has been released
    DeviceLost { generation: u64, reason: String },
    /// The sink rejected a frame and was closed
    RecordingAborted { generation: u64, reason: String },
}

#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    pub frame_interval: Duration,
    pub max_consecutive_read_errors: u32,
    pub stop_timeout: Duration,
}

impl From<&CameraConfig> for PumpSettings {
    fn from(config: &CameraConfig) -> Self {
        Self {
            frame_interval: config.frame_interval(),
            max_consecutive_read_errors: config.max_consecutive_read_errors,
            stop_timeout: config.stop_timeout(),
        }
    }
}

struct ActiveRecording {
    path: PathBuf,
    sink: Box<dyn VideoSink>,
}

type RecordingSlot = Arc<Mutex<Option<ActiveRecording>>>;

struct PumpThread {
    stop: Arc<AtomicBool>,
    exited: oneshot::Receiver<()>,
    handle: JoinHandle<()>,
}

/// Local capture loop
///
/// This service:
/// - Acquires the camera through the arbiter on `start`
/// - Reads frames on a dedicated thread at a fixed interval
/// - Publishes the raw frame and an overlaid preview (replaced, never mutated)
/// - Feeds the active recording sink
/// - Releases the camera on `stop`, or by itself after repeated read errors
///
/// It never re-acquires the camera on its own.
pub struct FramePump {
    arbiter: Arc<CameraArbiter>,
    settings: PumpSettings,
    latest: Arc<watch::Sender<SharedFrame>>,
    preview: Arc<watch::Sender<SharedFrame>>,
    recording: RecordingSlot,
    events_tx: mpsc::UnboundedSender<PumpEvent>,
    generation: u64,
    thread: Option<PumpThread>,
}

impl FramePump {
    pub fn new(
        arbiter: Arc<CameraArbiter>,
        settings: PumpSettings,
    ) -> (Self, mpsc::UnboundedReceiver<PumpEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (latest, _) = watch::channel(None);
        let (preview, _) = watch::channel(None);

        let pump = Self {
            arbiter,
            settings,
            latest: Arc::new(latest),
            preview: Arc::new(preview),
            recording: Arc::new(Mutex::new(None)),
            events_tx,
            generation: 0,
            thread: None,
        };
        (pump, events_rx)
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    pub fn is_recording(&self) -> bool {
        self.recording.lock().is_some()
    }

    /// Incremented on every start; events carry it so stale ones can be ignored
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn latest_frame(&self) -> SharedFrame {
        self.latest.borrow().clone()
    }

    pub fn subscribe_frames(&self) -> watch::Receiver<SharedFrame> {
        self.latest.subscribe()
    }

    pub fn subscribe_preview(&self) -> watch::Receiver<SharedFrame> {
        self.preview.subscribe()
    }

    /// Acquire the camera and start the capture thread; no-op if running
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            tracing::debug!("Frame pump already running");
            return Ok(());
        }
        // A loop that died on device errors leaves its handle behind
        self.thread = None;

        self.arbiter.acquire()?;
        self.generation += 1;

        let stop = Arc::new(AtomicBool::new(false));
        let (exited_tx, exited) = oneshot::channel();
        let ctx = LoopContext {
            arbiter: Arc::clone(&self.arbiter),
            settings: self.settings,
            latest: Arc::clone(&self.latest),
            preview: Arc::clone(&self.preview),
            recording: Arc::clone(&self.recording),
            events_tx: self.events_tx.clone(),
            generation: self.generation,
            stop: Arc::clone(&stop),
        };

        let handle = std::thread::Builder::new()
            .name("frame-pump".to_string())
            .spawn(move || {
                capture_loop(ctx);
                let _ = exited_tx.send(());
            });

        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                self.arbiter.release();
                return Err(Error::Io(e));
            }
        };

        tracing::info!(generation = self.generation, "Frame pump started");
        self.thread = Some(PumpThread {
            stop,
            exited,
            handle,
        });
        Ok(())
    }

    /// Stop the capture thread, finalize any recording, release the camera
    ///
    /// Waits at most the configured stop timeout for the thread; after that
    /// the wait is abandoned and the camera is released anyway (a stalled
    /// read closes the device when it returns). Safe to call when not running.
    pub async fn stop(&mut self) {
        if let Some(thread) = self.thread.take() {
            thread.stop.store(true, Ordering::SeqCst);

            match tokio::time::timeout(self.settings.stop_timeout, thread.exited).await {
                Ok(_) => tracing::debug!("Frame pump thread exited"),
                Err(_) => tracing::warn!(
                    "Frame pump did not exit within {:?}, releasing camera anyway",
                    self.settings.stop_timeout
                ),
            }
        }

        if let Err(e) = self.stop_recording().await {
            tracing::warn!("Failed to finalize recording during stop: {}", e);
        }

        self.arbiter.release();
        self.latest.send_replace(None);
        self.preview.send_replace(None);
        tracing::info!("Frame pump stopped");
    }

    /// Open a video sink sized to the latest published frame
    pub fn start_recording(&mut self, path: &Path) -> Result<()> {
        let frame = self.latest_frame().ok_or(Error::FrameUnavailable)?;

        let mut slot = self.recording.lock();
        if let Some(active) = slot.as_ref() {
            tracing::debug!("Already recording to {:?}", active.path);
            return Ok(());
        }

        let (width, height) = frame.dimensions();
        let sink = MjpegSink::create(path, width, height)
            .map_err(|e| Error::SinkOpenFailure(format!("{:#}", e)))?;

        *slot = Some(ActiveRecording {
            path: path.to_path_buf(),
            sink: Box::new(sink),
        });
        tracing::info!("Recording started to {:?} ({}x{})", path, width, height);
        Ok(())
    }

    /// Close the active sink; returns its path, or `None` if not recording
    pub async fn stop_recording(&mut self) -> Result<Option<PathBuf>> {
        let active = self.recording.lock().take();
        let Some(mut active) = active else {
            return Ok(None);
        };

        active
            .sink
            .finalize()
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("{:#}", e))))?;

        tracing::info!("Recording stopped: {:?}", active.path);
        Ok(Some(active.path))
    }

    /// Save the latest raw frame as `capture_<timestamp>.jpg` in `dir`
    pub async fn capture_still(&self, dir: &Path) -> Result<PathBuf> {
        let frame = self.latest_frame().ok_or(Error::FrameUnavailable)?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("capture_{}.jpg", timestamp));

        let save_path = path.clone();
        tokio::task::spawn_blocking(move || frame.save_with_format(&save_path, ImageFormat::Jpeg))
            .await
            .map_err(|e| Error::CaptureFailed(e.to_string()))?
            .map_err(|e| Error::CaptureFailed(e.to_string()))?;

        tracing::info!("Captured image saved to: {:?}", path);
        Ok(path)
    }
}

struct LoopContext {
    arbiter: Arc<CameraArbiter>,
    settings: PumpSettings,
    latest: Arc<watch::Sender<SharedFrame>>,
    preview: Arc<watch::Sender<SharedFrame>>,
    recording: RecordingSlot,
    events_tx: mpsc::UnboundedSender<PumpEvent>,
    generation: u64,
    stop: Arc<AtomicBool>,
}

fn capture_loop(ctx: LoopContext) {
    let mut consecutive_errors = 0u32;

    let lost = loop {
        if ctx.stop.load(Ordering::SeqCst) {
            break None;
        }
        let started = Instant::now();

        let read = ctx.arbiter.read_frame();
        // A read that outlived `stop` must not publish or record
        if ctx.stop.load(Ordering::SeqCst) {
            break None;
        }

        match read {
            Ok(image) => {
                consecutive_errors = 0;
                let frame = Arc::new(image);
                let mode = if feed_recording(&ctx, &frame) {
                    ModeState::RecordingLocal
                } else {
                    ModeState::Idle
                };

                ctx.preview
                    .send_replace(Some(Arc::new(draw_overlay(&frame, mode))));
                ctx.latest.send_replace(Some(frame));
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= ctx.settings.max_consecutive_read_errors {
                    break Some(e.to_string());
                }
                tracing::warn!(
                    "Skipping failed frame read ({}/{}): {}",
                    consecutive_errors,
                    ctx.settings.max_consecutive_read_errors,
                    e
                );
            }
        }

        if let Some(rest) = ctx.settings.frame_interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    };

    if let Some(reason) = lost {
        tracing::error!("Camera read failed repeatedly, stopping capture: {}", reason);

        // Dropping the sink closes the file before the device goes away
        if let Some(active) = ctx.recording.lock().take() {
            tracing::warn!("Closing recording {:?} early", active.path);
        }
        ctx.arbiter.release();
        ctx.latest.send_replace(None);
        ctx.preview.send_replace(None);

        let _ = ctx.events_tx.send(PumpEvent::DeviceLost {
            generation: ctx.generation,
            reason,
        });
    }
}

/// Returns whether a sink is (still) open after writing the frame
fn feed_recording(ctx: &LoopContext, frame: &Arc<RgbImage>) -> bool {
    let mut slot = ctx.recording.lock();
    let Some(active) = slot.as_mut() else {
        return false;
    };

    match active.sink.write_frame(Arc::clone(frame)) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Recording to {:?} failed: {}", active.path, e);
            *slot = None;
            let _ = ctx.events_tx.send(PumpEvent::RecordingAborted {
                generation: ctx.generation,
                reason: e.to_string(),
            });
            false
        }
    }
}
