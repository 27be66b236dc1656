//! Exclusive ownership of the capture device
//!
//! The arbiter records who holds the physical camera: the local frame pump
//! (which reads through the arbiter) or a worker process (which opens the
//! device itself after the arbiter has closed it). Nothing else may open the
//! device.

use super::backend::{CameraBackend, FrameSource, Resolution};
use crate::supervisor::WorkerKind;
use crate::{Error, Result};
use image::RgbImage;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceHolder {
    Free,
    LocalPump,
    Worker { kind: WorkerKind, pid: u32 },
}

impl fmt::Display for DeviceHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceHolder::Free => write!(f, "free"),
            DeviceHolder::LocalPump => write!(f, "local capture"),
            DeviceHolder::Worker { kind, pid } => write!(f, "{} (pid {})", kind, pid),
        }
    }
}

struct ArbiterState {
    holder: DeviceHolder,
    /// Taken out for the duration of a read
    source: Option<Box<dyn FrameSource>>,
    /// Bumped on every acquire; a read that outlives its release sees a mismatch
    lease: u64,
}

pub struct CameraArbiter {
    backend: Arc<dyn CameraBackend>,
    resolution: Resolution,
    state: Mutex<ArbiterState>,
}

impl CameraArbiter {
    pub fn new(backend: Arc<dyn CameraBackend>, resolution: Resolution) -> Self {
        Self {
            backend,
            resolution,
            state: Mutex::new(ArbiterState {
                holder: DeviceHolder::Free,
                source: None,
                lease: 0,
            }),
        }
    }

    pub fn holder(&self) -> DeviceHolder {
        self.state.lock().holder
    }

    /// Open the device for local capture
    ///
    /// Idempotent while local capture already holds it. Fails while a worker
    /// holds it or when the backend cannot open the device.
    pub fn acquire(&self) -> Result<()> {
        let mut state = self.state.lock();
        match state.holder {
            DeviceHolder::LocalPump => return Ok(()),
            DeviceHolder::Worker { .. } => {
                return Err(Error::DeviceUnavailable(format!(
                    "held by {}",
                    state.holder
                )));
            }
            _ => {}
        }

        let source = self.backend.open(self.resolution)?;
        state.source = Some(source);
        state.holder = DeviceHolder::LocalPump;
        state.lease += 1;

        tracing::info!(backend = %self.backend.describe(), "Camera acquired for local capture");
        Ok(())
    }

    /// Close the device if local capture holds it; otherwise a no-op
    ///
    /// Never waits for a read. If one is in flight the device is closed by the
    /// reading thread as soon as that read returns.
    pub fn release(&self) {
        let mut state = self.state.lock();
        if state.holder != DeviceHolder::LocalPump {
            return;
        }

        let source = state.source.take();
        state.holder = DeviceHolder::Free;
        drop(state);

        match source {
            Some(source) => {
                drop(source);
                tracing::info!("Camera released");
            }
            None => tracing::warn!("Camera released during a frame read, closing when it returns"),
        }
    }

    /// Blocking read from the locally held device
    ///
    /// The lock is not held during the read, so `release` and the holder
    /// queries stay responsive while a device read stalls.
    pub fn read_frame(&self) -> Result<RgbImage> {
        let (mut source, lease) = {
            let mut state = self.state.lock();
            if state.holder != DeviceHolder::LocalPump {
                return Err(Error::DeviceUnavailable(format!(
                    "not held locally ({})",
                    state.holder
                )));
            }
            match state.source.take() {
                Some(source) => (source, state.lease),
                None => {
                    return Err(Error::DeviceUnavailable(
                        "another read is in progress".to_string(),
                    ));
                }
            }
        };

        let frame = source.read_frame();

        let mut state = self.state.lock();
        if state.holder == DeviceHolder::LocalPump && state.lease == lease {
            state.source = Some(source);
        } else {
            drop(state);
            drop(source);
            tracing::debug!("Closed camera after a read that outlived its release");
        }

        frame
    }

    /// Record that a freshly spawned worker now owns the device
    ///
    /// Only valid while the device is free.
    pub fn lend_to_worker(&self, kind: WorkerKind, pid: u32) -> Result<()> {
        let mut state = self.state.lock();
        if state.holder != DeviceHolder::Free {
            return Err(Error::DeviceUnavailable(format!(
                "cannot hand to {}: held by {}",
                kind, state.holder
            )));
        }

        state.holder = DeviceHolder::Worker { kind, pid };
        tracing::debug!(%kind, pid, "Camera lent to worker");
        Ok(())
    }

    /// Mark the device free again after the worker of `kind` has exited
    pub fn reclaim_from_worker(&self, kind: WorkerKind) {
        let mut state = self.state.lock();
        if let DeviceHolder::Worker { kind: holder, .. } = state.holder {
            if holder == kind {
                state.holder = DeviceHolder::Free;
                tracing::debug!(%kind, "Camera reclaimed from worker");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::TestPatternBackend;

    fn arbiter() -> (Arc<TestPatternBackend>, CameraArbiter) {
        let backend = Arc::new(TestPatternBackend::new());
        let arbiter = CameraArbiter::new(
            backend.clone(),
            Resolution {
                width: 32,
                height: 24,
            },
        );
        (backend, arbiter)
    }

    #[test]
    fn test_acquire_is_idempotent() {
        let (backend, arbiter) = arbiter();
        arbiter.acquire().unwrap();
        arbiter.acquire().unwrap();

        assert!(backend.is_open());
        assert_eq!(arbiter.holder(), DeviceHolder::LocalPump);
        assert_eq!(arbiter.read_frame().unwrap().dimensions(), (32, 24));
    }

    #[test]
    fn test_release_closes_device_and_is_idempotent() {
        let (backend, arbiter) = arbiter();
        arbiter.release();

        arbiter.acquire().unwrap();
        arbiter.release();
        arbiter.release();

        assert!(!backend.is_open());
        assert_eq!(arbiter.holder(), DeviceHolder::Free);
        assert!(arbiter.read_frame().is_err());
    }

    #[test]
    fn test_worker_and_pump_exclude_each_other() {
        let (_backend, arbiter) = arbiter();
        arbiter.acquire().unwrap();
        assert!(arbiter.lend_to_worker(WorkerKind::Detection, 42).is_err());

        arbiter.release();
        arbiter.lend_to_worker(WorkerKind::Detection, 42).unwrap();
        assert!(matches!(arbiter.acquire(), Err(Error::DeviceUnavailable(_))));

        // Reclaiming for the wrong kind leaves the holder alone
        arbiter.reclaim_from_worker(WorkerKind::Recording);
        assert!(matches!(arbiter.holder(), DeviceHolder::Worker { pid: 42, .. }));

        arbiter.reclaim_from_worker(WorkerKind::Detection);
        arbiter.acquire().unwrap();
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Acquire,
        Release,
        Lend(WorkerKind),
        Reclaim(WorkerKind),
    }

    const OPS: [Op; 6] = [
        Op::Acquire,
        Op::Release,
        Op::Lend(WorkerKind::Detection),
        Op::Lend(WorkerKind::Recording),
        Op::Reclaim(WorkerKind::Detection),
        Op::Reclaim(WorkerKind::Recording),
    ];

    #[test]
    fn test_no_sequence_gives_device_to_both() {
        // Every sequence of five operations
        let depth = 5;
        for mut n in 0..OPS.len().pow(depth) {
            let (backend, arbiter) = arbiter();
            let mut trace = Vec::new();

            for _ in 0..depth {
                let op = OPS[n % OPS.len()];
                n /= OPS.len();
                trace.push(op);

                let _ = match op {
                    Op::Acquire => arbiter.acquire(),
                    Op::Release => {
                        arbiter.release();
                        Ok(())
                    }
                    Op::Lend(kind) => arbiter.lend_to_worker(kind, 7),
                    Op::Reclaim(kind) => {
                        arbiter.reclaim_from_worker(kind);
                        Ok(())
                    }
                };

                let holder = arbiter.holder();
                let local_open = backend.is_open();
                match holder {
                    DeviceHolder::LocalPump => assert!(local_open, "{:?}", trace),
                    DeviceHolder::Free | DeviceHolder::Worker { .. } => {
                        assert!(!local_open, "{:?}", trace)
                    }
                }
            }
        }
    }

    /// Reads block until the test lets them through
    struct GatedBackend {
        open: Arc<std::sync::atomic::AtomicBool>,
        gate: Mutex<Option<(std::sync::mpsc::Sender<()>, std::sync::mpsc::Receiver<()>)>>,
    }

    struct GatedSource {
        open: Arc<std::sync::atomic::AtomicBool>,
        started: std::sync::mpsc::Sender<()>,
        resume: std::sync::mpsc::Receiver<()>,
    }

    impl CameraBackend for GatedBackend {
        fn open(&self, _resolution: Resolution) -> Result<Box<dyn FrameSource>> {
            let (started, resume) = self
                .gate
                .lock()
                .take()
                .ok_or_else(|| Error::DeviceUnavailable("already opened".to_string()))?;
            self.open.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(Box::new(GatedSource {
                open: Arc::clone(&self.open),
                started,
                resume,
            }))
        }

        fn describe(&self) -> String {
            "gated".to_string()
        }
    }

    impl FrameSource for GatedSource {
        fn read_frame(&mut self) -> Result<RgbImage> {
            let _ = self.started.send(());
            let _ = self.resume.recv();
            Ok(RgbImage::new(4, 4))
        }
    }

    impl Drop for GatedSource {
        fn drop(&mut self) {
            self.open.store(false, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn test_release_does_not_wait_for_a_stalled_read() {
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let (resume_tx, resume_rx) = std::sync::mpsc::channel();
        let open = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let backend = GatedBackend {
            open: Arc::clone(&open),
            gate: Mutex::new(Some((started_tx, resume_rx))),
        };
        let arbiter = Arc::new(CameraArbiter::new(
            Arc::new(backend),
            Resolution {
                width: 4,
                height: 4,
            },
        ));
        arbiter.acquire().unwrap();

        let reader = {
            let arbiter = Arc::clone(&arbiter);
            std::thread::spawn(move || arbiter.read_frame())
        };
        started_rx.recv().unwrap();

        // The read is stuck; release and handoff still go through
        arbiter.release();
        assert_eq!(arbiter.holder(), DeviceHolder::Free);
        arbiter.lend_to_worker(WorkerKind::Detection, 9).unwrap();
        assert!(open.load(std::sync::atomic::Ordering::SeqCst));

        resume_tx.send(()).unwrap();
        assert!(reader.join().unwrap().is_ok());

        // The late read closed the device instead of handing it back
        assert!(!open.load(std::sync::atomic::Ordering::SeqCst));
        assert!(matches!(arbiter.holder(), DeviceHolder::Worker { pid: 9, .. }));
    }
}
