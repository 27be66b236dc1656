use super::backend::{CameraBackend, FrameSource, Resolution};
use crate::{Error, Result};
use image::{Rgb, RgbImage};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Synthetic camera producing a scrolling gradient
///
/// Like a real capture device it can only be opened once at a time.
#[derive(Default)]
pub struct TestPatternBackend {
    in_use: Arc<AtomicBool>,
}

impl TestPatternBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a `FrameSource` from this backend is currently open
    pub fn is_open(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }
}

impl CameraBackend for TestPatternBackend {
    fn open(&self, resolution: Resolution) -> Result<Box<dyn FrameSource>> {
        if self
            .in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::DeviceUnavailable(
                "test pattern device is busy".to_string(),
            ));
        }

        Ok(Box::new(TestPatternSource {
            resolution,
            sequence: 0,
            in_use: Arc::clone(&self.in_use),
        }))
    }

    fn describe(&self) -> String {
        "test-pattern".to_string()
    }
}

struct TestPatternSource {
    resolution: Resolution,
    sequence: u32,
    in_use: Arc<AtomicBool>,
}

impl FrameSource for TestPatternSource {
    fn read_frame(&mut self) -> Result<RgbImage> {
        let Resolution { width, height } = self.resolution;
        let (width, height) = (width.max(1), height.max(1));
        let shift = (self.sequence % width) * 4 % width;
        self.sequence = self.sequence.wrapping_add(1);

        Ok(RgbImage::from_fn(width, height, |x, y| {
            let r = ((x + shift) % width * 255 / width) as u8;
            let g = (y * 255 / height) as u8;
            Rgb([r, g, 128])
        }))
    }
}

impl Drop for TestPatternSource {
    fn drop(&mut self) {
        self.in_use.store(false, Ordering::SeqCst);
    }
}
