use crate::Result;
use image::RgbImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Something that can open the physical capture device
///
/// Opening must fail with `Error::DeviceUnavailable` when the device is
/// missing or claimed by another process.
pub trait CameraBackend: Send + Sync {
    fn open(&self, resolution: Resolution) -> Result<Box<dyn FrameSource>>;

    /// Human-readable name for logs
    fn describe(&self) -> String;
}

/// An open device. Dropping it closes the device.
pub trait FrameSource: Send {
    /// Blocking read of the next frame
    fn read_frame(&mut self) -> Result<RgbImage>;
}
