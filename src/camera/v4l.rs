//! V4L2 capture backend
//!
//! Negotiates MJPG at the configured resolution and falls back to YUYV when
//! the sensor does not offer compressed output.

use super::backend::{CameraBackend, FrameSource, Resolution};
use crate::{Error, Result};
use image::{ImageFormat, RgbImage};
use tracing::{info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const BUFFER_COUNT: u32 = 4;

pub struct V4lBackend {
    device_path: String,
}

impl V4lBackend {
    pub fn new(device_path: &str) -> Self {
        Self {
            device_path: device_path.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelLayout {
    Mjpg,
    Yuyv,
}

impl CameraBackend for V4lBackend {
    fn open(&self, resolution: Resolution) -> Result<Box<dyn FrameSource>> {
        let unavailable = |what: &str, e: std::io::Error| {
            Error::DeviceUnavailable(format!("{} {}: {}", what, self.device_path, e))
        };

        let device = Device::with_path(&self.device_path).map_err(|e| unavailable("open", e))?;

        let mut format = device.format().map_err(|e| unavailable("query", e))?;
        format.width = resolution.width;
        format.height = resolution.height;
        format.fourcc = FourCC::new(b"MJPG");

        let mut applied = device
            .set_format(&format)
            .map_err(|e| unavailable("configure", e))?;

        if applied.fourcc != FourCC::new(b"MJPG") {
            format.fourcc = FourCC::new(b"YUYV");
            applied = device
                .set_format(&format)
                .map_err(|e| unavailable("configure", e))?;
        }

        let layout = if applied.fourcc == FourCC::new(b"MJPG") {
            PixelLayout::Mjpg
        } else if applied.fourcc == FourCC::new(b"YUYV") {
            PixelLayout::Yuyv
        } else {
            return Err(Error::DeviceUnavailable(format!(
                "{} offers neither MJPG nor YUYV (got {})",
                self.device_path, applied.fourcc
            )));
        };

        if applied.width != resolution.width || applied.height != resolution.height {
            warn!(
                requested_width = resolution.width,
                requested_height = resolution.height,
                width = applied.width,
                height = applied.height,
                "Device adjusted the capture resolution"
            );
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| unavailable("stream", e))?;

        info!(
            device = %self.device_path,
            width = applied.width,
            height = applied.height,
            ?layout,
            "V4L2 device opened"
        );

        Ok(Box::new(V4lSource {
            _device: device,
            stream,
            layout,
            width: applied.width,
            height: applied.height,
        }))
    }

    fn describe(&self) -> String {
        format!("v4l:{}", self.device_path)
    }
}

struct V4lSource {
    _device: Device,
    stream: MmapStream<'static>,
    layout: PixelLayout,
    width: u32,
    height: u32,
}

impl FrameSource for V4lSource {
    fn read_frame(&mut self) -> Result<RgbImage> {
        let (buf, meta) = self.stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        let data = &buf[..used];

        match self.layout {
            PixelLayout::Mjpg => image::load_from_memory_with_format(data, ImageFormat::Jpeg)
                .map(|img| img.to_rgb8())
                .map_err(|e| Error::Io(std::io::Error::other(e))),
            PixelLayout::Yuyv => yuyv_to_rgb(data, self.width, self.height),
        }
    }
}

fn yuyv_to_rgb(data: &[u8], width: u32, height: u32) -> Result<RgbImage> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        return Err(Error::Io(std::io::Error::other(format!(
            "short YUYV frame: {} of {} bytes",
            data.len(),
            expected
        ))));
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_pixel(y0, u, v));
        rgb.extend_from_slice(&yuv_pixel(y1, u, v));
    }

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| Error::Io(std::io::Error::other("YUYV conversion size mismatch")))
}

// BT.601 limited range
fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;

    let r = 1.164 * c + 1.596 * e;
    let g = 1.164 * c - 0.392 * d - 0.813 * e;
    let b = 1.164 * c + 2.017 * d;

    [
        r.clamp(0.0, 255.0) as u8,
        g.clamp(0.0, 255.0) as u8,
        b.clamp(0.0, 255.0) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_grey_converts_to_grey() {
        let data = [128u8, 128, 128, 128].repeat(2);
        let img = yuyv_to_rgb(&data, 2, 2).unwrap();

        let px = img.get_pixel(1, 1);
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);
    }

    #[test]
    fn test_short_yuyv_frame_is_rejected() {
        assert!(yuyv_to_rgb(&[0u8; 4], 2, 2).is_err());
    }
}
