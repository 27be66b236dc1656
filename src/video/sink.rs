use anyhow::Result;
use async_trait::async_trait;
use image::RgbImage;
use std::sync::Arc;

/// Trait for streaming video encoding
///
/// Implementations are bound to fixed frame dimensions when opened and
/// write frames as they arrive rather than buffering the recording.
#[async_trait]
pub trait VideoSink: Send {
    /// Queue one frame (called from the capture thread, must not block)
    fn write_frame(&mut self, frame: Arc<RgbImage>) -> Result<()>;

    /// Flush and close the output
    async fn finalize(&mut self) -> Result<()>;
}
