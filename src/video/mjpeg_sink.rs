use super::sink::VideoSink;
use anyhow::{Context, Result};
use async_trait::async_trait;
use image::RgbImage;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

const JPEG_QUALITY: u8 = 85;

enum MjpegCommand {
    WriteFrame(Arc<RgbImage>),
    Finalize { reply: oneshot::Sender<Result<()>> },
}

/// Motion-JPEG writer using a dedicated blocking thread for encoding and I/O
///
/// Frames are queued from the capture thread and encoded one after another
/// into a single `.mjpeg` stream. Frames that do not match the dimensions
/// the sink was opened with are resized to fit. If the sink is dropped
/// without `finalize`, the writer thread still flushes what it has.
pub struct MjpegSink {
    path: PathBuf,
    tx: mpsc::UnboundedSender<MjpegCommand>,
    finalized: bool,
}

impl MjpegSink {
    pub fn create(path: &Path, width: u32, height: u32) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create video file {:?}", path))?;
        let mut writer = BufWriter::new(file);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let log_path = path.to_path_buf();

        std::thread::Builder::new()
            .name("mjpeg-sink".to_string())
            .spawn(move || {
                let mut frames: u64 = 0;
                let mut failed = false;

                while let Some(cmd) = rx.blocking_recv() {
                    match cmd {
                        MjpegCommand::WriteFrame(frame) => {
                            if failed {
                                continue;
                            }
                            if let Err(e) = encode_frame(&mut writer, &frame, width, height) {
                                tracing::error!("Failed to write frame to {:?}: {}", log_path, e);
                                failed = true;
                            } else {
                                frames += 1;
                            }
                        }
                        MjpegCommand::Finalize { reply } => {
                            let result = writer
                                .flush()
                                .with_context(|| format!("Failed to flush {:?}", log_path));
                            tracing::info!("Finished writing {} frames to {:?}", frames, log_path);
                            let _ = reply.send(result);
                            return;
                        }
                    }
                }

                // Sender dropped without finalize
                if let Err(e) = writer.flush() {
                    tracing::error!("Failed to flush {:?}: {}", log_path, e);
                }
                tracing::info!("Closed {:?} after {} frames", log_path, frames);
            })
            .context("Failed to spawn video writer thread")?;

        Ok(Self {
            path: path.to_path_buf(),
            tx,
            finalized: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn encode_frame(
    writer: &mut BufWriter<File>,
    frame: &RgbImage,
    width: u32,
    height: u32,
) -> Result<()> {
    let mut encoder = JpegEncoder::new_with_quality(writer, JPEG_QUALITY);

    if frame.dimensions() == (width, height) {
        encoder.encode_image(frame)?;
    } else {
        let resized = imageops::resize(frame, width, height, FilterType::Nearest);
        encoder.encode_image(&resized)?;
    }

    Ok(())
}

#[async_trait]
impl VideoSink for MjpegSink {
    fn write_frame(&mut self, frame: Arc<RgbImage>) -> Result<()> {
        if self.finalized {
            return Err(anyhow::anyhow!("Sink {:?} already finalized", self.path));
        }

        self.tx
            .send(MjpegCommand::WriteFrame(frame))
            .map_err(|e| anyhow::anyhow!("Failed to send write command: {}", e))
    }

    async fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        let (reply, rx) = oneshot::channel();
        self.tx
            .send(MjpegCommand::Finalize { reply })
            .map_err(|e| anyhow::anyhow!("Failed to send finalize command: {}", e))?;

        rx.await
            .map_err(|e| anyhow::anyhow!("Failed to receive finalize response: {}", e))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOI: [u8; 2] = [0xFF, 0xD8];

    fn count_frames(bytes: &[u8]) -> usize {
        bytes.windows(3).filter(|w| *w == [0xFF, 0xD8, 0xFF]).count()
    }

    #[tokio::test]
    async fn test_writes_one_jpeg_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mjpeg");

        let mut sink = MjpegSink::create(&path, 16, 8).unwrap();
        for _ in 0..3 {
            sink.write_frame(Arc::new(RgbImage::new(16, 8))).unwrap();
        }
        sink.finalize().await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &SOI);
        assert_eq!(count_frames(&bytes), 3);
    }

    #[tokio::test]
    async fn test_mismatched_frames_are_resized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mjpeg");

        let mut sink = MjpegSink::create(&path, 16, 8).unwrap();
        sink.write_frame(Arc::new(RgbImage::new(32, 32))).unwrap();
        sink.finalize().await.unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let first = image::load_from_memory(&bytes).unwrap();
        assert_eq!((first.width(), first.height()), (16, 8));
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent_and_blocks_writes() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = MjpegSink::create(&dir.path().join("clip.mjpeg"), 4, 4).unwrap();

        sink.finalize().await.unwrap();
        sink.finalize().await.unwrap();
        assert!(sink.write_frame(Arc::new(RgbImage::new(4, 4))).is_err());
    }

    #[test]
    fn test_create_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("clip.mjpeg");
        assert!(MjpegSink::create(&path, 4, 4).is_err());
    }
}
