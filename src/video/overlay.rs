use crate::mode::ModeState;
use image::{Rgb, RgbImage};

const IDLE: Rgb<u8> = Rgb([0, 255, 0]);
const DETECTING: Rgb<u8> = Rgb([255, 200, 0]);
const RECORDING_LOCAL: Rgb<u8> = Rgb([255, 0, 0]);
const RECORDING_WORKER: Rgb<u8> = Rgb([255, 0, 255]);
const REC_DOT: Rgb<u8> = Rgb([255, 0, 0]);
const BAR_HEIGHT: u32 = 6;
const DOT_RADIUS: i64 = 8;
const DOT_MARGIN: i64 = 20;

/// Status bar color for each mode
pub fn mode_color(mode: ModeState) -> Rgb<u8> {
    match mode {
        ModeState::Idle => IDLE,
        ModeState::Detecting => DETECTING,
        ModeState::RecordingLocal => RECORDING_LOCAL,
        ModeState::RecordingViaWorker => RECORDING_WORKER,
    }
}

/// Preview copy of `frame` with the status overlay drawn on it
///
/// A bar along the top edge is colored by mode and a red dot in the top-right
/// corner marks an active recording. The source frame is left untouched.
pub fn draw_overlay(frame: &RgbImage, mode: ModeState) -> RgbImage {
    let mut preview = frame.clone();
    let (width, height) = preview.dimensions();

    let bar = mode_color(mode);
    for y in 0..BAR_HEIGHT.min(height) {
        for x in 0..width {
            preview.put_pixel(x, y, bar);
        }
    }

    if mode.is_recording() {
        let cx = width as i64 - DOT_MARGIN;
        let cy = DOT_MARGIN;
        for y in (cy - DOT_RADIUS)..=(cy + DOT_RADIUS) {
            for x in (cx - DOT_RADIUS)..=(cx + DOT_RADIUS) {
                let inside = (x - cx).pow(2) + (y - cy).pow(2) <= DOT_RADIUS.pow(2);
                if inside && x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height {
                    preview.put_pixel(x as u32, y as u32, REC_DOT);
                }
            }
        }
    }

    preview
}
