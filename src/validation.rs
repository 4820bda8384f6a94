//! Frame validation utilities for test pattern verification.
//!
//! Checks work on the luma plane only, so they apply to GREY and YUYV
//! frames without any color conversion. Used against virtual cameras
//! that render known patterns.

use crate::error::{CameraError, Result};
use crate::traits::{Frame, PixelFormat};

/// Number of vertical bars in a color bar pattern.
const BAR_COUNT: u32 = 8;

/// Smallest luma span between the brightest and darkest bar or gradient end.
const MIN_LUMA_SPAN: u8 = 50;

/// Largest luma drop tolerated between neighbouring gradient samples.
const GRADIENT_SLACK: u8 = 1;

/// Columns between gradient samples.
const GRADIENT_STEP: u32 = 10;

/// Luma of pixel (`x`, `y`), or `None` outside the frame or for formats
/// without a luma plane.
pub fn luma_at(frame: &Frame, x: u32, y: u32) -> Option<u8> {
    if x >= frame.width() || y >= frame.height() {
        return None;
    }
    let (x, y, width) = (x as usize, y as usize, frame.width() as usize);
    let offset = match frame.format() {
        PixelFormat::Grey => y * width + x,
        // Y0 U Y1 V: every pixel's luma sits on an even byte
        PixelFormat::Yuyv => (y * width + x) * 2,
        PixelFormat::Rgb24 | PixelFormat::Other(_) => return None,
    };
    frame.data().get(offset).copied()
}

fn sample(frame: &Frame, x: u32, y: u32) -> Result<u8> {
    luma_at(frame, x, y).ok_or_else(|| {
        CameraError::Validation(format!(
            "no luma at ({x}, {y}) in a {}x{} {} frame",
            frame.width(),
            frame.height(),
            frame.format()
        ))
    })
}

/// Validates that a frame shows eight vertical bars of strictly falling luma.
///
/// This is the luma profile of standard color bars (white, yellow, cyan,
/// green, magenta, red, blue, black). Each bar is sampled at its center
/// on the middle row.
///
/// # Errors
///
/// Returns `Validation` if a bar cannot be sampled, is not darker than
/// the bar to its left, or the bars span too little luma.
pub fn validate_color_bars(frame: &Frame) -> Result<()> {
    let bar_width = frame.width() / BAR_COUNT;
    if bar_width == 0 {
        return Err(CameraError::Validation(format!(
            "frame {} pixels wide is too narrow for {BAR_COUNT} bars",
            frame.width()
        )));
    }
    let center_y = frame.height() / 2;

    let mut bars = Vec::with_capacity(BAR_COUNT as usize);
    for bar in 0..BAR_COUNT {
        let x = bar * bar_width + bar_width / 2;
        let luma = sample(frame, x, center_y)?;
        if let Some(&prev) = bars.last() {
            if luma >= prev {
                return Err(CameraError::Validation(format!(
                    "bar {bar} at x={x} has luma {luma}, not below {prev} of the bar before"
                )));
            }
        }
        bars.push(luma);
    }

    check_span(&bars, "color bars")
}

/// Validates that a frame brightens from left to right along its middle row.
///
/// # Errors
///
/// Returns `Validation` if luma falls between samples by more than
/// rounding slack, or the frame is close to a solid color.
pub fn validate_gradient(frame: &Frame) -> Result<()> {
    let center_y = frame.height() / 2;

    let mut samples = Vec::new();
    for x in (0..frame.width()).step_by(GRADIENT_STEP as usize) {
        let luma = sample(frame, x, center_y)?;
        if let Some(&prev) = samples.last() {
            if luma.saturating_add(GRADIENT_SLACK) < prev {
                return Err(CameraError::Validation(format!(
                    "gradient falls at x={x}: luma {luma} after {prev}"
                )));
            }
        }
        samples.push(luma);
    }

    check_span(&samples, "gradient")
}

fn check_span(samples: &[u8], what: &str) -> Result<()> {
    let first = samples.first().copied().unwrap_or_default();
    let last = samples.last().copied().unwrap_or_default();
    let span = first.abs_diff(last);
    if span < MIN_LUMA_SPAN {
        return Err(CameraError::Validation(format!(
            "{what} span only {span} luma levels (from {first} to {last}), expected at least {MIN_LUMA_SPAN}"
        )));
    }
    Ok(())
}

/// Validates that frame sequence numbers increase by exactly one.
///
/// # Errors
///
/// Returns `Validation` for an empty slice or the first gap.
pub fn validate_frame_sequence(frames: &[Frame]) -> Result<()> {
    if frames.is_empty() {
        return Err(CameraError::Validation(
            "cannot validate an empty frame sequence".to_owned(),
        ));
    }

    for (i, pair) in frames.windows(2).enumerate() {
        if let [prev, curr] = pair {
            let expected = prev.metadata.sequence.wrapping_add(1);
            if curr.metadata.sequence != expected {
                return Err(CameraError::Validation(format!(
                    "sequence gap at index {}: expected {expected}, got {}",
                    i + 1,
                    curr.metadata.sequence
                )));
            }
        }
    }

    Ok(())
}
