//! Enumeration of every (format, size, framerate) combination a device offers.

use log::debug;

use crate::error::Result;
use crate::traits::{
    FormatDescription, FrameIntervalRange, FrameSizeRange, PixelFormat, Settings, VideoDevice,
};

/// Walk formats, then sizes per format, then intervals per size.
///
/// Ranges are walked at their step: sizes advance width and height
/// together, continuous interval ranges advance one second at a time.
/// Formats or sizes the driver fails to enumerate are skipped.
pub fn enumerate_settings<D: VideoDevice>(device: &D) -> Result<Vec<Settings>> {
    let mut settings = Vec::new();

    for desc in device.enum_formats()? {
        let sizes = match device.enum_frame_sizes(desc.fourcc) {
            Ok(sizes) => sizes,
            Err(err) => {
                debug!("skipping format {}: {err}", desc.fourcc);
                continue;
            }
        };

        for (width, height) in sizes.iter().flat_map(|range| walk_sizes(*range)) {
            let intervals = match device.enum_frame_intervals(desc.fourcc, width, height) {
                Ok(intervals) => intervals,
                Err(err) => {
                    debug!("skipping {} {width}x{height}: {err}", desc.fourcc);
                    continue;
                }
            };

            for fps in intervals.iter().flat_map(|range| walk_framerates(*range)) {
                settings.push(entry(&desc, width, height, fps));
            }
        }
    }

    Ok(settings)
}

fn entry(desc: &FormatDescription, width: u32, height: u32, framerate: u32) -> Settings {
    Settings {
        description: desc.description.clone(),
        format: PixelFormat::from_fourcc(desc.fourcc),
        width,
        height,
        framerate,
    }
}

fn walk_sizes(range: FrameSizeRange) -> Vec<(u32, u32)> {
    let (min_w, max_w, step_w, min_h, max_h, step_h) = match range {
        FrameSizeRange::Discrete { width, height } => return vec![(width, height)],
        FrameSizeRange::Stepwise {
            min_width,
            max_width,
            step_width,
            min_height,
            max_height,
            step_height,
        } => (min_width, max_width, step_width, min_height, max_height, step_height),
        FrameSizeRange::Continuous {
            min_width,
            max_width,
            min_height,
            max_height,
        } => (min_width, max_width, 1, min_height, max_height, 1),
    };

    let (step_w, step_h) = (step_w.max(1), step_h.max(1));
    let mut sizes = Vec::new();
    let (mut w, mut h) = (min_w, min_h);
    while w <= max_w && h <= max_h {
        sizes.push((w, h));
        match (w.checked_add(step_w), h.checked_add(step_h)) {
            (Some(next_w), Some(next_h)) => (w, h) = (next_w, next_h),
            _ => break,
        }
    }
    sizes
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn walk_framerates(range: FrameIntervalRange) -> Vec<u32> {
    let (min, max, step) = match range {
        FrameIntervalRange::Discrete(interval) => {
            return interval.seconds().and_then(to_fps).into_iter().collect();
        }
        FrameIntervalRange::Stepwise { min, max, step } => (min, max, step.seconds()),
        FrameIntervalRange::Continuous { min, max } => (min, max, Some(1.0)),
    };

    let (Some(min), Some(max)) = (min.seconds(), max.seconds()) else {
        return Vec::new();
    };
    let Some(step) = step.filter(|s| *s > 0.0) else {
        return to_fps(min).into_iter().collect();
    };

    let mut rates = Vec::new();
    let mut i = 0u32;
    loop {
        let seconds = f64::from(i).mul_add(step, min);
        // tolerance for accumulated rounding at the upper bound
        if seconds > max + 1e-9 {
            break;
        }
        // longer intervals only round to lower rates
        let Some(fps) = to_fps(seconds) else { break };
        if rates.last() != Some(&fps) {
            rates.push(fps);
        }
        // jump to the last step that still rounds to `fps`
        let boundary = 1.0 / (f64::from(fps) - 0.5);
        let last_step = ((boundary - min) / step).floor() as u32;
        let Some(next) = i.checked_add(1) else { break };
        i = next.max(last_step);
    }
    rates
}

/// Frames per second of an interval, rounded. `None` below 1 fps.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_fps(seconds: f64) -> Option<u32> {
    if seconds <= 0.0 {
        return None;
    }
    let fps = (1.0 / seconds).round();
    (fps >= 1.0 && fps <= f64::from(u32::MAX)).then_some(fps as u32)
}

/// Settings list computed on first use and kept for the life of a session.
#[derive(Debug, Clone, Default)]
pub struct SettingsCatalog {
    cached: Option<Vec<Settings>>,
}

impl SettingsCatalog {
    /// Empty catalog.
    pub const fn new() -> Self {
        Self { cached: None }
    }

    /// Cached settings, enumerating them from `device` on first use.
    ///
    /// A failed enumeration is not cached.
    pub fn get_or_compute<D: VideoDevice>(&mut self, device: &D) -> Result<&[Settings]> {
        if self.cached.is_none() {
            let settings = enumerate_settings(device)?;
            debug!("enumerated {} valid settings", settings.len());
            self.cached = Some(settings);
        }
        Ok(self.cached.as_deref().unwrap_or_default())
    }
}
