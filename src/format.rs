//! Pixel format and framerate negotiation.
//!
//! The driver is free to adjust any request to the closest thing it supports.
//! Negotiation here accepts only exact matches: the applied values are read
//! back and any difference fails the request.

use log::{debug, warn};

use crate::error::{CameraError, Result};
use crate::traits::{Format, Interval, PixelFormat, VideoDevice};

/// Set width, height and pixel format of captured frames.
///
/// Returns the applied format. Width, height, pixel code and stride always
/// equal the request.
pub fn set_format<D: VideoDevice>(
    device: &mut D,
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Format> {
    if format.bytes_per_pixel() == 0 {
        return Err(CameraError::InvalidPixelFormat(format));
    }

    let requested = Format::checked(width, height, format).ok_or(CameraError::FrameTooLarge {
        width,
        height,
        format,
    })?;
    device.set_format(&requested)?;
    let applied = device.format()?;

    // Frames are copied as one packed block, so padded lines are refused too.
    if applied.width != requested.width
        || applied.height != requested.height
        || applied.fourcc != requested.fourcc
        || applied.stride != requested.stride
    {
        return Err(CameraError::FormatRejected { requested, applied });
    }

    debug!("format set to {applied} (stride {}, {} bytes)", applied.stride, applied.size);
    Ok(applied)
}

/// Set the capture framerate. The driver must report back exactly `fps`.
pub fn set_framerate<D: VideoDevice>(device: &mut D, fps: u32) -> Result<()> {
    if fps == 0 {
        return Err(CameraError::ZeroFramerate);
    }

    device.set_frame_interval(Interval::from_fps(fps))?;
    let applied = device.frame_interval()?.fps().unwrap_or(0);

    if applied != fps {
        return Err(CameraError::FramerateRejected {
            requested: fps,
            applied,
        });
    }

    debug!("framerate set to {fps} fps");
    Ok(())
}

/// Current framerate, or 0 if it cannot be determined.
pub fn framerate<D: VideoDevice>(device: &D) -> u32 {
    match device.frame_interval() {
        Ok(interval) => interval.fps().unwrap_or(0),
        Err(err) => {
            warn!("failed to get camera fps: {err}");
            0
        }
    }
}
