//! Single-frame acquisition over either I/O mode.

use std::time::Duration;

use log::trace;

use crate::buffers::BufferPool;
use crate::error::{CameraError, Result};
use crate::sys;
use crate::traits::{Frame, FrameMetadata, MappedRegion, VideoDevice};

fn check_frame_len(frame: &Frame, expected: usize) -> Result<()> {
    if frame.len() == expected {
        Ok(())
    } else {
        Err(CameraError::FrameSize {
            expected,
            actual: frame.len(),
        })
    }
}

/// Capture one frame with a single `read(2)`.
///
/// `frame` must already be sized to `expected` bytes; a read delivering
/// fewer bytes fails with [`CameraError::ShortRead`].
pub fn capture_read<D: VideoDevice>(
    device: &mut D,
    frame: &mut Frame,
    expected: usize,
    sequence: u32,
    timeout: Option<Duration>,
) -> Result<()> {
    check_frame_len(frame, expected)?;

    let read = device.read_frame(frame.data_mut(), timeout)?;
    if read != expected {
        return Err(CameraError::ShortRead {
            expected,
            actual: read,
        });
    }

    frame.metadata = FrameMetadata {
        sequence,
        timestamp: sys::monotonic_now(),
        bytes_used: u32::try_from(read).unwrap_or(u32::MAX),
    };
    Ok(())
}

/// Capture one frame by dequeuing a filled buffer, copying it out and
/// returning the buffer to the driver.
///
/// The buffer is requeued even when the copy fails, so the pool keeps
/// circulating.
pub fn capture_streaming<D: VideoDevice>(
    device: &mut D,
    pool: &mut BufferPool<D::Region>,
    frame: &mut Frame,
    expected: usize,
    timeout: Option<Duration>,
) -> Result<()> {
    check_frame_len(frame, expected)?;

    let buffer = pool.dequeue(device, timeout)?;
    let copied = copy_region(pool, buffer.index, frame, expected);
    let requeued = pool.requeue(device, buffer.index);
    copied?;
    requeued?;

    frame.metadata = FrameMetadata {
        sequence: buffer.sequence,
        timestamp: buffer.timestamp,
        bytes_used: buffer.bytes_used,
    };

    let now = sys::monotonic_now();
    if !buffer.timestamp.is_zero() && now > buffer.timestamp {
        trace!(
            "frame {} latency {:.3} ms",
            buffer.sequence,
            (now - buffer.timestamp).as_secs_f64() * 1000.0
        );
    }
    Ok(())
}

fn copy_region<R: MappedRegion>(
    pool: &BufferPool<R>,
    index: u32,
    frame: &mut Frame,
    expected: usize,
) -> Result<()> {
    let src = pool
        .region(index)
        .and_then(|bytes| bytes.get(..expected))
        .ok_or_else(|| {
            CameraError::PoolState(format!("buffer {index} is smaller than {expected} bytes"))
        })?;
    frame.data_mut().copy_from_slice(src);
    Ok(())
}
