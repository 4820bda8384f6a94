//! Memory-mapped buffer pool for streaming I/O.
//!
//! Regions are owned by the pool and unmapped when dropped, so every exit
//! path, including a failed allocation, releases whatever was mapped.

use std::time::Duration;

use log::{debug, warn};

use crate::error::{CameraError, Result};
use crate::traits::{DequeuedBuffer, MappedRegion, VideoDevice};

/// Number of buffers requested when nothing else is configured.
pub const DEFAULT_BUFFER_COUNT: u32 = 20;

/// Fixed set of mapped driver buffers, addressed by index.
#[derive(Debug)]
pub struct BufferPool<R> {
    regions: Vec<R>,
    streaming: bool,
    held: Option<u32>,
    /// The held buffer could not be queued again and is retried first.
    requeue_pending: bool,
    /// The driver handed out an index outside the pool.
    desynced: bool,
}

impl<R: MappedRegion> BufferPool<R> {
    /// Request up to `capacity_hint` buffers and map every granted one.
    ///
    /// Either all granted buffers are mapped or none are: a failure at index
    /// `n` unmaps `0..n` and frees the driver allocation.
    pub fn allocate<D>(device: &mut D, capacity_hint: u32) -> Result<Self>
    where
        D: VideoDevice<Region = R>,
    {
        let granted = device
            .request_buffers(capacity_hint)
            .map_err(|err| CameraError::BufferAlloc(format!("requesting buffers: {err}")))?;
        if granted == 0 {
            return Err(CameraError::BufferAlloc(
                "driver granted no buffers".to_owned(),
            ));
        }
        if granted < capacity_hint {
            debug!("requested {capacity_hint} buffers, driver granted {granted}");
        }

        let mut regions = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            match device.map_buffer(index) {
                Ok(region) => regions.push(region),
                Err(err) => {
                    drop(regions);
                    free_driver_buffers(device);
                    return Err(CameraError::BufferAlloc(format!(
                        "mapping buffer {index} of {granted}: {err}"
                    )));
                }
            }
        }

        debug!("mapped {granted} buffers");
        Ok(Self {
            regions,
            streaming: false,
            held: None,
            requeue_pending: false,
            desynced: false,
        })
    }

    /// Queue every buffer and start streaming.
    ///
    /// A failure part way leaves the driver queue in an unknown state;
    /// recovery is a full close and reopen.
    pub fn enqueue_all<D>(&mut self, device: &mut D) -> Result<()>
    where
        D: VideoDevice<Region = R>,
    {
        for index in 0..self.count() {
            device.queue_buffer(index)?;
        }
        device.stream_on()?;
        self.streaming = true;
        self.held = None;
        self.requeue_pending = false;
        Ok(())
    }

    /// Return a buffer whose requeue failed earlier.
    ///
    /// Fails if that requeue fails again, or if the driver once returned a
    /// buffer this pool does not own; only a reopen recovers from the latter.
    pub fn recover<D>(&mut self, device: &mut D) -> Result<()>
    where
        D: VideoDevice<Region = R>,
    {
        if self.desynced {
            return Err(CameraError::PoolState(
                "driver returned a buffer outside the pool".to_owned(),
            ));
        }
        if let (true, Some(index)) = (self.requeue_pending, self.held) {
            device.queue_buffer(index)?;
            debug!("buffer {index} returned to the driver on retry");
            self.held = None;
            self.requeue_pending = false;
        }
        Ok(())
    }

    /// Take the next filled buffer. At most one buffer may be held at a time.
    pub fn dequeue<D>(&mut self, device: &mut D, timeout: Option<Duration>) -> Result<DequeuedBuffer>
    where
        D: VideoDevice<Region = R>,
    {
        if !self.streaming {
            return Err(CameraError::PoolState("stream is not running".to_owned()));
        }
        self.recover(device)?;
        if let Some(index) = self.held {
            return Err(CameraError::PoolState(format!(
                "buffer {index} was never returned to the driver"
            )));
        }

        let buffer = device.dequeue_buffer(timeout)?;
        if buffer.index >= self.count() {
            self.desynced = true;
            return Err(CameraError::PoolState(format!(
                "driver returned buffer {} of a pool of {}",
                buffer.index,
                self.count()
            )));
        }
        self.held = Some(buffer.index);
        Ok(buffer)
    }

    /// Return the held buffer to the driver queue.
    pub fn requeue<D>(&mut self, device: &mut D, index: u32) -> Result<()>
    where
        D: VideoDevice<Region = R>,
    {
        if self.held != Some(index) {
            return Err(CameraError::PoolState(format!("buffer {index} is not held")));
        }
        if let Err(err) = device.queue_buffer(index) {
            self.requeue_pending = true;
            return Err(err);
        }
        self.held = None;
        Ok(())
    }

    /// Mapped bytes of buffer `index`.
    pub fn region(&self, index: u32) -> Option<&[u8]> {
        self.regions.get(index as usize).map(MappedRegion::as_bytes)
    }

    /// Number of buffers in the pool.
    pub fn count(&self) -> u32 {
        u32::try_from(self.regions.len()).unwrap_or(u32::MAX)
    }

    /// Buffers currently owned by the driver queue.
    pub fn queued(&self) -> u32 {
        if !self.streaming {
            return 0;
        }
        self.count() - u32::from(self.held.is_some())
    }

    /// Index of the buffer held outside the driver queue, if any.
    pub const fn held(&self) -> Option<u32> {
        self.held
    }

    /// Stop streaming and unmap every buffer.
    ///
    /// Unmapping happens even when stream-off fails; that failure is still
    /// returned.
    pub fn release<D>(mut self, device: &mut D) -> Result<()>
    where
        D: VideoDevice<Region = R>,
    {
        let stopped = if self.streaming {
            device.stream_off()
        } else {
            Ok(())
        };
        self.streaming = false;

        let count = self.regions.len();
        self.regions.clear();
        free_driver_buffers(device);
        debug!("unmapped {count} buffers");

        stopped
    }
}

fn free_driver_buffers<D: VideoDevice>(device: &mut D) {
    if let Err(err) = device.request_buffers(0) {
        warn!("freeing driver buffers: {err}");
    }
}
