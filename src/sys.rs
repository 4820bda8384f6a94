//! Raw V4L2 calls the `v4l` crate does not expose in a controllable form:
//! buffer queue management, memory mapping, polling and controls.
//!
//! All `unsafe` in the crate lives here.
#![allow(unsafe_code)]

use std::ffi::c_void;
use std::io;
use std::mem;
use std::os::fd::RawFd;
use std::ptr::{self, NonNull};
use std::slice;
use std::time::Duration;

use log::warn;
use v4l::buffer::Type;
use v4l::memory::Memory;
use v4l::v4l2::{self, vidioc};
use v4l::v4l_sys;

use crate::controls::{control_class, ControlDescriptor, ControlFlags, ControlKind};
use crate::error::{CameraError, Result};
use crate::traits::{DequeuedBuffer, MappedRegion};

/// Flag asking the driver for the first control after the given id.
const NEXT_CTRL: u32 = 0x8000_0000;

const CAPTURE: u32 = Type::VideoCapture as u32;
const MMAP: u32 = Memory::Mmap as u32;

/// `ioctl` that restarts when interrupted by a signal.
fn xioctl<T>(fd: RawFd, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
    loop {
        // SAFETY: `arg` is the struct type the request expects and outlives the call.
        let res = unsafe { v4l2::ioctl(fd, request, ptr::from_mut(arg).cast::<c_void>()) };
        match res {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn capture_buffer(index: u32) -> v4l_sys::v4l2_buffer {
    v4l_sys::v4l2_buffer {
        index,
        type_: CAPTURE,
        memory: MMAP,
        // SAFETY: all-zero is a valid bit pattern for this plain C struct.
        ..unsafe { mem::zeroed() }
    }
}

/// `VIDIOC_REQBUFS`: ask for `count` mmap buffers, returns the granted count.
pub fn request_buffers(fd: RawFd, count: u32) -> Result<u32> {
    let mut req = v4l_sys::v4l2_requestbuffers {
        count,
        type_: CAPTURE,
        memory: MMAP,
        // SAFETY: all-zero is a valid bit pattern for this plain C struct.
        ..unsafe { mem::zeroed() }
    };
    xioctl(fd, vidioc::VIDIOC_REQBUFS, &mut req).map_err(CameraError::io("VIDIOC_REQBUFS"))?;
    Ok(req.count)
}

/// `VIDIOC_QUERYBUF` followed by `mmap` of the reported region.
pub fn map_buffer(fd: RawFd, index: u32) -> Result<MmapRegion> {
    let mut buf = capture_buffer(index);
    xioctl(fd, vidioc::VIDIOC_QUERYBUF, &mut buf).map_err(CameraError::io("VIDIOC_QUERYBUF"))?;

    // SAFETY: the driver fills `m.offset` for mmap buffers.
    let offset = unsafe { buf.m.offset };
    let len = buf.length as usize;
    let offset = libc::off_t::try_from(offset).map_err(|_| {
        CameraError::BufferAlloc(format!("buffer {index} offset {offset} out of range"))
    })?;

    // SAFETY: a fresh shared mapping of a driver buffer; the result is checked.
    let addr = unsafe {
        libc::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            offset,
        )
    };
    if addr == libc::MAP_FAILED {
        return Err(CameraError::io("mmap")(io::Error::last_os_error()));
    }
    let ptr = NonNull::new(addr.cast::<u8>())
        .ok_or_else(|| CameraError::BufferAlloc(format!("buffer {index} mapped at null")))?;

    Ok(MmapRegion { ptr, len })
}

/// `VIDIOC_QBUF`.
pub fn queue_buffer(fd: RawFd, index: u32) -> Result<()> {
    let mut buf = capture_buffer(index);
    xioctl(fd, vidioc::VIDIOC_QBUF, &mut buf).map_err(CameraError::io("VIDIOC_QBUF"))
}

/// `VIDIOC_DQBUF`. `WouldBlock` means no buffer is filled yet.
pub fn dequeue_buffer(fd: RawFd) -> io::Result<DequeuedBuffer> {
    let mut buf = capture_buffer(0);
    xioctl(fd, vidioc::VIDIOC_DQBUF, &mut buf)?;

    let secs = u64::try_from(buf.timestamp.tv_sec).unwrap_or(0);
    let micros = u64::try_from(buf.timestamp.tv_usec).unwrap_or(0);

    Ok(DequeuedBuffer {
        index: buf.index,
        bytes_used: buf.bytesused,
        sequence: buf.sequence,
        timestamp: Duration::from_secs(secs) + Duration::from_micros(micros),
    })
}

/// `VIDIOC_STREAMON`.
pub fn stream_on(fd: RawFd) -> Result<()> {
    let mut kind = CAPTURE;
    xioctl(fd, vidioc::VIDIOC_STREAMON, &mut kind).map_err(CameraError::io("VIDIOC_STREAMON"))
}

/// `VIDIOC_STREAMOFF`.
pub fn stream_off(fd: RawFd) -> Result<()> {
    let mut kind = CAPTURE;
    xioctl(fd, vidioc::VIDIOC_STREAMOFF, &mut kind).map_err(CameraError::io("VIDIOC_STREAMOFF"))
}

/// Wait until `fd` is readable. Returns `false` on timeout; `None` waits forever.
pub fn poll_readable(fd: RawFd, timeout: Option<Duration>) -> Result<bool> {
    let timeout_ms = timeout.map_or(-1, |t| i32::try_from(t.as_millis()).unwrap_or(i32::MAX));
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    loop {
        // SAFETY: a single valid pollfd.
        let res = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if res >= 0 {
            return Ok(res > 0);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(CameraError::io("poll")(err));
        }
    }
}

/// One `read(2)` into `dest`, restarted on signal interruption.
pub fn read(fd: RawFd, dest: &mut [u8]) -> io::Result<usize> {
    loop {
        // SAFETY: `dest` is valid for writes of `dest.len()` bytes.
        let res = unsafe { libc::read(fd, dest.as_mut_ptr().cast::<c_void>(), dest.len()) };
        if let Ok(n) = usize::try_from(res) {
            return Ok(n);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Monotonic clock reading, the clock capture timestamps are taken from.
pub fn monotonic_now() -> Duration {
    // SAFETY: all-zero is a valid timespec.
    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    // SAFETY: `ts` is a valid out pointer.
    if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) } != 0 {
        return Duration::ZERO;
    }
    let secs = u64::try_from(ts.tv_sec).unwrap_or(0);
    let nanos = u32::try_from(ts.tv_nsec).unwrap_or(0);
    Duration::new(secs, nanos)
}

/// `VIDIOC_QUERYCTRL` with the next-control flag. `None` once the list ends.
pub fn next_control(fd: RawFd, after: u32) -> Result<Option<ControlDescriptor>> {
    let mut query = v4l_sys::v4l2_queryctrl {
        id: after | NEXT_CTRL,
        // SAFETY: all-zero is a valid bit pattern for this plain C struct.
        ..unsafe { mem::zeroed() }
    };
    match xioctl(fd, vidioc::VIDIOC_QUERYCTRL, &mut query) {
        Ok(()) => {}
        Err(err) if err.raw_os_error() == Some(libc::EINVAL) => return Ok(None),
        Err(err) => return Err(CameraError::io("VIDIOC_QUERYCTRL")(err)),
    }

    let name_len = query.name.iter().position(|&b| b == 0).unwrap_or(query.name.len());
    let name = String::from_utf8_lossy(query.name.get(..name_len).unwrap_or_default()).into_owned();

    Ok(Some(ControlDescriptor {
        id: query.id,
        name,
        kind: ControlKind::from_raw(query.type_),
        minimum: query.minimum,
        maximum: query.maximum,
        step: query.step,
        default: query.default_value,
        flags: ControlFlags(query.flags),
    }))
}

/// `VIDIOC_G_CTRL`.
pub fn control(fd: RawFd, id: u32) -> Result<i32> {
    let mut ctrl = v4l_sys::v4l2_control { id, value: 0 };
    xioctl(fd, vidioc::VIDIOC_G_CTRL, &mut ctrl).map_err(CameraError::io("VIDIOC_G_CTRL"))?;
    Ok(ctrl.value)
}

/// `VIDIOC_S_CTRL`.
pub fn set_control(fd: RawFd, id: u32, value: i32) -> Result<()> {
    let mut ctrl = v4l_sys::v4l2_control { id, value };
    xioctl(fd, vidioc::VIDIOC_S_CTRL, &mut ctrl).map_err(CameraError::io("VIDIOC_S_CTRL"))
}

/// `VIDIOC_G_EXT_CTRLS` for a single control.
pub fn ext_control(fd: RawFd, id: u32) -> Result<i32> {
    let mut ctrl = ext_control_for(id, 0);
    ext_ctrls(fd, vidioc::VIDIOC_G_EXT_CTRLS, &mut ctrl)
        .map_err(CameraError::io("VIDIOC_G_EXT_CTRLS"))?;
    // SAFETY: integer controls report through `value`.
    Ok(unsafe { ctrl.__bindgen_anon_1.value })
}

/// `VIDIOC_S_EXT_CTRLS` for a single control.
pub fn set_ext_control(fd: RawFd, id: u32, value: i32) -> Result<()> {
    let mut ctrl = ext_control_for(id, value);
    ext_ctrls(fd, vidioc::VIDIOC_S_EXT_CTRLS, &mut ctrl)
        .map_err(CameraError::io("VIDIOC_S_EXT_CTRLS"))
}

fn ext_control_for(id: u32, value: i32) -> v4l_sys::v4l2_ext_control {
    // SAFETY: all-zero is a valid bit pattern for this plain C struct.
    let mut ctrl: v4l_sys::v4l2_ext_control = unsafe { mem::zeroed() };
    ctrl.id = id;
    ctrl.__bindgen_anon_1.value = value;
    ctrl
}

fn ext_ctrls(
    fd: RawFd,
    request: vidioc::_IOC_TYPE,
    ctrl: &mut v4l_sys::v4l2_ext_control,
) -> io::Result<()> {
    // SAFETY: all-zero is a valid bit pattern for this plain C struct.
    let mut ctrls: v4l_sys::v4l2_ext_controls = unsafe { mem::zeroed() };
    ctrls.__bindgen_anon_1.ctrl_class = control_class(ctrl.id);
    ctrls.count = 1;
    ctrls.controls = ptr::from_mut(ctrl);
    xioctl(fd, request, &mut ctrls)
}

/// A driver buffer mapped with `mmap`. Unmapped on drop.
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
}

impl MappedRegion for MmapRegion {
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: the mapping covers `len` readable bytes until drop.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: unmaps exactly the region mapped in `map_buffer`.
        if unsafe { libc::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) } != 0 {
            warn!("munmap of {} bytes failed: {}", self.len, io::Error::last_os_error());
        }
    }
}
