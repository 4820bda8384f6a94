//! Error taxonomy for capture operations.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::traits::{Format, PixelFormat};

/// Coarse classification of a [`CameraError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The device node could not be opened.
    OpenFailure,
    /// The device cannot capture video or offers no usable I/O mode.
    CapabilityMismatch,
    /// The driver did not apply the exact requested format.
    FormatRejected,
    /// The driver did not apply the exact requested framerate.
    FramerateRejected,
    /// The streaming buffer pool could not be set up.
    BufferAllocFailure,
    /// A read, queue or dequeue level failure.
    IoFailure,
    /// A control could not be read or written. Never fatal.
    ControlAccessFailure,
    /// The operation needs an open device.
    NotOpen,
    /// Invalid configuration input.
    Configuration,
    /// The reconnect loop gave up.
    ReopenExhausted,
}

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Failed to open the device node.
    #[error("could not open camera device {path}: {source}")]
    OpenFailed {
        /// Device path that was opened.
        path: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// The device is not a usable video capture device.
    #[error("not a video capture device: {0}")]
    Capability(String),
    /// The device advertises neither streaming nor read/write I/O.
    #[error("device supports neither streaming nor read/write I/O")]
    NoSupportedIoMode,
    /// The pixel format has no known bytes-per-pixel.
    #[error("bytes per pixel of {0} is 0")]
    InvalidPixelFormat(PixelFormat),
    /// Stride or size of the requested frame do not fit in 32 bits.
    #[error("a {width}x{height} {format} frame is too large")]
    FrameTooLarge {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
        /// Requested pixel format.
        format: PixelFormat,
    },
    /// The driver applied a different format than requested.
    #[error("could not set width/height/pixelformat: requested {requested}, driver applied {applied}")]
    FormatRejected {
        /// Format that was requested.
        requested: Format,
        /// Format reported back by the driver.
        applied: Format,
    },
    /// A framerate of zero cannot be expressed as a frame interval.
    #[error("framerate must be at least 1 fps")]
    ZeroFramerate,
    /// The driver applied a different framerate than requested.
    #[error("could not set framerate: requested {requested} fps, driver applied {applied} fps")]
    FramerateRejected {
        /// Requested frames per second.
        requested: u32,
        /// Frames per second reported back by the driver.
        applied: u32,
    },
    /// The buffer pool could not be allocated.
    #[error("buffer allocation failed: {0}")]
    BufferAlloc(String),
    /// An ioctl or system call failed.
    #[error("{op} failed: {source}")]
    Io {
        /// Name of the failed operation.
        op: &'static str,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// A read returned fewer bytes than one full frame.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead {
        /// Full frame size.
        expected: usize,
        /// Bytes actually delivered.
        actual: usize,
    },
    /// The destination buffer does not match the negotiated frame size.
    #[error("frame buffer holds {actual} bytes but the negotiated frame needs {expected}")]
    FrameSize {
        /// Negotiated frame size.
        expected: usize,
        /// Size of the destination buffer.
        actual: usize,
    },
    /// The streaming pool is in a state that needs a reopen.
    #[error("buffer pool out of sync: {0}")]
    PoolState(String),
    /// Frame content does not match the expected pattern.
    #[error("frame validation failed: {0}")]
    Validation(String),
    /// No frame became available in time.
    #[error("no frame within {0:?}")]
    Timeout(Duration),
    /// No control with this name or id is known.
    #[error("unknown control {0}")]
    UnknownControl(String),
    /// A control could not be read or written.
    #[error("control access failed: {0}")]
    ControlAccess(String),
    /// The device has not been opened.
    #[error("camera device is not open")]
    NotOpen,
    /// Invalid configuration input.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The reconnect loop exhausted its attempts.
    #[error("device not ready after {attempts} reopen attempts: {last}")]
    ReopenExhausted {
        /// Number of reopen attempts made.
        attempts: u32,
        /// Error of the last attempt.
        #[source]
        last: Box<CameraError>,
    },
}

impl CameraError {
    /// Build a mapper that tags an OS error with the operation that produced it.
    pub fn io(op: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { op, source }
    }

    /// Classify this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::OpenFailed { .. } => ErrorKind::OpenFailure,
            Self::Capability(_) | Self::NoSupportedIoMode => ErrorKind::CapabilityMismatch,
            Self::InvalidPixelFormat(_)
            | Self::FrameTooLarge { .. }
            | Self::FormatRejected { .. } => ErrorKind::FormatRejected,
            Self::ZeroFramerate | Self::FramerateRejected { .. } => ErrorKind::FramerateRejected,
            Self::BufferAlloc(_) => ErrorKind::BufferAllocFailure,
            Self::Io { .. }
            | Self::ShortRead { .. }
            | Self::FrameSize { .. }
            | Self::PoolState(_)
            | Self::Validation(_)
            | Self::Timeout(_) => ErrorKind::IoFailure,
            Self::UnknownControl(_) | Self::ControlAccess(_) => ErrorKind::ControlAccessFailure,
            Self::NotOpen => ErrorKind::NotOpen,
            Self::Config(_) => ErrorKind::Configuration,
            Self::ReopenExhausted { .. } => ErrorKind::ReopenExhausted,
        }
    }

    /// Whether the error came from the OS reporting that the device vanished.
    pub fn is_device_lost(&self) -> bool {
        match self {
            Self::Io { source, .. } | Self::OpenFailed { source, .. } => {
                matches!(source.raw_os_error(), Some(libc::ENODEV | libc::ENXIO | libc::ENOENT))
            }
            _ => false,
        }
    }
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;
