//! Core traits and types for V4L2 still capture.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::controls::ControlDescriptor;
use crate::error::{CameraError, Result};

/// Pixel format code as the driver sees it (e.g., YUYV, GREY, MJPG).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
    /// GREY pixel format (8-bit luma only).
    pub const GREY: Self = Self::new(b"GREY");
    /// RGB3 pixel format (24-bit RGB).
    pub const RGB3: Self = Self::new(b"RGB3");
    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Pixel formats the capture core can size frames for.
///
/// Formats advertised by a device that the core has no frame size for are
/// carried as [`PixelFormat::Other`] and refused by format negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum PixelFormat {
    /// 8-bit greyscale.
    Grey,
    /// YUYV 4:2:2 packed, 2 bytes per pixel.
    Yuyv,
    /// 24-bit packed RGB.
    Rgb24,
    /// Any other driver format.
    Other(FourCC),
}

impl PixelFormat {
    /// Bytes one pixel occupies, or 0 when unknown.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Grey => 1,
            Self::Yuyv => 2,
            Self::Rgb24 => 3,
            Self::Other(_) => 0,
        }
    }

    /// Driver code for this format.
    #[must_use]
    pub const fn fourcc(self) -> FourCC {
        match self {
            Self::Grey => FourCC::GREY,
            Self::Yuyv => FourCC::YUYV,
            Self::Rgb24 => FourCC::RGB3,
            Self::Other(code) => code,
        }
    }

    /// Map a driver code back to the abstract format.
    #[must_use]
    pub fn from_fourcc(code: FourCC) -> Self {
        match code {
            FourCC::GREY => Self::Grey,
            FourCC::YUYV => Self::Yuyv,
            FourCC::RGB3 => Self::Rgb24,
            other => Self::Other(other),
        }
    }

    /// Size in bytes of one frame with the given dimensions.
    #[must_use]
    pub const fn frame_size(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel() as usize
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fourcc().fmt(f)
    }
}

impl FromStr for PixelFormat {
    type Err = CameraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GREY" | "GRAY" => Ok(Self::Grey),
            "YUYV" => Ok(Self::Yuyv),
            "RGB3" | "RGB24" => Ok(Self::Rgb24),
            other => Err(CameraError::Config(format!("unknown pixel format {other:?}"))),
        }
    }
}

impl TryFrom<String> for PixelFormat {
    type Error = CameraError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Wire-level video format exchanged with the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Bytes per line (stride).
    pub stride: u32,
    /// Total frame size in bytes.
    pub size: u32,
}

impl Format {
    /// Create a format request for a sized pixel format.
    ///
    /// Stride and size saturate at `u32::MAX`; [`Format::checked`] rejects
    /// such geometry instead.
    #[must_use]
    pub const fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width.saturating_mul(format.bytes_per_pixel());
        Self {
            width,
            height,
            fourcc: format.fourcc(),
            stride,
            size: stride.saturating_mul(height),
        }
    }

    /// Like [`Format::new`], or `None` if stride or size overflow 32 bits.
    #[must_use]
    pub const fn checked(width: u32, height: u32, format: PixelFormat) -> Option<Self> {
        let Some(stride) = width.checked_mul(format.bytes_per_pixel()) else {
            return None;
        };
        let Some(size) = stride.checked_mul(height) else {
            return None;
        };
        Some(Self {
            width,
            height,
            fourcc: format.fourcc(),
            stride,
            size,
        })
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.fourcc)
    }
}

/// A concrete capture configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Human readable format description, as reported by the driver.
    pub description: String,
    /// Pixel format.
    pub format: PixelFormat,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second.
    pub framerate: u32,
}

impl Settings {
    /// Create settings for a capture request.
    #[must_use]
    pub const fn new(width: u32, height: u32, format: PixelFormat, framerate: u32) -> Self {
        Self {
            description: String::new(),
            format,
            width,
            height,
            framerate,
        }
    }

    /// Size in bytes of one frame captured with these settings.
    #[must_use]
    pub const fn frame_size(&self) -> usize {
        self.format.frame_size(self.width, self.height)
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}x{} @ {} fps",
            self.format, self.width, self.height, self.framerate
        )
    }
}

/// Capture transport, chosen once per open session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// Blocking `read(2)` of whole frames.
    ReadWrite,
    /// Memory-mapped buffers circulated through the driver queue.
    Streaming,
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
    /// Whether the device supports read/write I/O.
    pub can_read_write: bool,
}

impl DeviceCapabilities {
    /// Pick the transport for a session, preferring streaming.
    pub fn select_io_mode(&self) -> Result<IoMode> {
        if !self.can_capture {
            return Err(CameraError::Capability(format!(
                "{} ({}) cannot capture video",
                self.card, self.driver
            )));
        }
        if self.can_stream {
            Ok(IoMode::Streaming)
        } else if self.can_read_write {
            Ok(IoMode::ReadWrite)
        } else {
            Err(CameraError::NoSupportedIoMode)
        }
    }
}

/// Time per frame as a rational number of seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    /// Numerator.
    pub numerator: u32,
    /// Denominator.
    pub denominator: u32,
}

impl Interval {
    /// Create an interval of `numerator / denominator` seconds.
    #[must_use]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Interval of one frame at `fps` frames per second.
    #[must_use]
    pub const fn from_fps(fps: u32) -> Self {
        Self::new(1, fps)
    }

    /// Integer frames per second, `None` for a zero numerator.
    #[must_use]
    pub const fn fps(self) -> Option<u32> {
        if self.numerator == 0 {
            None
        } else {
            Some(self.denominator / self.numerator)
        }
    }

    /// Interval length in seconds, `None` for a zero denominator.
    #[must_use]
    pub fn seconds(self) -> Option<f64> {
        (self.denominator != 0).then(|| f64::from(self.numerator) / f64::from(self.denominator))
    }
}

/// A pixel format advertised by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDescription {
    /// Driver code.
    pub fourcc: FourCC,
    /// Driver supplied description.
    pub description: String,
}

/// Frame sizes supported for one pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSizeRange {
    /// A single size.
    Discrete {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
    },
    /// A range walked in fixed steps.
    Stepwise {
        /// Smallest width.
        min_width: u32,
        /// Largest width.
        max_width: u32,
        /// Width increment.
        step_width: u32,
        /// Smallest height.
        min_height: u32,
        /// Largest height.
        max_height: u32,
        /// Height increment.
        step_height: u32,
    },
    /// Any size within the bounds.
    Continuous {
        /// Smallest width.
        min_width: u32,
        /// Largest width.
        max_width: u32,
        /// Smallest height.
        min_height: u32,
        /// Largest height.
        max_height: u32,
    },
}

/// Frame intervals supported for one format and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameIntervalRange {
    /// A single interval.
    Discrete(Interval),
    /// A range walked in fixed steps.
    Stepwise {
        /// Shortest interval.
        min: Interval,
        /// Longest interval.
        max: Interval,
        /// Increment.
        step: Interval,
    },
    /// Any interval within the bounds.
    Continuous {
        /// Shortest interval.
        min: Interval,
        /// Longest interval.
        max: Interval,
    },
}

impl From<Interval> for FrameIntervalRange {
    fn from(interval: Interval) -> Self {
        Self::Discrete(interval)
    }
}

/// A filled buffer taken off the driver queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    /// Pool index of the buffer.
    pub index: u32,
    /// Bytes the driver wrote.
    pub bytes_used: u32,
    /// Driver frame counter.
    pub sequence: u32,
    /// Kernel capture timestamp (monotonic clock).
    pub timestamp: Duration,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, Default)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Bytes delivered for the frame.
    pub bytes_used: u32,
}

/// Destination for captured frames.
///
/// The buffer is sized by [`Frame::resize`]; capture never resizes it.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    /// Metadata of the most recent capture.
    pub metadata: FrameMetadata,
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl Frame {
    /// Create an empty frame.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            data: Vec::new(),
            width: 0,
            height: 0,
            format: PixelFormat::Yuyv,
            metadata: FrameMetadata {
                sequence: 0,
                timestamp: Duration::ZERO,
                bytes_used: 0,
            },
        }
    }

    /// Create a frame sized for `settings`.
    #[must_use]
    pub fn for_settings(settings: &Settings) -> Self {
        let mut frame = Self::new();
        frame.resize(settings.width, settings.height, settings.format);
        frame
    }

    /// Resize the buffer to hold one frame of the given geometry.
    pub fn resize(&mut self, width: u32, height: u32, format: PixelFormat) {
        self.width = width;
        self.height = height;
        self.format = format;
        self.data.resize(format.frame_size(width, height), 0);
    }

    /// Frame width in pixels.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Pixel format of the buffer.
    pub const fn format(&self) -> PixelFormat {
        self.format
    }

    /// Raw pixel bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw pixel bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Buffer size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer has not been sized yet.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A driver buffer mapped into the process. Dropping it unmaps it.
pub trait MappedRegion {
    /// The mapped bytes.
    fn as_bytes(&self) -> &[u8];

    /// Length of the mapping.
    fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Whether the mapping is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Driver operations on an open capture device node.
///
/// Every call blocks on the driver. Implementations hold an exclusive handle;
/// dropping the value closes it.
pub trait VideoDevice {
    /// Mapped view of one streaming buffer.
    type Region: MappedRegion;

    /// Query capability bits.
    fn query_capabilities(&self) -> Result<DeviceCapabilities>;

    /// Get the current format.
    fn format(&self) -> Result<Format>;

    /// Request a format. Returns what the driver wrote back.
    fn set_format(&mut self, format: &Format) -> Result<Format>;

    /// Get the current time per frame.
    fn frame_interval(&self) -> Result<Interval>;

    /// Request a time per frame. Returns what the driver wrote back.
    fn set_frame_interval(&mut self, interval: Interval) -> Result<Interval>;

    /// List advertised pixel formats.
    fn enum_formats(&self) -> Result<Vec<FormatDescription>>;

    /// List frame sizes for a pixel format.
    fn enum_frame_sizes(&self, fourcc: FourCC) -> Result<Vec<FrameSizeRange>>;

    /// List frame intervals for a pixel format and size.
    fn enum_frame_intervals(
        &self,
        fourcc: FourCC,
        width: u32,
        height: u32,
    ) -> Result<Vec<FrameIntervalRange>>;

    /// First control with an id greater than `after`, `None` once exhausted.
    fn next_control(&self, after: u32) -> Result<Option<ControlDescriptor>>;

    /// Read a control through the standard control interface.
    fn control(&self, id: u32) -> Result<i32>;

    /// Write a control through the standard control interface.
    fn set_control(&mut self, id: u32, value: i32) -> Result<()>;

    /// Read a control through the extended control interface.
    fn ext_control(&self, id: u32) -> Result<i32>;

    /// Write a control through the extended control interface.
    fn set_ext_control(&mut self, id: u32, value: i32) -> Result<()>;

    /// Ask the driver for `count` mmap buffers. Returns the granted count; 0 frees them.
    fn request_buffers(&mut self, count: u32) -> Result<u32>;

    /// Query buffer `index` and map it into the process.
    fn map_buffer(&mut self, index: u32) -> Result<Self::Region>;

    /// Hand buffer `index` to the driver capture queue.
    fn queue_buffer(&mut self, index: u32) -> Result<()>;

    /// Take the next filled buffer off the queue.
    fn dequeue_buffer(&mut self, timeout: Option<Duration>) -> Result<DequeuedBuffer>;

    /// Start streaming.
    fn stream_on(&mut self) -> Result<()>;

    /// Stop streaming. All queued buffers return to the application.
    fn stream_off(&mut self) -> Result<()>;

    /// One `read(2)` into `dest`. Returns the number of bytes read.
    fn read_frame(&mut self, dest: &mut [u8], timeout: Option<Duration>) -> Result<usize>;
}

/// Opens [`VideoDevice`]s by path.
pub trait DeviceOpener {
    /// Device type produced.
    type Device: VideoDevice;

    /// Open the node at `path` for reading and writing.
    fn open(&mut self, path: &str) -> Result<Self::Device>;
}

/// A frame source with a managed lifecycle.
pub trait Camera {
    /// Open `path` and negotiate `settings`.
    fn open(&mut self, path: &str, settings: &Settings) -> Result<()>;

    /// Release all resources. Closing a closed camera succeeds.
    fn close(&mut self) -> Result<()>;

    /// Re-query the device without changing state; an error signals device loss.
    fn check_ready(&mut self) -> Result<()>;

    /// Boolean form of [`Camera::check_ready`].
    fn is_ready(&mut self) -> bool {
        self.check_ready().is_ok()
    }

    /// Capture exactly one frame into `frame`.
    fn capture_image(&mut self, frame: &mut Frame) -> Result<()>;

    /// Close (ignoring errors) and open again with the last path and settings.
    fn reopen(&mut self) -> Result<()>;

    /// Settings of the last open request.
    fn settings(&self) -> Option<&Settings>;
}
