//! Mock device implementation for testing without hardware.
//!
//! A [`MockDevice`] behaves like a small V4L2 driver: it adjusts format and
//! framerate requests to its limits, keeps a buffer queue and counts every
//! call. Its state is shared through an `Rc<RefCell<_>>` so tests keep a
//! handle after the device is moved into a camera.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::controls::ControlDescriptor;
use crate::error::{CameraError, Result};
use crate::traits::{
    DequeuedBuffer, DeviceCapabilities, DeviceOpener, Format, FormatDescription, FourCC,
    FrameIntervalRange, FrameSizeRange, Interval, MappedRegion, PixelFormat, VideoDevice,
};

/// Device operations that are counted and can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Open,
    QueryCaps,
    GetFormat,
    SetFormat,
    GetInterval,
    SetInterval,
    EnumFormats,
    EnumFrameSizes,
    EnumFrameIntervals,
    QueryControl,
    GetControl,
    SetControl,
    GetExtControl,
    SetExtControl,
    RequestBuffers,
    MapBuffer,
    QueueBuffer,
    DequeueBuffer,
    StreamOn,
    StreamOff,
    Read,
}

impl MockOp {
    const fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::QueryCaps => "VIDIOC_QUERYCAP",
            Self::GetFormat => "VIDIOC_G_FMT",
            Self::SetFormat => "VIDIOC_S_FMT",
            Self::GetInterval => "VIDIOC_G_PARM",
            Self::SetInterval => "VIDIOC_S_PARM",
            Self::EnumFormats => "VIDIOC_ENUM_FMT",
            Self::EnumFrameSizes => "VIDIOC_ENUM_FRAMESIZES",
            Self::EnumFrameIntervals => "VIDIOC_ENUM_FRAMEINTERVALS",
            Self::QueryControl => "VIDIOC_QUERYCTRL",
            Self::GetControl => "VIDIOC_G_CTRL",
            Self::SetControl => "VIDIOC_S_CTRL",
            Self::GetExtControl => "VIDIOC_G_EXT_CTRLS",
            Self::SetExtControl => "VIDIOC_S_EXT_CTRLS",
            Self::RequestBuffers => "VIDIOC_REQBUFS",
            Self::MapBuffer => "mmap",
            Self::QueueBuffer => "VIDIOC_QBUF",
            Self::DequeueBuffer => "VIDIOC_DQBUF",
            Self::StreamOn => "VIDIOC_STREAMON",
            Self::StreamOff => "VIDIOC_STREAMOFF",
            Self::Read => "read",
        }
    }
}

/// Test pattern types for mock frame generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    /// SMPTE color bars pattern.
    ColorBars,
    /// Horizontal gradient from dark to light.
    Gradient,
    /// Solid color with specified Y, U, V values.
    Solid(u8, u8, u8),
}

/// YUV values of the 8 bars: White, Yellow, Cyan, Green, Magenta, Red, Blue, Black.
const COLOR_BARS: [(u8, u8, u8); 8] = [
    (235, 128, 128),
    (210, 16, 146),
    (170, 166, 16),
    (145, 54, 34),
    (106, 202, 222),
    (81, 90, 240),
    (41, 240, 110),
    (16, 128, 128),
];

impl TestPattern {
    /// Y, U, V of column `x` in a frame `width` pixels wide.
    fn sample(self, x: u32, width: u32) -> (u8, u8, u8) {
        match self {
            Self::ColorBars => {
                let bar_width = (width / 8).max(1);
                let bar = (x / bar_width).min(7) as usize;
                COLOR_BARS.get(bar).copied().unwrap_or((16, 128, 128))
            }
            Self::Gradient => {
                #[allow(clippy::cast_possible_truncation)]
                let y = ((u64::from(x) * 255) / u64::from(width.max(1))) as u8;
                (y, 128, 128)
            }
            Self::Solid(y, u, v) => (y, u, v),
        }
    }
}

/// Render `pattern` into a frame buffer of the given geometry.
pub fn render_pattern(
    data: &mut [u8],
    width: u32,
    height: u32,
    format: PixelFormat,
    pattern: TestPattern,
) {
    let width = width.max(1);
    let pixels = width as usize * height as usize;

    match format {
        PixelFormat::Yuyv => {
            for (i, px) in data.chunks_exact_mut(4).take(pixels / 2).enumerate() {
                #[allow(clippy::cast_possible_truncation)]
                let x = ((i * 2) % width as usize) as u32;
                let (y, u, v) = pattern.sample(x, width);
                px.copy_from_slice(&[y, u, y, v]);
            }
        }
        PixelFormat::Grey => {
            for (i, px) in data.iter_mut().take(pixels).enumerate() {
                #[allow(clippy::cast_possible_truncation)]
                let x = (i % width as usize) as u32;
                *px = pattern.sample(x, width).0;
            }
        }
        PixelFormat::Rgb24 | PixelFormat::Other(_) => {
            for (i, px) in data.chunks_exact_mut(3).take(pixels).enumerate() {
                #[allow(clippy::cast_possible_truncation)]
                let x = (i % width as usize) as u32;
                let y = pattern.sample(x, width).0;
                px.copy_from_slice(&[y, y, y]);
            }
        }
    }
}

/// Byte every mapped buffer `index` is filled with when no pattern is set.
pub const fn region_fill(index: u32) -> u8 {
    #[allow(clippy::cast_possible_truncation)]
    let fill = (index % 250) as u8;
    fill + 1
}

/// Byte read-mode captures are filled with when no pattern is set.
pub const READ_FILL: u8 = 0xA5;

/// Shared state of a mock device.
#[derive(Debug)]
pub struct MockState {
    calls: HashMap<MockOp, usize>,
    failures: HashSet<MockOp>,
    device_lost: bool,

    capabilities: DeviceCapabilities,
    format: Format,
    interval: Interval,
    max_size: Option<(u32, u32)>,
    min_stride: u32,
    supported: Option<Vec<FourCC>>,
    max_fps: Option<u32>,
    catalog: Vec<(FormatDescription, Vec<FrameSizeRange>)>,
    intervals: Vec<FrameIntervalRange>,

    controls: Vec<ControlDescriptor>,
    values: HashMap<u32, i32>,
    clamps: HashMap<u32, i32>,

    granted_buffers: Option<u32>,
    map_failure_at: Option<u32>,
    driver_buffers: u32,
    mapped: usize,
    unmapped: Rc<Cell<usize>>,
    queue: VecDeque<u32>,
    streaming: bool,
    sequence: u32,
    stalled: bool,
    short_read: Option<usize>,
    pattern: Option<TestPattern>,
    open_handles: usize,
}

impl MockState {
    fn new() -> Self {
        Self {
            calls: HashMap::new(),
            failures: HashSet::new(),
            device_lost: false,
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
                can_read_write: true,
            },
            format: Format::new(640, 480, PixelFormat::Yuyv),
            interval: Interval::from_fps(30),
            max_size: None,
            min_stride: 0,
            supported: None,
            max_fps: None,
            catalog: vec![(
                FormatDescription {
                    fourcc: FourCC::YUYV,
                    description: "YUYV 4:2:2".to_owned(),
                },
                vec![
                    FrameSizeRange::Discrete {
                        width: 640,
                        height: 480,
                    },
                    FrameSizeRange::Discrete {
                        width: 1280,
                        height: 720,
                    },
                ],
            )],
            intervals: vec![
                FrameIntervalRange::Discrete(Interval::new(1, 30)),
                FrameIntervalRange::Discrete(Interval::new(1, 15)),
            ],
            controls: Vec::new(),
            values: HashMap::new(),
            clamps: HashMap::new(),
            granted_buffers: None,
            map_failure_at: None,
            driver_buffers: 0,
            mapped: 0,
            unmapped: Rc::new(Cell::new(0)),
            queue: VecDeque::new(),
            streaming: false,
            sequence: 0,
            stalled: false,
            short_read: None,
            pattern: None,
            open_handles: 0,
        }
    }

    /// Number of times `op` was called.
    pub fn calls(&self, op: MockOp) -> usize {
        self.calls.get(&op).copied().unwrap_or(0)
    }

    /// Last value written to control `id`, `None` if never written.
    pub fn control_value(&self, id: u32) -> Option<i32> {
        self.values.get(&id).copied()
    }

    /// Buffers mapped so far.
    pub const fn mapped(&self) -> usize {
        self.mapped
    }

    /// Buffers unmapped so far.
    pub fn unmapped(&self) -> usize {
        self.unmapped.get()
    }

    /// Buffers currently allocated in the driver.
    pub const fn driver_buffers(&self) -> u32 {
        self.driver_buffers
    }

    /// Whether the stream is on.
    pub const fn streaming(&self) -> bool {
        self.streaming
    }

    /// Buffers waiting in the driver queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Open handles created by a [`MockOpener`].
    pub const fn open_handles(&self) -> usize {
        self.open_handles
    }

    /// Current format.
    pub const fn format(&self) -> &Format {
        &self.format
    }

    /// Make `op` fail from now on.
    pub fn set_failure(&mut self, op: MockOp) {
        self.failures.insert(op);
    }

    /// Let `op` succeed again.
    pub fn clear_failure(&mut self, op: MockOp) {
        self.failures.remove(&op);
    }

    /// Stop (`true`) or resume (`false`) frame delivery. A stalled device
    /// lets every wait run into its timeout.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    /// Simulate unplugging (`true`) or replugging (`false`) the device.
    pub fn set_device_lost(&mut self, lost: bool) {
        self.device_lost = lost;
    }

    fn enter(&mut self, op: MockOp) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        if self.device_lost {
            return Err(CameraError::io(op.name())(io::Error::from_raw_os_error(
                libc::ENODEV,
            )));
        }
        if self.failures.contains(&op) {
            return Err(CameraError::io(op.name())(io::Error::from_raw_os_error(
                libc::EIO,
            )));
        }
        Ok(())
    }

    fn fill(&self, data: &mut [u8], fallback: u8) {
        match self.pattern {
            Some(pattern) => {
                let format = PixelFormat::from_fourcc(self.format.fourcc);
                render_pattern(data, self.format.width, self.format.height, format, pattern);
            }
            None => data.fill(fallback),
        }
    }
}

/// Mock device for testing without hardware.
#[derive(Debug)]
pub struct MockDevice {
    state: Rc<RefCell<MockState>>,
    counted: bool,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device: 640x480 YUYV at 30 fps, streaming and read capable.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState::new())),
            counted: false,
        }
    }

    /// Handle on the shared state.
    pub fn state(&self) -> Rc<RefCell<MockState>> {
        Rc::clone(&self.state)
    }

    fn with(self, f: impl FnOnce(&mut MockState)) -> Self {
        f(&mut self.state.borrow_mut());
        self
    }

    /// Set the capabilities for this mock device.
    #[must_use]
    pub fn with_capabilities(self, capabilities: DeviceCapabilities) -> Self {
        self.with(|s| s.capabilities = capabilities)
    }

    /// Make `op` fail.
    #[must_use]
    pub fn with_failure(self, op: MockOp) -> Self {
        self.with(|s| s.set_failure(op))
    }

    /// Clamp requested sizes to at most `width` x `height`.
    #[must_use]
    pub fn with_max_size(self, width: u32, height: u32) -> Self {
        self.with(|s| s.max_size = Some((width, height)))
    }

    /// Format reported before any `set_format`.
    #[must_use]
    pub fn with_initial_format(self, format: Format) -> Self {
        self.with(|s| s.format = format)
    }

    /// Pad lines to at least `stride` bytes.
    #[must_use]
    pub fn with_min_stride(self, stride: u32) -> Self {
        self.with(|s| s.min_stride = stride)
    }

    /// Substitute the first of `codes` for any other requested pixel format.
    #[must_use]
    pub fn with_supported_fourccs(self, codes: &[FourCC]) -> Self {
        self.with(|s| s.supported = Some(codes.to_vec()))
    }

    /// Clamp requested framerates to at most `fps`.
    #[must_use]
    pub fn with_max_fps(self, fps: u32) -> Self {
        self.with(|s| s.max_fps = Some(fps))
    }

    /// Replace the advertised formats, sizes and intervals.
    #[must_use]
    pub fn with_catalog(
        self,
        formats: Vec<(FormatDescription, Vec<FrameSizeRange>)>,
        intervals: Vec<FrameIntervalRange>,
    ) -> Self {
        self.with(|s| {
            s.catalog = formats;
            s.intervals = intervals;
        })
    }

    /// Controls reported by the device, in any order.
    #[must_use]
    pub fn with_controls(self, mut controls: Vec<ControlDescriptor>) -> Self {
        controls.sort_by_key(|c| c.id);
        self.with(|s| s.controls = controls)
    }

    /// Values written to control `id` are clamped to `max`.
    #[must_use]
    pub fn with_control_clamp(self, id: u32, max: i32) -> Self {
        self.with(|s| {
            s.clamps.insert(id, max);
        })
    }

    /// Grant at most `count` buffers.
    #[must_use]
    pub fn with_granted_buffers(self, count: u32) -> Self {
        self.with(|s| s.granted_buffers = Some(count))
    }

    /// Fail mapping buffer `index`.
    #[must_use]
    pub fn with_map_failure_at(self, index: u32) -> Self {
        self.with(|s| s.map_failure_at = Some(index))
    }

    /// Deliver only `len` bytes per read.
    #[must_use]
    pub fn with_short_read(self, len: usize) -> Self {
        self.with(|s| s.short_read = Some(len))
    }

    /// Fill frames with `pattern` instead of constant bytes.
    #[must_use]
    pub fn with_pattern(self, pattern: TestPattern) -> Self {
        self.with(|s| s.pattern = Some(pattern))
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        if !self.counted {
            return;
        }
        // Closing the node frees driver buffers and stops the stream.
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.open_handles = state.open_handles.saturating_sub(1);
            state.streaming = false;
            state.queue.clear();
            state.driver_buffers = 0;
        }
    }
}

/// Mapped buffer of a [`MockDevice`].
#[derive(Debug)]
pub struct MockRegion {
    data: Vec<u8>,
    unmapped: Rc<Cell<usize>>,
}

impl MappedRegion for MockRegion {
    fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for MockRegion {
    fn drop(&mut self) {
        self.unmapped.set(self.unmapped.get() + 1);
    }
}

impl VideoDevice for MockDevice {
    type Region = MockRegion;

    fn query_capabilities(&self) -> Result<DeviceCapabilities> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::QueryCaps)?;
        Ok(state.capabilities.clone())
    }

    fn format(&self) -> Result<Format> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::GetFormat)?;
        Ok(state.format.clone())
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::SetFormat)?;

        let (mut width, mut height) = (format.width, format.height);
        if let Some((max_w, max_h)) = state.max_size {
            width = width.min(max_w);
            height = height.min(max_h);
        }
        let fourcc = match &state.supported {
            Some(codes) if !codes.contains(&format.fourcc) => {
                codes.first().copied().unwrap_or(format.fourcc)
            }
            _ => format.fourcc,
        };

        // Like most drivers, keep the caller's bytesperline for an unclamped
        // width if it is wide enough.
        let packed = Format::new(width, height, PixelFormat::from_fourcc(fourcc));
        let requested_stride = if width == format.width { format.stride } else { 0 };
        let stride = packed.stride.max(requested_stride).max(state.min_stride);
        state.format = Format {
            stride,
            size: stride.saturating_mul(height),
            ..packed
        };
        Ok(state.format.clone())
    }

    fn frame_interval(&self) -> Result<Interval> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::GetInterval)?;
        Ok(state.interval)
    }

    fn set_frame_interval(&mut self, interval: Interval) -> Result<Interval> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::SetInterval)?;

        let mut fps = interval.fps().unwrap_or(1).max(1);
        if let Some(max) = state.max_fps {
            fps = fps.min(max);
        }
        state.interval = Interval::from_fps(fps);
        Ok(state.interval)
    }

    fn enum_formats(&self) -> Result<Vec<FormatDescription>> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::EnumFormats)?;
        Ok(state.catalog.iter().map(|(desc, _)| desc.clone()).collect())
    }

    fn enum_frame_sizes(&self, fourcc: FourCC) -> Result<Vec<FrameSizeRange>> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::EnumFrameSizes)?;
        state
            .catalog
            .iter()
            .find(|(desc, _)| desc.fourcc == fourcc)
            .map(|(_, sizes)| sizes.clone())
            .ok_or_else(|| {
                CameraError::io("VIDIOC_ENUM_FRAMESIZES")(io::Error::from_raw_os_error(
                    libc::EINVAL,
                ))
            })
    }

    fn enum_frame_intervals(
        &self,
        _fourcc: FourCC,
        _width: u32,
        _height: u32,
    ) -> Result<Vec<FrameIntervalRange>> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::EnumFrameIntervals)?;
        Ok(state.intervals.clone())
    }

    fn next_control(&self, after: u32) -> Result<Option<ControlDescriptor>> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::QueryControl)?;
        Ok(state.controls.iter().find(|c| c.id > after).cloned())
    }

    fn control(&self, id: u32) -> Result<i32> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::GetControl)?;
        Ok(state.values.get(&id).copied().unwrap_or(0))
    }

    fn set_control(&mut self, id: u32, value: i32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::SetControl)?;
        write_control(&mut state, id, value)
    }

    fn ext_control(&self, id: u32) -> Result<i32> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::GetExtControl)?;
        Ok(state.values.get(&id).copied().unwrap_or(0))
    }

    fn set_ext_control(&mut self, id: u32, value: i32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::SetExtControl)?;
        write_control(&mut state, id, value)
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::RequestBuffers)?;
        let granted = state.granted_buffers.map_or(count, |max| count.min(max));
        state.driver_buffers = granted;
        state.queue.clear();
        Ok(granted)
    }

    fn map_buffer(&mut self, index: u32) -> Result<Self::Region> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::MapBuffer)?;
        if state.map_failure_at == Some(index) || index >= state.driver_buffers {
            return Err(CameraError::io("mmap")(io::Error::from_raw_os_error(
                libc::ENOMEM,
            )));
        }

        let mut data = vec![0; state.format.size as usize];
        state.fill(&mut data, region_fill(index));
        state.mapped += 1;
        Ok(MockRegion {
            data,
            unmapped: Rc::clone(&state.unmapped),
        })
    }

    fn queue_buffer(&mut self, index: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::QueueBuffer)?;
        if index >= state.driver_buffers || state.queue.contains(&index) {
            return Err(CameraError::io("VIDIOC_QBUF")(io::Error::from_raw_os_error(
                libc::EINVAL,
            )));
        }
        state.queue.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self, timeout: Option<Duration>) -> Result<DequeuedBuffer> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::DequeueBuffer)?;
        if !state.streaming {
            return Err(CameraError::io("VIDIOC_DQBUF")(io::Error::from_raw_os_error(
                libc::EINVAL,
            )));
        }
        if state.stalled {
            return Err(CameraError::Timeout(timeout.unwrap_or_default()));
        }
        let Some(index) = state.queue.pop_front() else {
            return Err(CameraError::Timeout(timeout.unwrap_or_default()));
        };

        let sequence = state.sequence;
        state.sequence += 1;
        Ok(DequeuedBuffer {
            index,
            bytes_used: state.format.size,
            sequence,
            timestamp: Duration::from_millis(u64::from(sequence) * 33),
        })
    }

    fn stream_on(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::StreamOn)?;
        state.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        // The queue is flushed even when the call reports an error.
        state.queue.clear();
        state.enter(MockOp::StreamOff)?;
        state.streaming = false;
        Ok(())
    }

    fn read_frame(&mut self, dest: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        let mut state = self.state.borrow_mut();
        state.enter(MockOp::Read)?;
        if state.stalled {
            return Err(CameraError::Timeout(timeout.unwrap_or_default()));
        }

        let len = state.short_read.unwrap_or(dest.len()).min(dest.len());
        state.fill(dest, READ_FILL);
        state.sequence += 1;
        Ok(len)
    }
}

fn write_control(state: &mut MockState, id: u32, value: i32) -> Result<()> {
    if !state.controls.iter().any(|c| c.id == id) {
        return Err(CameraError::io("VIDIOC_S_CTRL")(io::Error::from_raw_os_error(
            libc::EINVAL,
        )));
    }
    let value = state.clamps.get(&id).map_or(value, |&max| value.min(max));
    state.values.insert(id, value);
    Ok(())
}

/// Hands out [`MockDevice`]s that share one state.
#[derive(Debug)]
pub struct MockOpener {
    state: Rc<RefCell<MockState>>,
}

impl MockOpener {
    /// Opener producing handles onto `device`'s state.
    pub fn new(device: &MockDevice) -> Self {
        Self {
            state: device.state(),
        }
    }
}

impl DeviceOpener for MockOpener {
    type Device = MockDevice;

    fn open(&mut self, path: &str) -> Result<Self::Device> {
        let mut state = self.state.borrow_mut();
        if let Err(err) = state.enter(MockOp::Open) {
            let source = match err {
                CameraError::Io { source, .. } => source,
                _ => io::Error::from_raw_os_error(libc::EIO),
            };
            return Err(CameraError::OpenFailed {
                path: path.to_owned(),
                source,
            });
        }
        state.open_handles += 1;
        drop(state);

        Ok(MockDevice {
            state: Rc::clone(&self.state),
            counted: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        let caps = device.query_capabilities().expect("query should succeed");
        assert_eq!(caps.driver, "mock");
        assert!(caps.can_capture);
        assert!(caps.can_stream);
    }

    #[test]
    fn test_mock_device_adjusts_format() {
        let mut device = MockDevice::new().with_max_size(800, 600);
        let applied = device
            .set_format(&Format::new(1280, 720, PixelFormat::Grey))
            .expect("set_format should succeed");
        assert_eq!((applied.width, applied.height), (800, 600));
        assert_eq!(applied.size, 800 * 600);
    }

    #[test]
    fn test_color_bars_pattern() {
        let mut data = vec![0u8; 640 * 480 * 2];
        render_pattern(&mut data, 640, 480, PixelFormat::Yuyv, TestPattern::ColorBars);

        // First bar: white
        assert_eq!(data.get(..4), Some(&[235, 128, 235, 128][..]));
        // Last bar: black
        let last = data.len() - 4;
        assert_eq!(data.get(last..), Some(&[16, 128, 16, 128][..]));
    }

    #[test]
    fn test_gradient_pattern_grey() {
        let mut data = vec![0u8; 256 * 2];
        render_pattern(&mut data, 256, 2, PixelFormat::Grey, TestPattern::Gradient);
        assert_eq!(data.first(), Some(&0));
        assert_eq!(data.get(255), Some(&254));
        assert_eq!(data.get(256), Some(&0));
    }

    #[test]
    fn test_opener_tracks_handles() {
        let device = MockDevice::new();
        let state = device.state();
        let mut opener = MockOpener::new(&device);

        let handle = opener.open("/dev/video0").expect("open should succeed");
        assert_eq!(state.borrow().open_handles(), 1);
        drop(handle);
        assert_eq!(state.borrow().open_handles(), 0);

        state.borrow_mut().set_device_lost(true);
        let err = opener.open("/dev/video0").expect_err("device is gone");
        assert!(err.is_device_lost());
    }
}
