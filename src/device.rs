//! V4L2 device implementation using the v4l crate.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use log::debug;
use v4l::capability::Flags;
use v4l::frameinterval::FrameIntervalEnum;
use v4l::framesize::FrameSizeEnum;
use v4l::video::Capture;
use v4l::{Device, Fraction};

use crate::controls::ControlDescriptor;
use crate::error::{CameraError, Result};
use crate::sys::{self, MmapRegion};
use crate::traits::{
    DequeuedBuffer, DeviceCapabilities, DeviceOpener, Format, FormatDescription, FourCC,
    FrameIntervalRange, FrameSizeRange, Interval, VideoDevice,
};

/// A video node found on the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    /// Device path, e.g. `/dev/video0`.
    pub path: String,
    /// Name reported by the kernel, if any.
    pub name: Option<String>,
}

/// List the video nodes present on the system.
pub fn available_devices() -> Vec<DeviceNode> {
    let mut nodes: Vec<DeviceNode> = v4l::context::enum_devices()
        .into_iter()
        .map(|node| DeviceNode {
            path: node.path().display().to_string(),
            name: node.name(),
        })
        .collect();
    nodes.sort_by(|a, b| a.path.cmp(&b.path));
    nodes
}

/// V4L2 device wrapping the v4l crate.
pub struct V4l2Device {
    device: Device,
    fd: RawFd,
    path: String,
}

impl std::fmt::Debug for V4l2Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4l2Device")
            .field("path", &self.path)
            .field("fd", &self.fd)
            .finish_non_exhaustive()
    }
}

impl V4l2Device {
    /// Open the device node at `path`.
    pub fn open(path: &str) -> Result<Self> {
        let device = Device::with_path(path).map_err(|source| CameraError::OpenFailed {
            path: path.to_owned(),
            source,
        })?;
        let fd = device.handle().fd();
        debug!("opened {path} (fd {fd})");

        Ok(Self {
            device,
            fd,
            path: path.to_owned(),
        })
    }

    fn wait_readable(&self, timeout: Option<Duration>) -> Result<()> {
        if sys::poll_readable(self.fd, timeout)? {
            Ok(())
        } else {
            Err(CameraError::Timeout(timeout.unwrap_or_default()))
        }
    }
}

fn to_format(fmt: &v4l::Format) -> Format {
    Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        stride: fmt.stride,
        size: fmt.size,
    }
}

const fn to_interval(fraction: Fraction) -> Interval {
    Interval::new(fraction.numerator, fraction.denominator)
}

impl VideoDevice for V4l2Device {
    type Region = MmapRegion;

    fn query_capabilities(&self) -> Result<DeviceCapabilities> {
        let caps = self
            .device
            .query_caps()
            .map_err(CameraError::io("VIDIOC_QUERYCAP"))?;

        Ok(DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(Flags::STREAMING),
            can_read_write: caps.capabilities.contains(Flags::READ_WRITE),
        })
    }

    fn format(&self) -> Result<Format> {
        let fmt = self
            .device
            .format()
            .map_err(CameraError::io("VIDIOC_G_FMT"))?;
        Ok(to_format(&fmt))
    }

    fn set_format(&mut self, format: &Format) -> Result<Format> {
        let mut fmt = self
            .device
            .format()
            .map_err(CameraError::io("VIDIOC_G_FMT"))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();
        // S_FMT takes bytesperline and sizeimage from the request.
        fmt.stride = format.stride;
        fmt.size = format.size;

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(CameraError::io("VIDIOC_S_FMT"))?;
        Ok(to_format(&fmt))
    }

    fn frame_interval(&self) -> Result<Interval> {
        let params = self
            .device
            .params()
            .map_err(CameraError::io("VIDIOC_G_PARM"))?;
        Ok(to_interval(params.interval))
    }

    fn set_frame_interval(&mut self, interval: Interval) -> Result<Interval> {
        let mut params = self
            .device
            .params()
            .map_err(CameraError::io("VIDIOC_G_PARM"))?;
        params.interval = Fraction::new(interval.numerator, interval.denominator);

        let params = self
            .device
            .set_params(&params)
            .map_err(CameraError::io("VIDIOC_S_PARM"))?;
        Ok(to_interval(params.interval))
    }

    fn enum_formats(&self) -> Result<Vec<FormatDescription>> {
        let formats = self
            .device
            .enum_formats()
            .map_err(CameraError::io("VIDIOC_ENUM_FMT"))?;

        Ok(formats
            .into_iter()
            .map(|desc| FormatDescription {
                fourcc: FourCC::from(desc.fourcc),
                description: desc.description,
            })
            .collect())
    }

    fn enum_frame_sizes(&self, fourcc: FourCC) -> Result<Vec<FrameSizeRange>> {
        let sizes = self
            .device
            .enum_framesizes(fourcc.into())
            .map_err(CameraError::io("VIDIOC_ENUM_FRAMESIZES"))?;

        Ok(sizes
            .into_iter()
            .map(|size| match size.size {
                FrameSizeEnum::Discrete(d) => FrameSizeRange::Discrete {
                    width: d.width,
                    height: d.height,
                },
                // The driver reports a continuous range as unit steps.
                FrameSizeEnum::Stepwise(s) if s.step_width == 1 && s.step_height == 1 => {
                    FrameSizeRange::Continuous {
                        min_width: s.min_width,
                        max_width: s.max_width,
                        min_height: s.min_height,
                        max_height: s.max_height,
                    }
                }
                FrameSizeEnum::Stepwise(s) => FrameSizeRange::Stepwise {
                    min_width: s.min_width,
                    max_width: s.max_width,
                    step_width: s.step_width,
                    min_height: s.min_height,
                    max_height: s.max_height,
                    step_height: s.step_height,
                },
            })
            .collect())
    }

    fn enum_frame_intervals(
        &self,
        fourcc: FourCC,
        width: u32,
        height: u32,
    ) -> Result<Vec<FrameIntervalRange>> {
        let intervals = self
            .device
            .enum_frameintervals(fourcc.into(), width, height)
            .map_err(CameraError::io("VIDIOC_ENUM_FRAMEINTERVALS"))?;

        Ok(intervals
            .into_iter()
            .map(|ival| match ival.interval {
                FrameIntervalEnum::Discrete(fraction) => {
                    FrameIntervalRange::Discrete(to_interval(fraction))
                }
                FrameIntervalEnum::Stepwise(s)
                    if s.step.numerator == 1 && s.step.denominator == 1 =>
                {
                    FrameIntervalRange::Continuous {
                        min: to_interval(s.min),
                        max: to_interval(s.max),
                    }
                }
                FrameIntervalEnum::Stepwise(s) => FrameIntervalRange::Stepwise {
                    min: to_interval(s.min),
                    max: to_interval(s.max),
                    step: to_interval(s.step),
                },
            })
            .collect())
    }

    fn next_control(&self, after: u32) -> Result<Option<ControlDescriptor>> {
        sys::next_control(self.fd, after)
    }

    fn control(&self, id: u32) -> Result<i32> {
        sys::control(self.fd, id)
    }

    fn set_control(&mut self, id: u32, value: i32) -> Result<()> {
        sys::set_control(self.fd, id, value)
    }

    fn ext_control(&self, id: u32) -> Result<i32> {
        sys::ext_control(self.fd, id)
    }

    fn set_ext_control(&mut self, id: u32, value: i32) -> Result<()> {
        sys::set_ext_control(self.fd, id, value)
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32> {
        sys::request_buffers(self.fd, count)
    }

    fn map_buffer(&mut self, index: u32) -> Result<Self::Region> {
        sys::map_buffer(self.fd, index)
    }

    fn queue_buffer(&mut self, index: u32) -> Result<()> {
        sys::queue_buffer(self.fd, index)
    }

    fn dequeue_buffer(&mut self, timeout: Option<Duration>) -> Result<DequeuedBuffer> {
        loop {
            self.wait_readable(timeout)?;
            match sys::dequeue_buffer(self.fd) {
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                other => return other.map_err(CameraError::io("VIDIOC_DQBUF")),
            }
        }
    }

    fn stream_on(&mut self) -> Result<()> {
        sys::stream_on(self.fd)
    }

    fn stream_off(&mut self) -> Result<()> {
        sys::stream_off(self.fd)
    }

    fn read_frame(&mut self, dest: &mut [u8], timeout: Option<Duration>) -> Result<usize> {
        loop {
            self.wait_readable(timeout)?;
            match sys::read(self.fd, dest) {
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => continue,
                other => return other.map_err(CameraError::io("read")),
            }
        }
    }
}

/// Opens real device nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Opener;

impl DeviceOpener for V4l2Opener {
    type Device = V4l2Device;

    fn open(&mut self, path: &str) -> Result<Self::Device> {
        V4l2Device::open(path)
    }
}
