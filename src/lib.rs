//! cam-importer: still-frame capture from V4L2 cameras.
//!
//! The library negotiates format and framerate with a capture device,
//! picks streaming or read I/O, owns the mapped buffer pool and hands out
//! one frame per capture call. Device access sits behind the
//! [`VideoDevice`] trait so the lifecycle logic can run against mock
//! devices in tests.

pub mod buffers;
pub mod camera;
pub mod capture;
pub mod catalog;
pub mod config;
pub mod controls;
pub mod device;
pub mod error;
pub mod format;
pub mod replay;
pub mod retry;
mod sys;
pub mod traits;
pub mod validation;

#[cfg(test)]
pub mod mock;

pub use camera::{CameraOptions, V4l2Camera};
pub use config::CaptureConfig;
pub use controls::{ControlDescriptor, ControlRegistry};
pub use device::{available_devices, DeviceNode, V4l2Device};
pub use error::{CameraError, ErrorKind, Result};
pub use replay::ReplayCamera;
pub use retry::{ensure_ready, ReconnectPolicy};
pub use traits::{
    Camera, DeviceCapabilities, Format, FourCC, Frame, FrameMetadata, IoMode, PixelFormat,
    Settings, VideoDevice,
};
