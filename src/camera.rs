//! Device lifecycle: open, configure, capture, close and reopen.

use std::time::Duration;

use log::{debug, info, warn};

use crate::buffers::{BufferPool, DEFAULT_BUFFER_COUNT};
use crate::capture;
use crate::catalog::SettingsCatalog;
use crate::controls::{ApplySummary, ControlOverrides, ControlRef, ControlRegistry};
use crate::device::V4l2Opener;
use crate::error::{CameraError, Result};
use crate::format;
use crate::traits::{
    Camera, DeviceCapabilities, DeviceOpener, Frame, IoMode, PixelFormat, Settings, VideoDevice,
};

/// Tunables of a [`V4l2Camera`] that are not part of the negotiated settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraOptions {
    /// Streaming buffers to request. The driver may grant fewer.
    pub buffer_count: u32,
    /// Longest wait for a frame. `None` blocks until one arrives.
    pub capture_timeout: Option<Duration>,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            buffer_count: DEFAULT_BUFFER_COUNT,
            capture_timeout: None,
        }
    }
}

/// Everything that exists only while the device is open.
struct Session<D: VideoDevice> {
    device: D,
    mode: IoMode,
    capabilities: DeviceCapabilities,
    pool: Option<BufferPool<D::Region>>,
    catalog: SettingsCatalog,
    sequence: u32,
}

impl<D: VideoDevice> Session<D> {
    /// Stop streaming, unmap all buffers and close the handle.
    fn shutdown(mut self) -> Result<()> {
        match self.pool.take() {
            Some(pool) => pool.release(&mut self.device),
            None => Ok(()),
        }
    }
}

fn start_pool<D: VideoDevice>(device: &mut D, count: u32) -> Result<BufferPool<D::Region>> {
    let mut pool = BufferPool::allocate(device, count)?;
    if let Err(err) = pool.enqueue_all(device) {
        if let Err(release_err) = pool.release(device) {
            debug!("releasing pool after failed start: {release_err}");
        }
        return Err(err);
    }
    Ok(pool)
}

/// A camera backed by a V4L2 device node.
///
/// The I/O mode is chosen once per open: streaming when the driver offers
/// it, plain reads otherwise. Every public operation also mirrors its
/// outcome into [`V4l2Camera::last_error`].
pub struct V4l2Camera<O: DeviceOpener = V4l2Opener> {
    opener: O,
    options: CameraOptions,
    target: Option<(String, Settings)>,
    session: Option<Session<O::Device>>,
    last_error: Option<String>,
}

impl V4l2Camera {
    /// Camera opening real device nodes.
    pub fn new() -> Self {
        Self::with_opener(V4l2Opener)
    }
}

impl Default for V4l2Camera {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: DeviceOpener> V4l2Camera<O> {
    /// Camera opening devices through `opener`.
    pub fn with_opener(opener: O) -> Self {
        Self {
            opener,
            options: CameraOptions::default(),
            target: None,
            session: None,
            last_error: None,
        }
    }

    /// Replace the options. Takes effect on the next open.
    #[must_use]
    pub fn with_options(mut self, options: CameraOptions) -> Self {
        self.options = options;
        self
    }

    /// Current options.
    pub const fn options(&self) -> &CameraOptions {
        &self.options
    }

    /// Whether a device handle is held.
    pub const fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// I/O mode of the open session.
    pub fn io_mode(&self) -> Option<IoMode> {
        self.session.as_ref().map(|s| s.mode)
    }

    /// Capabilities reported when the session was opened.
    pub fn capabilities(&self) -> Option<&DeviceCapabilities> {
        self.session.as_ref().map(|s| &s.capabilities)
    }

    /// Path of the last open request.
    pub fn path(&self) -> Option<&str> {
        self.target.as_ref().map(|(path, _)| path.as_str())
    }

    /// Number of streaming buffers, 0 in read mode or when closed.
    pub fn buffer_count(&self) -> u32 {
        self.session
            .as_ref()
            .and_then(|s| s.pool.as_ref())
            .map_or(0, BufferPool::count)
    }

    /// Message of the most recent failed operation; `None` after a success.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.last_error = None,
            Err(err) => self.last_error = Some(err.to_string()),
        }
        result
    }

    fn session_mut(&mut self) -> Result<&mut Session<O::Device>> {
        self.session.as_mut().ok_or(CameraError::NotOpen)
    }

    /// Current framerate, or 0 when closed or unknown.
    pub fn framerate(&self) -> u32 {
        self.session
            .as_ref()
            .map_or(0, |s| format::framerate(&s.device))
    }

    /// Change the framerate of the open device. Fails unless the driver
    /// applies exactly `fps`; the device stays open either way.
    pub fn set_framerate(&mut self, fps: u32) -> Result<()> {
        let result = self
            .session_mut()
            .and_then(|s| format::set_framerate(&mut s.device, fps));
        if result.is_ok() {
            if let Some((_, settings)) = self.target.as_mut() {
                settings.framerate = fps;
            }
        }
        self.record(result)
    }

    /// Change the format of the open device.
    ///
    /// In streaming mode the buffer pool is rebuilt for the new frame size.
    /// A rejected format puts the previous one back; if that or the rebuild
    /// fails the device is closed.
    pub fn set_format(&mut self, width: u32, height: u32, pixel_format: PixelFormat) -> Result<()> {
        let result = self.reformat(width, height, pixel_format);
        if result.is_ok() {
            if let Some((_, settings)) = self.target.as_mut() {
                settings.width = width;
                settings.height = height;
                settings.format = pixel_format;
            }
        }
        self.record(result)
    }

    fn reformat(&mut self, width: u32, height: u32, pixel_format: PixelFormat) -> Result<()> {
        let buffer_count = self.options.buffer_count;
        let previous = self.settings().cloned();
        let session = self.session_mut()?;

        let pool = session.pool.take();
        let streaming = pool.is_some();
        let applied = pool
            .map_or(Ok(()), |pool| pool.release(&mut session.device))
            .and_then(|()| format::set_format(&mut session.device, width, height, pixel_format))
            .map(drop);

        let restored = match (&applied, &previous) {
            (Err(err), Some(settings)) => {
                debug!("restoring {settings} after failed format change: {err}");
                format::set_format(
                    &mut session.device,
                    settings.width,
                    settings.height,
                    settings.format,
                )
                .and_then(|_| format::set_framerate(&mut session.device, settings.framerate))
            }
            _ => Ok(()),
        };

        let rebuilt = restored.and_then(|()| {
            if streaming {
                start_pool(&mut session.device, buffer_count).map(Some)
            } else {
                Ok(None)
            }
        });

        match rebuilt {
            Ok(pool) => {
                session.pool = pool;
                applied
            }
            Err(err) => {
                warn!("closing device, format or buffer pool could not be restored: {err}");
                self.session = None;
                Err(err)
            }
        }
    }

    /// Enumerate the device controls.
    pub fn query_controls(&mut self) -> Result<ControlRegistry> {
        let result = self
            .session_mut()
            .and_then(|s| ControlRegistry::query(&s.device));
        self.record(result)
    }

    /// Set every writable control to its configured value or its default.
    pub fn apply_controls<C>(
        &mut self,
        registry: &ControlRegistry,
        overrides: &C,
    ) -> Result<ApplySummary>
    where
        C: ControlOverrides + ?Sized,
    {
        let result = self
            .session_mut()
            .map(|s| registry.apply_configured(&mut s.device, overrides));
        self.record(result)
    }

    /// Read one control.
    pub fn control<'a, C>(&mut self, registry: &ControlRegistry, control: C) -> Result<i32>
    where
        C: Into<ControlRef<'a>>,
    {
        let result = self
            .session_mut()
            .and_then(|s| registry.get(&s.device, control));
        self.record(result)
    }

    /// Write one control. A value the device adjusts is only logged.
    pub fn set_control<'a, C>(
        &mut self,
        registry: &ControlRegistry,
        control: C,
        value: i32,
    ) -> Result<()>
    where
        C: Into<ControlRef<'a>>,
    {
        let result = self
            .session_mut()
            .and_then(|s| registry.set(&mut s.device, control, value));
        self.record(result)
    }

    /// One descriptive line per control.
    pub fn describe_controls(&self, registry: &ControlRegistry) -> Vec<String> {
        self.session
            .as_ref()
            .map(|s| registry.describe(&s.device))
            .unwrap_or_default()
    }

    /// Every (format, size, framerate) the device offers. Enumerated once
    /// per open session.
    pub fn valid_settings(&mut self) -> Result<Vec<Settings>> {
        let result = self.session_mut().and_then(|s| {
            s.catalog
                .get_or_compute(&s.device)
                .map(<[Settings]>::to_vec)
        });
        self.record(result)
    }

    fn open_session(&mut self, path: &str, settings: &Settings) -> Result<Session<O::Device>> {
        let mut device = self.opener.open(path)?;

        let capabilities = device.query_capabilities()?;
        let mode = capabilities.select_io_mode()?;
        info!(
            "opened {path}: {} ({}) at {}, {mode:?} mode",
            capabilities.card, capabilities.driver, capabilities.bus_info
        );

        format::set_format(&mut device, settings.width, settings.height, settings.format)?;
        format::set_framerate(&mut device, settings.framerate)?;

        let pool = match mode {
            IoMode::Streaming => Some(start_pool(&mut device, self.options.buffer_count)?),
            IoMode::ReadWrite => None,
        };

        Ok(Session {
            device,
            mode,
            capabilities,
            pool,
            catalog: SettingsCatalog::new(),
            sequence: 0,
        })
    }

    fn shutdown(&mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => {
                let result = session.shutdown();
                debug!("closed {}", self.path().unwrap_or_default());
                result
            }
            None => Ok(()),
        }
    }
}

impl<O: DeviceOpener> Camera for V4l2Camera<O> {
    fn open(&mut self, path: &str, settings: &Settings) -> Result<()> {
        if let Err(err) = self.shutdown() {
            warn!("closing previous session: {err}");
        }

        self.target = Some((path.to_owned(), settings.clone()));
        let result = self
            .open_session(path, settings)
            .map(|session| self.session = Some(session));
        self.record(result)
    }

    fn close(&mut self) -> Result<()> {
        let result = self.shutdown();
        self.record(result)
    }

    fn check_ready(&mut self) -> Result<()> {
        let result = self.session_mut().and_then(|s| {
            s.device.query_capabilities()?;
            match s.pool.as_mut() {
                Some(pool) => pool.recover(&mut s.device),
                None => Ok(()),
            }
        });
        self.record(result)
    }

    fn capture_image(&mut self, frame: &mut Frame) -> Result<()> {
        let expected = self.settings().map_or(0, Settings::frame_size);
        let timeout = self.options.capture_timeout;

        let result = self.session_mut().and_then(|s| match (s.mode, s.pool.as_mut()) {
            (IoMode::ReadWrite, _) => {
                capture::capture_read(&mut s.device, frame, expected, s.sequence, timeout)?;
                s.sequence = s.sequence.wrapping_add(1);
                Ok(())
            }
            (IoMode::Streaming, Some(pool)) => {
                capture::capture_streaming(&mut s.device, pool, frame, expected, timeout)
            }
            (IoMode::Streaming, None) => {
                Err(CameraError::PoolState("streaming without buffers".to_owned()))
            }
        });
        self.record(result)
    }

    fn reopen(&mut self) -> Result<()> {
        if let Err(err) = self.shutdown() {
            debug!("ignoring close failure before reopen: {err}");
        }

        let Some((path, settings)) = self.target.clone() else {
            return self.record(Err(CameraError::NotOpen));
        };
        self.open(&path, &settings)
    }

    fn settings(&self) -> Option<&Settings> {
        self.target.as_ref().map(|(_, settings)| settings)
    }
}

impl<O: DeviceOpener> Drop for V4l2Camera<O> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!("closing camera: {err}");
        }
    }
}
