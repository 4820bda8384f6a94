//! Capture configuration loaded from TOML.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use log::{debug, LevelFilter};
use serde::Deserialize;

use crate::buffers::DEFAULT_BUFFER_COUNT;
use crate::camera::CameraOptions;
use crate::controls::ControlOverrides;
use crate::error::{CameraError, Result};
use crate::retry::ReconnectPolicy;
use crate::traits::{Format, PixelFormat, Settings};

/// Everything needed to open and drive one camera.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureConfig {
    /// Device node, e.g. `/dev/video0`.
    pub device: String,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format name.
    #[serde(default = "default_format")]
    pub format: PixelFormat,
    /// Frames per second.
    pub framerate: u32,
    /// Streaming buffers to request.
    #[serde(default = "default_buffer_count")]
    pub buffer_count: u32,
    /// Longest wait for a frame in milliseconds; absent blocks indefinitely.
    #[serde(default)]
    pub capture_timeout_ms: Option<u64>,
    /// Control values by control name.
    #[serde(default)]
    pub controls: BTreeMap<String, i32>,
    /// Reconnect backoff.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_format() -> PixelFormat {
    PixelFormat::Yuyv
}

const fn default_buffer_count() -> u32 {
    DEFAULT_BUFFER_COUNT
}

/// `[reconnect]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectConfig {
    /// Delay before the first reopen attempt.
    pub initial_delay_ms: u64,
    /// Upper bound of a single delay.
    pub max_delay_ms: u64,
    /// Reopen attempts before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            max_attempts: 10,
        }
    }
}

/// `[logging]` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

impl LoggingConfig {
    /// Parsed level filter.
    pub fn level_filter(&self) -> Result<LevelFilter> {
        self.level
            .parse()
            .map_err(|_| CameraError::Config(format!("unknown log level {:?}", self.level)))
    }
}

impl CaptureConfig {
    /// Read and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        debug!("reading config from {}", path.display());
        let text = fs::read_to_string(path)
            .map_err(|err| CameraError::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|err| CameraError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(CameraError::Config("device path is empty".to_owned()));
        }
        for (name, value) in [
            ("width", self.width),
            ("height", self.height),
            ("framerate", self.framerate),
            ("buffer_count", self.buffer_count),
        ] {
            if value == 0 {
                return Err(CameraError::Config(format!("{name} must be non-zero")));
            }
        }
        if self.format.bytes_per_pixel() == 0 {
            return Err(CameraError::InvalidPixelFormat(self.format));
        }
        if Format::checked(self.width, self.height, self.format).is_none() {
            return Err(CameraError::Config(format!(
                "a {}x{} {} frame is too large",
                self.width, self.height, self.format
            )));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(CameraError::Config(
                "reconnect.max_attempts must be non-zero".to_owned(),
            ));
        }
        self.logging.level_filter()?;
        Ok(())
    }

    /// Requested capture settings.
    pub fn settings(&self) -> Settings {
        Settings::new(self.width, self.height, self.format, self.framerate)
    }

    /// Camera tunables.
    pub fn camera_options(&self) -> CameraOptions {
        CameraOptions {
            buffer_count: self.buffer_count,
            capture_timeout: self.capture_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Reconnect backoff policy.
    pub const fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }
}

impl ControlOverrides for CaptureConfig {
    fn contains(&self, name: &str) -> bool {
        self.controls.contains_key(name)
    }

    fn get_or(&self, name: &str, default: i32) -> i32 {
        self.controls.get_or(name, default)
    }
}
