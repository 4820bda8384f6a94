//! Camera that replays raw frames from a file.
//!
//! The file holds frames of the opened settings back to back, with no
//! header. Capture walks through them and starts over at the end.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info};

use crate::error::{CameraError, Result};
use crate::traits::{Camera, Frame, FrameMetadata, Settings};

/// A [`Camera`] serving frames recorded to disk.
#[derive(Debug, Default)]
pub struct ReplayCamera {
    target: Option<(PathBuf, Settings)>,
    data: Option<Vec<u8>>,
    cursor: usize,
    sequence: u32,
}

impl ReplayCamera {
    /// A closed replay camera.
    pub const fn new() -> Self {
        Self {
            target: None,
            data: None,
            cursor: 0,
            sequence: 0,
        }
    }

    /// Whether a recording is loaded.
    pub const fn is_open(&self) -> bool {
        self.data.is_some()
    }

    /// Frames in the loaded recording.
    pub fn frame_count(&self) -> usize {
        let frame_size = self.frame_size();
        match &self.data {
            Some(data) if frame_size > 0 => data.len() / frame_size,
            _ => 0,
        }
    }

    fn frame_size(&self) -> usize {
        self.target.as_ref().map_or(0, |(_, s)| s.frame_size())
    }

    fn frame_interval(&self) -> Duration {
        self.target
            .as_ref()
            .and_then(|(_, s)| (s.framerate > 0).then(|| Duration::from_secs(1) / s.framerate))
            .unwrap_or_default()
    }
}

impl Camera for ReplayCamera {
    fn open(&mut self, path: &str, settings: &Settings) -> Result<()> {
        self.close()?;
        self.target = Some((PathBuf::from(path), settings.clone()));

        let frame_size = settings.frame_size();
        if frame_size == 0 {
            return Err(CameraError::InvalidPixelFormat(settings.format));
        }

        let data = fs::read(path).map_err(|source| CameraError::OpenFailed {
            path: path.to_owned(),
            source,
        })?;
        if data.is_empty() || data.len() % frame_size != 0 {
            return Err(CameraError::Config(format!(
                "{path}: {} bytes is not a whole number of {frame_size} byte frames",
                data.len()
            )));
        }

        info!(
            "replaying {} frames of {settings} from {path}",
            data.len() / frame_size
        );
        self.data = Some(data);
        self.cursor = 0;
        self.sequence = 0;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.data.take().is_some() {
            debug!("replay closed");
        }
        Ok(())
    }

    fn check_ready(&mut self) -> Result<()> {
        if !self.is_open() {
            return Err(CameraError::NotOpen);
        }
        match &self.target {
            Some((path, _)) => fs::metadata(path)
                .map(drop)
                .map_err(CameraError::io("stat")),
            None => Err(CameraError::NotOpen),
        }
    }

    fn capture_image(&mut self, frame: &mut Frame) -> Result<()> {
        let frame_size = self.frame_size();
        let interval = self.frame_interval();
        let data = self.data.as_ref().ok_or(CameraError::NotOpen)?;

        if frame.len() != frame_size {
            return Err(CameraError::FrameSize {
                expected: frame_size,
                actual: frame.len(),
            });
        }

        let src = data
            .get(self.cursor..self.cursor + frame_size)
            .ok_or_else(|| CameraError::ShortRead {
                expected: frame_size,
                actual: data.len().saturating_sub(self.cursor),
            })?;
        frame.data_mut().copy_from_slice(src);
        frame.metadata = FrameMetadata {
            sequence: self.sequence,
            timestamp: interval * self.sequence,
            bytes_used: u32::try_from(frame_size).unwrap_or(u32::MAX),
        };

        self.cursor += frame_size;
        if self.cursor >= data.len() {
            self.cursor = 0;
        }
        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }

    fn reopen(&mut self) -> Result<()> {
        self.close()?;
        let (path, settings) = self.target.clone().ok_or(CameraError::NotOpen)?;
        self.open(&path.to_string_lossy(), &settings)
    }

    fn settings(&self) -> Option<&Settings> {
        self.target.as_ref().map(|(_, settings)| settings)
    }
}
