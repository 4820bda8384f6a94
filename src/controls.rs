//! Device controls: enumeration, dual-path get/set and bulk configuration.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use log::{debug, warn};

use crate::error::{CameraError, Result};
use crate::traits::VideoDevice;

/// Control class of the generic user controls.
pub const CLASS_USER: u32 = 0x0098_0000;
/// Control class of the camera controls.
pub const CLASS_CAMERA: u32 = 0x009a_0000;

/// Name of the trigger control, driven by its own config key instead.
pub const TRIGGER_CONTROL: &str = "Trigger";

/// Class bits of a control id.
#[must_use]
pub const fn control_class(id: u32) -> u32 {
    id & 0x0fff_0000
}

/// Value type of a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Integer in `[minimum, maximum]`.
    Integer,
    /// On/off.
    Boolean,
    /// Index into a menu.
    Menu,
    /// Action without a value.
    Button,
    /// Any other driver type.
    Other(u32),
}

impl ControlKind {
    /// Map the driver type code.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Integer,
            2 => Self::Boolean,
            3 => Self::Menu,
            4 => Self::Button,
            other => Self::Other(other),
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Integer => "int",
            Self::Boolean => "bool",
            Self::Menu => "menu",
            Self::Button => "button",
            Self::Other(_) => "unknown",
        }
    }
}

/// Control flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlFlags(pub u32);

impl ControlFlags {
    /// The control is permanently disabled.
    pub const DISABLED: Self = Self(0x0001);
    /// Another application holds the control.
    pub const GRABBED: Self = Self(0x0002);
    /// The control cannot be written.
    pub const READ_ONLY: Self = Self(0x0004);
    /// The control is currently inactive.
    pub const INACTIVE: Self = Self(0x0010);
    /// The control cannot be read.
    pub const WRITE_ONLY: Self = Self(0x0040);

    /// Whether any bit of `other` is set.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for ControlFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Description of one device control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlDescriptor {
    /// Driver id.
    pub id: u32,
    /// Human readable name, unique per device.
    pub name: String,
    /// Value type.
    pub kind: ControlKind,
    /// Smallest value.
    pub minimum: i32,
    /// Largest value.
    pub maximum: i32,
    /// Value increment.
    pub step: i32,
    /// Driver default.
    pub default: i32,
    /// Flag bits.
    pub flags: ControlFlags,
}

impl ControlDescriptor {
    /// Whether reads and writes go through the extended control interface.
    #[must_use]
    pub const fn uses_extended_path(&self) -> bool {
        control_class(self.id) != CLASS_USER
    }
}

/// Addresses a control by id or by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRef<'a> {
    /// Driver id.
    Id(u32),
    /// Control name.
    Name(&'a str),
}

impl From<u32> for ControlRef<'_> {
    fn from(id: u32) -> Self {
        Self::Id(id)
    }
}

impl<'a> From<&'a str> for ControlRef<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

/// Per-control values supplied by configuration.
pub trait ControlOverrides {
    /// Whether a value is configured for `name`.
    fn contains(&self, name: &str) -> bool;

    /// Configured value for `name`, or `default`.
    fn get_or(&self, name: &str, default: i32) -> i32;
}

impl ControlOverrides for BTreeMap<String, i32> {
    fn contains(&self, name: &str) -> bool {
        self.contains_key(name)
    }

    fn get_or(&self, name: &str, default: i32) -> i32 {
        self.get(name).copied().unwrap_or(default)
    }
}

impl<S: std::hash::BuildHasher> ControlOverrides for HashMap<String, i32, S> {
    fn contains(&self, name: &str) -> bool {
        self.contains_key(name)
    }

    fn get_or(&self, name: &str, default: i32) -> i32 {
        self.get(name).copied().unwrap_or(default)
    }
}

/// Outcome counts of [`ControlRegistry::apply_configured`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Controls set to the requested value.
    pub applied: usize,
    /// Buttons, read-only, disabled and trigger controls left alone.
    pub skipped: usize,
    /// Controls that read back a different value.
    pub mismatched: usize,
    /// Controls whose write failed.
    pub failed: usize,
}

/// The user and camera class controls of one device, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ControlRegistry {
    controls: BTreeMap<String, ControlDescriptor>,
}

impl ControlRegistry {
    /// Walk the driver's control list.
    ///
    /// Only user and camera class controls are kept and disabled ones are
    /// skipped. A later control with an already seen name replaces the earlier one.
    pub fn query<D: VideoDevice>(device: &D) -> Result<Self> {
        let mut controls = BTreeMap::new();
        let mut after = 0;

        while let Some(desc) = device.next_control(after)? {
            if desc.id <= after {
                warn!("driver returned control {:#x} after {after:#x}, stopping", desc.id);
                break;
            }
            after = desc.id;

            let class = control_class(desc.id);
            if class != CLASS_USER && class != CLASS_CAMERA {
                continue;
            }
            if desc.flags.intersects(ControlFlags::DISABLED) {
                continue;
            }

            if let Some(previous) = controls.insert(desc.name.clone(), desc) {
                debug!("control name {:?} reused, replacing {:#x}", previous.name, previous.id);
            }
        }

        debug!("found {} controls", controls.len());
        Ok(Self { controls })
    }

    /// Look up a control by id or name.
    pub fn find<'a, C: Into<ControlRef<'a>>>(&self, control: C) -> Option<&ControlDescriptor> {
        match control.into() {
            ControlRef::Name(name) => self.controls.get(name),
            ControlRef::Id(id) => self.controls.values().find(|desc| desc.id == id),
        }
    }

    /// Number of known controls.
    pub fn len(&self) -> usize {
        self.controls.len()
    }

    /// Whether no controls are known.
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// Current value of a control.
    pub fn get<'a, D, C>(&self, device: &D, control: C) -> Result<i32>
    where
        D: VideoDevice,
        C: Into<ControlRef<'a>>,
    {
        let desc = self.resolve(control.into())?;
        read_value(device, desc)
    }

    /// Write a control and verify it.
    ///
    /// A value that reads back differently is only logged; the device may
    /// clamp or ignore writes depending on other controls.
    pub fn set<'a, D, C>(&self, device: &mut D, control: C, value: i32) -> Result<()>
    where
        D: VideoDevice,
        C: Into<ControlRef<'a>>,
    {
        let desc = self.resolve(control.into())?;
        write_value(device, desc, value).map(|_| ())
    }

    /// Set every writable control to its configured value, or its default.
    pub fn apply_configured<D, O>(&self, device: &mut D, overrides: &O) -> ApplySummary
    where
        D: VideoDevice,
        O: ControlOverrides + ?Sized,
    {
        let mut summary = ApplySummary::default();

        for (name, desc) in &self.controls {
            if desc.kind == ControlKind::Button
                || desc
                    .flags
                    .intersects(ControlFlags::DISABLED | ControlFlags::READ_ONLY)
                || name == TRIGGER_CONTROL
            {
                summary.skipped += 1;
                continue;
            }

            let value = overrides.get_or(name, desc.default);
            match write_value(device, desc, value) {
                Ok(true) => summary.applied += 1,
                Ok(false) => summary.mismatched += 1,
                Err(err) => {
                    warn!("unable to set control '{name}' to {value}: {err}");
                    summary.failed += 1;
                }
            }
        }

        debug!("{summary:?}");
        summary
    }

    /// One line per control with its kind, current value and range.
    pub fn describe<D: VideoDevice>(&self, device: &D) -> Vec<String> {
        self.controls
            .values()
            .map(|desc| {
                let mut line = format!("{} ({})", desc.name, desc.kind.label());
                if desc.kind == ControlKind::Button {
                    return line;
                }
                match read_value(device, desc) {
                    Ok(value) => {
                        let _ = write!(line, ": value={value}");
                    }
                    Err(_) => line.push_str(": value=?"),
                }
                if desc.kind == ControlKind::Boolean {
                    let _ = write!(line, " default={}", desc.default);
                } else {
                    let _ = write!(
                        line,
                        " min={} max={} step={} default={}",
                        desc.minimum, desc.maximum, desc.step, desc.default
                    );
                }
                line
            })
            .collect()
    }

    fn resolve(&self, control: ControlRef<'_>) -> Result<&ControlDescriptor> {
        self.find(control).ok_or_else(|| {
            CameraError::UnknownControl(match control {
                ControlRef::Name(name) => format!("{name:?}"),
                ControlRef::Id(id) => format!("{id:#x}"),
            })
        })
    }
}

fn read_value<D: VideoDevice>(device: &D, desc: &ControlDescriptor) -> Result<i32> {
    let value = if desc.uses_extended_path() {
        device.ext_control(desc.id)
    } else {
        device.control(desc.id)
    };
    value.map_err(|err| CameraError::ControlAccess(format!("reading '{}': {err}", desc.name)))
}

/// Returns whether the control reads back the written value.
fn write_value<D: VideoDevice>(device: &mut D, desc: &ControlDescriptor, value: i32) -> Result<bool> {
    let written = if desc.uses_extended_path() {
        device.set_ext_control(desc.id, value)
    } else {
        device.set_control(desc.id, value)
    };
    written.map_err(|err| CameraError::ControlAccess(format!("writing '{}': {err}", desc.name)))?;

    let actual = read_value(device, desc)?;
    if actual != value {
        warn!(
            "unable to set control '{}' to desired value {value} (actual: {actual})",
            desc.name
        );
        return Ok(false);
    }
    Ok(true)
}
