//! Capture devices.
//!
//! This module provides the sources frames come from:
//! - Synthetic devices (`stub://` ids, always available, for tests and demos)
//! - USB/V4L2 devices (feature: ingest-v4l2), addressed by index or path
//! - HTTP MJPEG/JPEG cameras (`http(s)://` ids)
//!
//! All devices produce `Frame` instances and are opened through a
//! `DeviceOpener`, so the `DeviceSelector` can walk an ordered preference list
//! and fall back from one device (or backend) to the next. A device is released
//! by dropping it.

mod mjpeg;
mod normalize;
mod selector;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
mod v4l2;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::frame::Frame;

pub use mjpeg::MjpegDevice;
pub use selector::{DeviceSelector, SelectedDevice};
pub use synthetic::SyntheticDevice;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Device;

/// Device identifier: a numeric index (`0` -> `/dev/video0`) or a string
/// (device path, `stub://name`, or `http://camera/stream`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceId {
    Index(u32),
    Name(String),
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::Index(index) => write!(f, "{}", index),
            DeviceId::Name(name) => f.write_str(name),
        }
    }
}

impl FromStr for DeviceId {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(anyhow!("device id must not be empty"));
        }
        Ok(match value.parse::<u32>() {
            Ok(index) => DeviceId::Index(index),
            Err(_) => DeviceId::Name(value.to_string()),
        })
    }
}

/// Capture backend used to open a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Synthetic,
    V4l2,
    Mjpeg,
}

impl BackendKind {
    /// Default backend for an id when no hint is given.
    pub fn infer(id: &DeviceId) -> Self {
        match id {
            DeviceId::Index(_) => BackendKind::V4l2,
            DeviceId::Name(name) if name.starts_with("stub://") => BackendKind::Synthetic,
            DeviceId::Name(name)
                if name.starts_with("http://") || name.starts_with("https://") =>
            {
                BackendKind::Mjpeg
            }
            DeviceId::Name(_) => BackendKind::V4l2,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Synthetic => "synthetic",
            BackendKind::V4l2 => "v4l2",
            BackendKind::Mjpeg => "mjpeg",
        })
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "synthetic" | "stub" => Ok(BackendKind::Synthetic),
            "v4l2" => Ok(BackendKind::V4l2),
            "mjpeg" | "http" => Ok(BackendKind::Mjpeg),
            other => Err(anyhow!(
                "unknown capture backend '{}'; expected synthetic, v4l2 or mjpeg",
                other
            )),
        }
    }
}

/// One entry of the device preference list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCandidate {
    pub id: DeviceId,
    /// Backend to use. `None` tries the inferred backend, then the selector's
    /// fallback backends.
    #[serde(default)]
    pub backend: Option<BackendKind>,
}

impl DeviceCandidate {
    pub fn new(id: DeviceId) -> Self {
        Self { id, backend: None }
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }
}

impl fmt::Display for DeviceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.backend {
            Some(backend) => write!(f, "{} ({})", self.id, backend),
            None => write!(f, "{}", self.id),
        }
    }
}

/// `id` or `id@backend`, as used in `VIGIL_DEVICES`.
impl FromStr for DeviceCandidate {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        if let Some((id, backend)) = value.rsplit_once('@') {
            if let Ok(backend) = backend.parse::<BackendKind>() {
                return Ok(DeviceCandidate::new(id.parse()?).with_backend(backend));
            }
        }
        Ok(DeviceCandidate::new(value.parse()?))
    }
}

/// Statistics for a capture device.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// An opened capture device.
pub trait CaptureDevice: Send {
    /// Human-readable source description for logs.
    fn describe(&self) -> String;

    /// Capture the next frame. An error means the device is no longer usable.
    fn read_frame(&mut self) -> Result<Frame>;

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;
}

/// Opens devices by id and backend.
pub trait DeviceOpener: Send + Sync {
    fn open(&self, id: &DeviceId, backend: BackendKind) -> Result<Box<dyn CaptureDevice>>;
}

/// Capture settings shared by every backend.
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            target_fps: 10,
        }
    }
}

/// Opener for the real backends compiled into this build.
#[derive(Clone, Debug, Default)]
pub struct SystemDevices {
    settings: CaptureSettings,
}

impl SystemDevices {
    pub fn new(settings: CaptureSettings) -> Self {
        Self { settings }
    }
}

impl DeviceOpener for SystemDevices {
    fn open(&self, id: &DeviceId, backend: BackendKind) -> Result<Box<dyn CaptureDevice>> {
        match backend {
            BackendKind::Synthetic => {
                Ok(Box::new(SyntheticDevice::open(id, self.settings.clone())?))
            }
            BackendKind::Mjpeg => Ok(Box::new(MjpegDevice::open(id, self.settings.clone())?)),
            BackendKind::V4l2 => open_v4l2(id, &self.settings),
        }
    }
}

#[cfg(feature = "ingest-v4l2")]
fn open_v4l2(id: &DeviceId, settings: &CaptureSettings) -> Result<Box<dyn CaptureDevice>> {
    Ok(Box::new(V4l2Device::open(id, settings.clone())?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_v4l2(id: &DeviceId, _settings: &CaptureSettings) -> Result<Box<dyn CaptureDevice>> {
    Err(anyhow!(
        "device {} needs v4l2 capture, which requires the ingest-v4l2 feature",
        id
    ))
}
