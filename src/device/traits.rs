//! Device capability definitions
//!
//! Platform-agnostic interface to the single recording device a node owns.
//! Camera and microphone drivers both implement [`Device`]; the scheduler is
//! generic over it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a device driver.
///
/// A `fatal` error means the device can no longer be used; the scheduler's
/// control loop faults when it sees one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DeviceError {
    pub message: String,
    pub fatal: bool,
}

impl DeviceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }
}

pub type DeviceResult<T> = Result<T, DeviceError>;

/// The medium a device records, which fixes the container extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Get the file extension for this medium
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Video => "h264",
            MediaKind::Audio => "wav",
        }
    }
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Position of the most recent frame in the running recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameMarker {
    pub index: u64,
    /// Device timestamp in seconds, absent while the device has not
    /// timestamped the frame yet.
    pub timestamp: Option<f64>,
}

/// Hardware recording capability.
///
/// Methods take `&self`: implementations synchronise internally so the
/// scheduler can call them without holding its own lock.
pub trait Device: Send + Sync {
    /// Medium recorded by this device
    fn kind(&self) -> MediaKind;

    /// Grab a single still at the given resolution
    fn capture(&self, resolution: Resolution) -> DeviceResult<Vec<u8>>;

    fn start_recording(&self, path: &Path) -> DeviceResult<()>;

    /// Continue the running recording in a new file
    fn split_recording(&self, path: &Path) -> DeviceResult<()>;

    fn stop_recording(&self) -> DeviceResult<()>;

    /// Block for up to `timeout` waiting on the device
    fn wait(&self, timeout: Duration) -> DeviceResult<()>;

    fn current_frame_marker(&self) -> DeviceResult<FrameMarker>;

    /// Apply a single pass-through driver setting
    fn apply_setting(&self, key: &str, value: &Value) -> DeviceResult<()>;

    /// Release the device; called once when the scheduler stops
    fn close(&self) -> DeviceResult<()> {
        Ok(())
    }
}
