//! Simulated recording device
//!
//! Stands in for camera and microphone hardware on nodes without a driver
//! and in tests. Output files are created on start/split so filename
//! collision checks behave as they do on real hardware, and every call is
//! recorded for inspection.

use super::traits::{Device, DeviceError, DeviceResult, FrameMarker, MediaKind, Resolution};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// A call made on the device, in order of arrival
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    Start(PathBuf),
    Split(PathBuf),
    Stop,
}

#[derive(Default)]
struct SimulatedState {
    calls: Vec<DeviceCall>,
    settings: Map<String, Value>,
    frame_index: u64,
    recording: bool,
    closed: bool,
    fail_start: Option<DeviceError>,
    fail_split: Option<DeviceError>,
    fail_wait: Option<DeviceError>,
    rejected_setting: Option<String>,
    missing_timestamps: u32,
}

pub struct SimulatedDevice {
    kind: MediaKind,
    epoch: Instant,
    state: Mutex<SimulatedState>,
}

impl SimulatedDevice {
    pub fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            epoch: Instant::now(),
            state: Mutex::new(SimulatedState::default()),
        }
    }

    pub fn calls(&self) -> Vec<DeviceCall> {
        self.state.lock().calls.clone()
    }

    pub fn setting(&self, key: &str) -> Option<Value> {
        self.state.lock().settings.get(key).cloned()
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().recording
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Make the next `start_recording` fail with `error`
    pub fn fail_next_start(&self, error: DeviceError) {
        self.state.lock().fail_start = Some(error);
    }

    /// Make the next `split_recording` fail with `error`
    pub fn fail_next_split(&self, error: DeviceError) {
        self.state.lock().fail_split = Some(error);
    }

    /// Make the next `wait` fail with `error`
    pub fn fail_next_wait(&self, error: DeviceError) {
        self.state.lock().fail_wait = Some(error);
    }

    /// Refuse every value for setting `key`
    pub fn reject_setting(&self, key: &str) {
        self.state.lock().rejected_setting = Some(key.to_string());
    }

    /// Report `count` frame markers without a timestamp
    pub fn withhold_timestamps(&self, count: u32) {
        self.state.lock().missing_timestamps = count;
    }

    fn touch(path: &Path) -> DeviceResult<()> {
        File::create(path)
            .map(|_| ())
            .map_err(|e| DeviceError::new(format!("Failed to open {}: {}", path.display(), e)))
    }
}

impl Device for SimulatedDevice {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn capture(&self, resolution: Resolution) -> DeviceResult<Vec<u8>> {
        // Black binary PPM of the requested size
        let header = format!("P6\n{} {}\n255\n", resolution.width, resolution.height);
        let pixels = (resolution.width as usize) * (resolution.height as usize) * 3;
        let mut image = Vec::with_capacity(header.len() + pixels);
        image.extend_from_slice(header.as_bytes());
        image.resize(header.len() + pixels, 0);
        Ok(image)
    }

    fn start_recording(&self, path: &Path) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_start.take() {
            return Err(error);
        }
        if state.recording {
            return Err(DeviceError::new("Device is already recording"));
        }
        Self::touch(path)?;
        state.recording = true;
        state.calls.push(DeviceCall::Start(path.to_path_buf()));
        Ok(())
    }

    fn split_recording(&self, path: &Path) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_split.take() {
            return Err(error);
        }
        if !state.recording {
            return Err(DeviceError::new("Device is not recording"));
        }
        Self::touch(path)?;
        state.calls.push(DeviceCall::Split(path.to_path_buf()));
        Ok(())
    }

    fn stop_recording(&self) -> DeviceResult<()> {
        let mut state = self.state.lock();
        state.recording = false;
        state.calls.push(DeviceCall::Stop);
        Ok(())
    }

    fn wait(&self, timeout: Duration) -> DeviceResult<()> {
        if let Some(error) = self.state.lock().fail_wait.take() {
            return Err(error);
        }
        std::thread::sleep(timeout);
        Ok(())
    }

    fn current_frame_marker(&self) -> DeviceResult<FrameMarker> {
        let mut state = self.state.lock();
        state.frame_index += 1;
        let timestamp = if state.missing_timestamps > 0 {
            state.missing_timestamps -= 1;
            None
        } else {
            Some(self.epoch.elapsed().as_secs_f64())
        };
        Ok(FrameMarker {
            index: state.frame_index,
            timestamp,
        })
    }

    fn apply_setting(&self, key: &str, value: &Value) -> DeviceResult<()> {
        tracing::debug!("Simulated device setting {} = {}", key, value);
        let mut state = self.state.lock();
        if state.rejected_setting.as_deref() == Some(key) {
            return Err(DeviceError::new(format!("unsupported {}", key)));
        }
        state.settings.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn close(&self) -> DeviceResult<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}
