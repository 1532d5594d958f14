//! Recording configuration document
//!
//! The document a scheduler owns. It travels over the wire and to disk as a
//! flat JSON object with camelCase keys; patches overlay it one top-level key
//! at a time.

use crate::device::{MediaKind, Resolution};
use crate::utils::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RecordingConfig {
    /// Resolution of stills returned by `current_frame`
    pub stream_resolution: Resolution,

    /// Desired recording state; the scheduler reconciles the device to it
    pub recording: bool,

    /// Output name with `{host}`, `{date}`, `{time}` and `{index}` placeholders
    pub filename_template: String,

    /// Split into a new file every N ms, 0 to never split
    pub split_interval_ms: u64,

    /// Stop after N ms, 0 for unbounded recordings
    pub duration_ms: u64,

    /// Append a frame marker to the sidecar every N ms, 0 to disable
    pub timestamp_period_ms: u64,

    /// Opaque driver settings passed through to the device
    pub device_settings: Map<String, Value>,

    pub output_directory: PathBuf,
}

impl RecordingConfig {
    /// Built-in defaults for a device of the given medium
    pub fn defaults(kind: MediaKind) -> Self {
        let directory = match kind {
            MediaKind::Video => "videos",
            MediaKind::Audio => "audio",
        };
        Self {
            stream_resolution: Resolution::new(320, 240),
            recording: false,
            filename_template: "{host}_{date}_{time}_{index}".to_string(),
            split_interval_ms: 0,
            duration_ms: 60 * 60 * 1000,
            timestamp_period_ms: 30_000,
            device_settings: Map::new(),
            output_directory: dirs::home_dir().unwrap_or_default().join(directory),
        }
    }

    /// Overlay `patch` on `self`, replacing each top-level key it names.
    ///
    /// Nested mappings such as `deviceSettings` are replaced whole, not
    /// merged.
    pub fn overlay(&self, patch: &Value) -> AppResult<RecordingConfig> {
        let patch = patch
            .as_object()
            .ok_or_else(|| AppError::bad_request("Config patch must be a JSON object"))?;

        let mut document = self.to_document()?;
        for (key, value) in patch {
            document.insert(key.clone(), value.clone());
        }

        serde_json::from_value(Value::Object(document))
            .map_err(|e| AppError::bad_request(format!("Invalid config: {}", e)))
    }

    /// Top-level keys whose values differ between `self` and `other`
    pub fn changed_keys(&self, other: &RecordingConfig) -> AppResult<Vec<String>> {
        let before = self.to_document()?;
        let after = other.to_document()?;
        Ok(after
            .into_iter()
            .filter(|(key, value)| before.get(key) != Some(value))
            .map(|(key, _)| key)
            .collect())
    }

    /// Device settings that are new or changed in `other`
    pub fn changed_settings<'a>(&self, other: &'a RecordingConfig) -> Vec<(&'a String, &'a Value)> {
        other
            .device_settings
            .iter()
            .filter(|(key, value)| self.device_settings.get(*key) != Some(*value))
            .collect()
    }

    pub fn to_document(&self) -> AppResult<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            _ => Err(AppError::bad_request("Config did not serialize to an object")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overlay_replaces_named_keys_only() {
        let base = RecordingConfig::defaults(MediaKind::Video);
        let patched = base
            .overlay(&json!({ "filenameTemplate": "test", "durationMs": 5 }))
            .unwrap();

        assert_eq!(patched.filename_template, "test");
        assert_eq!(patched.duration_ms, 5);
        assert_eq!(patched.stream_resolution, base.stream_resolution);
        assert_eq!(patched.output_directory, base.output_directory);
    }

    #[test]
    fn test_overlay_shallow_replaces_device_settings() {
        let mut base = RecordingConfig::defaults(MediaKind::Video);
        base.device_settings.insert("fps".into(), json!(30));
        base.device_settings.insert("iso".into(), json!(100));

        let patched = base.overlay(&json!({ "deviceSettings": { "fps": 15 } })).unwrap();

        assert_eq!(patched.device_settings.len(), 1);
        assert_eq!(patched.device_settings["fps"], json!(15));
    }

    #[test]
    fn test_overlay_rejects_bad_input() {
        let base = RecordingConfig::defaults(MediaKind::Audio);

        assert!(matches!(base.overlay(&json!([1, 2])), Err(AppError::BadRequest(_))));
        assert!(matches!(
            base.overlay(&json!({ "durationMs": "soon" })),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            base.overlay(&json!({ "colour": "red" })),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_changed_keys_and_settings() {
        let base = RecordingConfig::defaults(MediaKind::Video);
        let next = base
            .overlay(&json!({ "recording": true, "deviceSettings": { "fps": 15 } }))
            .unwrap();

        let mut keys = base.changed_keys(&next).unwrap();
        keys.sort();
        assert_eq!(keys, vec!["deviceSettings", "recording"]);

        let settings = base.changed_settings(&next);
        assert_eq!(settings.len(), 1);
        assert_eq!(settings[0].0, "fps");
    }

    #[test]
    fn test_wire_names_are_camel_case() {
        let document = RecordingConfig::defaults(MediaKind::Video).to_document().unwrap();

        for key in [
            "streamResolution",
            "recording",
            "filenameTemplate",
            "splitIntervalMs",
            "durationMs",
            "timestampPeriodMs",
            "deviceSettings",
            "outputDirectory",
        ] {
            assert!(document.contains_key(key), "missing {}", key);
        }
    }
}
