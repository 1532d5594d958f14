//! Frame timestamp sidecar files
//!
//! Each mark appends one `frameIndex,timestamp` line to the text file next
//! to the current media file. Lines are never rewritten.

use crate::device::{Device, FrameMarker};
use crate::utils::{AppError, AppResult};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Read the current frame marker, waiting on the device between attempts
/// until it carries a timestamp.
pub fn read_marker(device: &dyn Device, attempts: u32, wait: Duration) -> AppResult<(u64, f64)> {
    for attempt in 0..attempts {
        let FrameMarker { index, timestamp } = device.current_frame_marker()?;
        if let Some(timestamp) = timestamp {
            return Ok((index, timestamp));
        }
        if attempt + 1 < attempts {
            device.wait(wait)?;
        }
    }
    Err(AppError::TimestampUnavailable(attempts))
}

pub fn append_marker(sidecar: &Path, index: u64, timestamp: f64) -> AppResult<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(sidecar)?;
    writeln!(file, "{},{}", index, timestamp)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{MediaKind, SimulatedDevice};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_read_marker_retries_until_timestamped() {
        let device = SimulatedDevice::new(MediaKind::Video);
        device.withhold_timestamps(3);

        let (index, _) = read_marker(&device, 10, Duration::from_millis(1)).unwrap();
        assert_eq!(index, 4);
    }

    #[test]
    fn test_read_marker_gives_up() {
        let device = SimulatedDevice::new(MediaKind::Video);
        device.withhold_timestamps(5);

        let result = read_marker(&device, 5, Duration::from_millis(1));
        assert!(matches!(result, Err(AppError::TimestampUnavailable(5))));
    }

    #[test]
    fn test_append_marker_appends_lines() {
        let dir = tempdir().unwrap();
        let sidecar = dir.path().join("clip.txt");

        append_marker(&sidecar, 1, 0.5).unwrap();
        append_marker(&sidecar, 2, 1.25).unwrap();

        let content = fs::read_to_string(&sidecar).unwrap();
        assert_eq!(content, "1,0.5\n2,1.25\n");
    }
}
