//! Recording state management
//!
//! Defines the scheduler state machine, the per-recording session and the
//! decision the control loop takes on each tick.

use crate::config::RecordingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Current state of a scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// No recording in progress
    #[default]
    Idle,
    /// Device is recording
    Recording,
    /// The device failed unrecoverably; every operation fails fast
    Faulted,
}

/// A running recording.
///
/// Exists exactly while the device has been told to start and not yet told
/// to stop.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub started_at: Instant,
    pub last_split_at: Instant,
    pub last_timestamp_at: Option<Instant>,
    pub current_filename: PathBuf,
    /// Index of the current file; grows with every split
    pub segment_index: u32,
}

impl RecordingSession {
    pub fn new(filename: PathBuf, segment_index: u32, started_at: Instant) -> Self {
        Self {
            started_at,
            last_split_at: started_at,
            last_timestamp_at: None,
            current_filename: filename,
            segment_index,
        }
    }

    /// Pick the single action due at `now`, highest priority first
    pub fn next_action(&self, config: &RecordingConfig, now: Instant) -> LoopAction {
        if config.duration_ms != 0
            && now.duration_since(self.started_at) > Duration::from_millis(config.duration_ms)
        {
            return LoopAction::Stop;
        }

        if config.split_interval_ms != 0
            && now.duration_since(self.last_split_at) > Duration::from_millis(config.split_interval_ms)
        {
            return LoopAction::Split;
        }

        if config.timestamp_period_ms != 0 {
            let last = self.last_timestamp_at.unwrap_or(self.started_at);
            if now.duration_since(last) > Duration::from_millis(config.timestamp_period_ms) {
                return LoopAction::Timestamp;
            }
        }

        LoopAction::Wait
    }
}

/// What the control loop does on one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Stop,
    Split,
    Timestamp,
    Wait,
}

/// Tunables for a scheduler
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Candidate names tried before giving up on a free filename
    pub filename_retry_limit: u32,
    /// Frame marker reads tried before giving up on a timestamp
    pub timestamp_retry_limit: u32,
    /// Device wait between frame marker reads
    pub timestamp_retry_wait: Duration,
    /// Device wait per control-loop tick while recording
    pub tick: Duration,
    /// Control-loop sleep while idle; stop requests cut it short
    pub idle_wait: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            filename_retry_limit: 100,
            timestamp_retry_limit: 100,
            timestamp_retry_wait: Duration::from_millis(10),
            tick: Duration::from_millis(1),
            idle_wait: Duration::from_millis(100),
        }
    }
}

/// Snapshot returned by `status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub current_filename: Option<PathBuf>,
    pub segment_index: Option<u32>,
    pub elapsed_ms: Option<u64>,
    pub fault: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MediaKind;

    fn config(duration_ms: u64, split_interval_ms: u64, timestamp_period_ms: u64) -> RecordingConfig {
        RecordingConfig {
            duration_ms,
            split_interval_ms,
            timestamp_period_ms,
            ..RecordingConfig::defaults(MediaKind::Video)
        }
    }

    #[test]
    fn test_stop_has_priority_over_split() {
        let t0 = Instant::now();
        let session = RecordingSession::new(PathBuf::from("a.h264"), 0, t0);

        let action = session.next_action(&config(1000, 200, 100), t0 + Duration::from_millis(1001));
        assert_eq!(action, LoopAction::Stop);
    }

    #[test]
    fn test_split_then_timestamp_then_wait() {
        let t0 = Instant::now();
        let mut session = RecordingSession::new(PathBuf::from("a.h264"), 0, t0);
        let cfg = config(0, 200, 100);

        assert_eq!(session.next_action(&cfg, t0 + Duration::from_millis(50)), LoopAction::Wait);
        assert_eq!(
            session.next_action(&cfg, t0 + Duration::from_millis(201)),
            LoopAction::Split
        );

        session.last_split_at = t0 + Duration::from_millis(201);
        assert_eq!(
            session.next_action(&cfg, t0 + Duration::from_millis(202)),
            LoopAction::Timestamp
        );

        session.last_timestamp_at = Some(t0 + Duration::from_millis(202));
        assert_eq!(
            session.next_action(&cfg, t0 + Duration::from_millis(203)),
            LoopAction::Wait
        );
    }

    #[test]
    fn test_zero_disables_everything() {
        let t0 = Instant::now();
        let session = RecordingSession::new(PathBuf::from("a.wav"), 0, t0);

        let action = session.next_action(&config(0, 0, 0), t0 + Duration::from_secs(3600));
        assert_eq!(action, LoopAction::Wait);
    }
}
