//! Recording system module
//!
//! This module implements the recording lifecycle for a single device:
//! - RecordingScheduler owning the device, its config and the control loop
//! - Filename templates with collision avoidance
//! - Frame timestamp sidecar files

pub mod filename;
pub mod scheduler;
pub mod state;
pub mod timestamp;

pub use filename::{FilenameAllocator, FilenameTemplate};
pub use scheduler::RecordingScheduler;
pub use state::{RecordingSession, SchedulerOptions, SchedulerState, SchedulerStatus};
