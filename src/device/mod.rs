//! Recording device capability
//!
//! Hardware drivers live outside this crate; they plug in through the
//! [`Device`] trait. A simulated device is provided for nodes without
//! hardware and for tests.

pub mod simulated;
pub mod traits;

pub use simulated::{DeviceCall, SimulatedDevice};
pub use traits::{Device, DeviceError, DeviceResult, FrameMarker, MediaKind, Resolution};
