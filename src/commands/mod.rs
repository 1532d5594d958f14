//! Hosted objects
//!
//! Everything a node exposes over RPC: the recording schedulers (their
//! `RpcObject` impl lives in `recording`), system control and file
//! management.

pub mod filesystem;
pub mod recording;
pub mod system;

pub use filesystem::FileSystem;
pub use system::SystemControl;
