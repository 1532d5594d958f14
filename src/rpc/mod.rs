//! RPC object dispatch
//!
//! Objects implementing `RpcObject` are registered with a `Router` under a
//! path pattern, usually through an `ObjectHost`, and reached over HTTP via
//! `server`. Isolated objects live in worker processes behind an
//! `ObjectProxy`.

pub mod envelope;
pub mod host;
pub mod object;
pub mod proxy;
pub mod router;
pub mod server;
pub mod worker;

pub use envelope::{Args, Request, Response};
pub use host::{Catalog, HostOptions, HostSpec, ObjectHost};
pub use object::{to_json, RpcObject};
pub use proxy::{ObjectProxy, WorkerCommand};
pub use router::{Hooks, RegistrationId, Router};
