//! Client engine for a named-pipe critical-section arbiter.
//!
//! Requester threads send admission requests to an external arbiter process
//! over one shared FIFO, serialized by a named write-gate semaphore, and each
//! thread waits for its reply on a private FIFO + semaphore pair named after
//! its `(pid, tid)` identity.

pub mod ipc;
pub mod protocol;
pub mod runtime;
pub mod trace;

#[doc(inline)]
pub use ipc::sem::Timeout;

#[doc(inline)]
pub use protocol::types::{Record, RequesterId};

pub use trace::init_tracing;
