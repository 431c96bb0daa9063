//! Record and naming types for the admission protocol.

use std::fmt;
use std::path::{Path, PathBuf};

/// Size in bytes of one record on the wire.
pub const WIRE_SIZE: usize = 24;

/// Identity of a requesting thread.
///
/// The pair is globally distinguishing while the round lives: the arbiter
/// computes the reply channel path and reply signal name from it without
/// prior negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequesterId {
    /// OS process id.
    pub pid: u32,
    /// OS thread id.
    pub tid: u64,
}

impl RequesterId {
    /// Returns the identity of the calling thread.
    #[must_use]
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            tid: rustix::thread::gettid().as_raw_nonzero().get() as u64,
        }
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.pid, self.tid)
    }
}

/// One admission request or reply.
///
/// Immutable after construction. Request and reply share the layout so a
/// generic reader can decode either.
///
/// # Wire Format
///
/// Exactly [`WIRE_SIZE`] bytes, little-endian:
///
/// ```text
/// ┌────────────┬─────────┬────────────┬──────────────┐
/// │ id (8)     │ pid (4) │ tid (8)    │ occupancy (4)│
/// └────────────┴─────────┴────────────┴──────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    /// Request identifier, unique within the client process lifetime.
    pub id: u64,
    /// Identity of the requesting thread.
    pub origin: RequesterId,
    /// Requested occupancy duration. Negative in a reply means the arbiter
    /// refused the request (it is closing down).
    pub occupancy: i32,
}

impl Record {
    /// Builds a record. Pure construction, no I/O, no failure modes.
    #[must_use]
    pub const fn new(id: u64, origin: RequesterId, occupancy: i32) -> Self {
        Self {
            id,
            origin,
            occupancy,
        }
    }

    /// Whether this reply refuses admission.
    #[must_use]
    pub const fn refused(&self) -> bool {
        self.occupancy < 0
    }

    /// Serializes into the fixed wire layout.
    #[must_use]
    pub fn encode(&self) -> [u8; WIRE_SIZE] {
        let mut frame = [0u8; WIRE_SIZE];
        frame[0..8].copy_from_slice(&self.id.to_le_bytes());
        frame[8..12].copy_from_slice(&self.origin.pid.to_le_bytes());
        frame[12..20].copy_from_slice(&self.origin.tid.to_le_bytes());
        frame[20..24].copy_from_slice(&self.occupancy.to_le_bytes());
        frame
    }

    /// Deserializes from the fixed wire layout.
    ///
    /// Infallible: the frame size is checked by the type, and every bit
    /// pattern is a valid record.
    #[must_use]
    pub fn decode(frame: &[u8; WIRE_SIZE]) -> Self {
        let mut id = [0u8; 8];
        id.copy_from_slice(&frame[0..8]);
        let mut pid = [0u8; 4];
        pid.copy_from_slice(&frame[8..12]);
        let mut tid = [0u8; 8];
        tid.copy_from_slice(&frame[12..20]);
        let mut occupancy = [0u8; 4];
        occupancy.copy_from_slice(&frame[20..24]);

        Self {
            id: u64::from_le_bytes(id),
            origin: RequesterId {
                pid: u32::from_le_bytes(pid),
                tid: u64::from_le_bytes(tid),
            },
            occupancy: i32::from_le_bytes(occupancy),
        }
    }
}

/// Path of the reply channel for a requester, next to the request channel.
///
/// External parties derive the same path from the record alone.
#[must_use]
pub fn reply_channel_path(dir: &Path, id: RequesterId) -> PathBuf {
    dir.join(format!("{}.{}", id.pid, id.tid))
}

/// Name of the per-request reply signal for a requester.
#[must_use]
pub fn reply_signal_name(namespace: &str, id: RequesterId) -> String {
    format!("/{}-reply-{}-{}", namespace, id.pid, id.tid)
}

/// Name of the write gate serializing the shared request channel.
#[must_use]
pub fn write_gate_name(namespace: &str) -> String {
    format!("/{namespace}-gate")
}

/// Name of the send-complete signal telling the arbiter a request is ready.
#[must_use]
pub fn send_pending_name(namespace: &str) -> String {
    format!("/{namespace}-pending")
}
