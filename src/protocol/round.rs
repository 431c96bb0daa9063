//! One full protocol round: build, send, await, receive, tear down.
//!
//! The round owns two ephemeral named resources — its reply pipe and its
//! reply signal — and both unwind by drop on every exit path, in the
//! required order (signal first, then pipe). The shared request channel and
//! the gate semaphores are borrowed from [`RoundShared`] and outlive every
//! round.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::ipc::fifo::{FifoError, ReplyPipe, RequestPipe};
use crate::ipc::sem::{Creator, Opener, SemError, Semaphore, Timeout};
use crate::protocol::journal::{Journal, Tag};
use crate::protocol::types::{
    Record, RequesterId, WIRE_SIZE, reply_channel_path, reply_signal_name,
};
use crate::trace::{debug, error};

/// State shared by every round of one client process.
///
/// Owned by the client for the process lifetime and handed to rounds behind
/// an `Arc`. The counter is the only mutable part; ids come from
/// `fetch_add`, so concurrent rounds can never observe the same value.
pub struct RoundShared {
    /// Write end of the shared request channel.
    pub request: RequestPipe,
    /// Mutual exclusion over writes to the request channel.
    pub gate: Semaphore<Opener>,
    /// Counting signal raised after each completed request write.
    pub pending: Semaphore<Opener>,
    /// Process-wide request id counter.
    pub counter: AtomicU64,
    /// Lifecycle journal.
    pub journal: Journal,
    /// Directory reply pipes are created in.
    pub reply_dir: PathBuf,
    /// Prefix shared by all semaphore names of this arbiter group.
    pub namespace: String,
    /// Occupancy duration requested from the arbiter.
    pub occupancy_hint: i32,
    /// Bound on the wait for a reply.
    pub reply_timeout: Timeout,
}

impl RoundShared {
    fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }
}

/// How a completed round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The arbiter granted admission (`IAMIN`).
    Admitted,
    /// The arbiter refused; it is closing down (`CLOSD`).
    Closed,
}

/// Round-local failures. None of these are fatal to the process; the
/// dispatcher absorbs them and other rounds run unaffected.
#[derive(Debug, Error)]
pub enum RoundError {
    /// Could not create or open the reply pipe.
    #[error("reply channel: {0}")]
    ReplyChannel(FifoError),
    /// Could not create the reply signal, or waiting on it failed.
    #[error("reply signal: {0}")]
    ReplySignal(SemError),
    /// Could not acquire the write gate.
    #[error("write gate: {0}")]
    Gate(SemError),
    /// Could not raise the send-complete signal.
    #[error("send-complete signal: {0}")]
    Notify(SemError),
    /// Writing the request failed.
    #[error("request send: {0}")]
    Send(FifoError),
    /// Reading the reply failed.
    #[error("reply receive: {0}")]
    Receive(FifoError),
    /// The arbiter did not answer within the reply timeout.
    #[error("timed out waiting for a reply")]
    ReplyTimeout,
}

/// Runs one round and journals its lifecycle.
///
/// Writes `IWANT` when the request is built and exactly one terminal tag
/// when the round ends: `IAMIN` or `CLOSD` from the reply, `FAILD` on any
/// error.
///
/// # Errors
///
/// Returns the round-local error after journaling `FAILD`; every resource
/// the round acquired has already been released.
pub fn run(shared: &RoundShared) -> Result<Outcome, RoundError> {
    let request = Record::new(
        shared.next_id(),
        RequesterId::current(),
        shared.occupancy_hint,
    );
    shared.journal.note(&request, Tag::Want);

    match exchange(shared, &request) {
        Ok(reply) => {
            let (outcome, tag) = if reply.refused() {
                (Outcome::Closed, Tag::Closed)
            } else {
                (Outcome::Admitted, Tag::Admitted)
            };
            debug!(id = request.id, reply_occupancy = reply.occupancy, tag = %tag, "round complete");
            shared.journal.note(&reply, tag);
            Ok(outcome)
        }
        Err(err) => {
            error!(id = request.id, error = %err, "round failed");
            shared.journal.note(&request, Tag::Failed);
            Err(err)
        }
    }
}

/// The request/reply exchange proper.
///
/// Declaration order matters: `reply_signal` is declared after
/// `reply_pipe`, so on any exit the signal is destroyed first and the pipe
/// second, and the gate guard (innermost) is always released before either.
fn exchange(shared: &RoundShared, request: &Record) -> Result<Record, RoundError> {
    let reply_pipe = ReplyPipe::create(reply_channel_path(&shared.reply_dir, request.origin))
        .map_err(RoundError::ReplyChannel)?;
    let reply_signal =
        Semaphore::<Creator>::create(&reply_signal_name(&shared.namespace, request.origin), 0)
            .map_err(RoundError::ReplySignal)?;

    {
        let _held = shared
            .gate
            .acquire(Timeout::Infinite)
            .map_err(RoundError::Gate)?;
        shared
            .request
            .send(&request.encode())
            .map_err(RoundError::Send)?;
    }
    shared.pending.post().map_err(RoundError::Notify)?;

    match reply_signal.wait(shared.reply_timeout) {
        Ok(()) => {}
        Err(SemError::Timeout { .. }) => return Err(RoundError::ReplyTimeout),
        Err(err) => return Err(RoundError::ReplySignal(err)),
    }

    let mut frame = [0u8; WIRE_SIZE];
    reply_pipe.recv_exact(&mut frame).map_err(RoundError::Receive)?;
    Ok(Record::decode(&frame))
}
