//! Tick-driven bounded launcher for protocol rounds.
//!
//! The requirement is "never more than N rounds in flight inside the
//! issuing window": each tick the dispatcher reaps finished round threads
//! and, while under the ceiling, launches one more. Once the window closes
//! it stops launching and joins every launched round unconditionally — the
//! join phase is not time-bounded and reports no partial results.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use minstant::Instant;

use crate::protocol::round::{self, Outcome, RoundShared};
use crate::trace::{debug, info};

/// Configuration for the dispatch loop.
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Wall-clock window during which new rounds may be launched.
    pub run_window: Duration,
    /// Pacing interval between launch attempts.
    pub tick: Duration,
    /// Ceiling on concurrently running rounds.
    pub max_inflight: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            run_window: Duration::from_secs(10),
            tick: Duration::from_millis(800),
            max_inflight: 4,
        }
    }
}

/// End-of-run tally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    /// Rounds launched inside the window.
    pub launched: u64,
    /// Rounds the arbiter admitted.
    pub admitted: u64,
    /// Rounds the arbiter refused.
    pub closed: u64,
    /// Rounds that failed client-side.
    pub failed: u64,
}

#[derive(Default)]
struct Tally {
    admitted: AtomicU64,
    closed: AtomicU64,
    failed: AtomicU64,
}

/// Drives rounds against shared client state.
pub struct Dispatcher {
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Creates a dispatcher with the given pacing and ceiling.
    #[must_use]
    pub const fn new(config: DispatcherConfig) -> Self {
        Self { config }
    }

    /// Launches rounds for the configured window, joins them all, and
    /// returns the tally.
    ///
    /// Round failures are absorbed here: each failed round has already
    /// journaled `FAILD` and traced its error, and the others run
    /// unaffected.
    pub fn run(&self, shared: &Arc<RoundShared>) -> Report {
        let tally = Arc::new(Tally::default());

        let launched = {
            let shared = Arc::clone(shared);
            let tally = Arc::clone(&tally);
            self.launch_loop(move |_seq| match round::run(&shared) {
                Ok(Outcome::Admitted) => {
                    tally.admitted.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Outcome::Closed) => {
                    tally.closed.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    tally.failed.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        let report = Report {
            launched,
            admitted: tally.admitted.load(Ordering::Relaxed),
            closed: tally.closed.load(Ordering::Relaxed),
            failed: tally.failed.load(Ordering::Relaxed),
        };
        info!(
            launched = report.launched,
            admitted = report.admitted,
            closed = report.closed,
            failed = report.failed,
            "dispatch complete"
        );
        report
    }

    /// The launch loop, generic over the round body.
    ///
    /// Returns the number of rounds launched, after joining every one of
    /// them.
    fn launch_loop<F>(&self, body: F) -> u64
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let deadline = Instant::now() + self.config.run_window;
        let body = Arc::new(body);
        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        let mut launched = 0u64;

        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            thread::sleep(self.config.tick.min(remaining));
            if deadline.checked_duration_since(Instant::now()).is_none() {
                break;
            }

            handles.retain(|handle| !handle.is_finished());
            if handles.len() >= self.config.max_inflight {
                continue;
            }

            let seq = launched;
            launched += 1;
            let body = Arc::clone(&body);
            let handle = thread::Builder::new()
                .name(format!("round-{seq}"))
                .spawn(move || body(seq))
                .expect("failed to spawn round thread");
            handles.push(handle);
        }

        debug!(
            launched,
            inflight = handles.len(),
            "issuing window closed, joining rounds"
        );
        for handle in handles {
            let _ = handle.join();
        }
        launched
    }
}
