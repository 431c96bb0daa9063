//! Client startup: open the shared channel and the gates, then drive rounds.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use thiserror::Error;

use crate::ipc::fifo::{FifoError, RequestPipe};
use crate::ipc::sem::{Opener, SemError, Semaphore, Timeout};
use crate::protocol::journal::Journal;
use crate::protocol::round::RoundShared;
use crate::protocol::types::{send_pending_name, write_gate_name};
use crate::runtime::dispatcher::{Dispatcher, DispatcherConfig, Report};
use crate::trace::info;

/// Default semaphore namespace shared with the arbiter.
pub const DEFAULT_NAMESPACE: &str = "wicket";

/// Default occupancy duration requested from the arbiter.
pub const DEFAULT_OCCUPANCY_HINT: i32 = 10;

/// Default bound on the wait for a reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for one client process invocation.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Path of the pre-existing shared request FIFO.
    pub request_path: PathBuf,
    /// Prefix of the gate and reply semaphore names.
    pub namespace: String,
    /// Wall-clock window during which new rounds may be launched.
    pub run_window: Duration,
    /// Pacing interval between launch attempts.
    pub tick: Duration,
    /// Ceiling on concurrently running rounds.
    pub max_inflight: usize,
    /// Bound on each round's wait for a reply.
    pub reply_timeout: Timeout,
    /// Occupancy duration requested from the arbiter.
    pub occupancy_hint: i32,
}

impl ClientConfig {
    /// Configuration with protocol defaults for everything but the channel
    /// path and the issuing window.
    #[must_use]
    pub fn new(request_path: impl Into<PathBuf>, run_window: Duration) -> Self {
        let pacing = DispatcherConfig::default();
        Self {
            request_path: request_path.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            run_window,
            tick: pacing.tick,
            max_inflight: pacing.max_inflight,
            reply_timeout: Timeout::Duration(DEFAULT_REPLY_TIMEOUT),
            occupancy_hint: DEFAULT_OCCUPANCY_HINT,
        }
    }
}

/// Configuration-time failures. All of these are fatal: they happen before
/// any round has been spawned.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The shared request channel could not be opened.
    #[error("request channel: {0}")]
    RequestChannel(FifoError),
    /// A gate semaphore could not be opened.
    #[error("synchronization gate: {0}")]
    Gate(SemError),
}

/// A connected client, owning the shared request channel and the gate
/// semaphores for the process lifetime.
pub struct Client {
    shared: Arc<RoundShared>,
    pacing: DispatcherConfig,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Opens the shared request channel and the gate semaphores.
    ///
    /// Reply pipes will be created next to the request channel.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the channel or either gate semaphore cannot be
    /// opened. Nothing has been journaled and no thread has been spawned
    /// when this fails.
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let request =
            RequestPipe::open(&config.request_path).map_err(ClientError::RequestChannel)?;
        let gate = Semaphore::<Opener>::open(&write_gate_name(&config.namespace))
            .map_err(ClientError::Gate)?;
        let pending = Semaphore::<Opener>::open(&send_pending_name(&config.namespace))
            .map_err(ClientError::Gate)?;

        let reply_dir = config
            .request_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        info!(
            path = %config.request_path.display(),
            namespace = %config.namespace,
            "connected to arbiter channel"
        );

        Ok(Self {
            shared: Arc::new(RoundShared {
                request,
                gate,
                pending,
                counter: AtomicU64::new(0),
                journal: Journal::stdout(),
                reply_dir,
                namespace: config.namespace,
                occupancy_hint: config.occupancy_hint,
                reply_timeout: config.reply_timeout,
            }),
            pacing: DispatcherConfig {
                run_window: config.run_window,
                tick: config.tick,
                max_inflight: config.max_inflight,
            },
        })
    }

    /// Runs the dispatch loop to completion and returns its tally.
    pub fn run(&self) -> Report {
        Dispatcher::new(self.pacing).run(&self.shared)
    }
}
