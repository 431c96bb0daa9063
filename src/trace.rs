//! Tracing infrastructure for diagnostics.
//!
//! Diagnostics go to standard error so they never mix with the protocol
//! journal on standard output. Filter with `RUST_LOG` (e.g.
//! `RUST_LOG=wicket=debug`).

/// Initialize the tracing subscriber with timestamps.
///
/// Call this at the start of tests or the client binary. Output goes to
/// standard error.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wicket=info"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(false)
                .with_line_number(false)
                .with_timer(fmt::time::uptime()),
        )
        .with(filter)
        .init();
}

pub(crate) use tracing::{debug, error, info, warn};
