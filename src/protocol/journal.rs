//! Append-only lifecycle journal.
//!
//! Every round writes `IWANT` when it starts asking and exactly one
//! terminal tag when it ends. The journal is the protocol's observable
//! record; diagnostics go through `tracing` instead.

use std::io::{self, Write};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol::types::Record;
use crate::trace::warn;

/// Lifecycle markers, one closed set shared with the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Round start: admission requested.
    Want,
    /// Terminal: the arbiter granted admission.
    Admitted,
    /// Terminal: the arbiter refused; it is closing down.
    Closed,
    /// Terminal: the round failed client-side.
    Failed,
}

impl Tag {
    /// The five-character wire marker.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Tag::Want => "IWANT",
            Tag::Admitted => "IAMIN",
            Tag::Closed => "CLOSD",
            Tag::Failed => "FAILD",
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only sink for `(record, tag)` pairs.
///
/// One line per entry:
/// `<millis-since-epoch> ; <id> ; <pid> ; <tid> ; <occupancy> ; <TAG>`
pub struct Journal {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Journal {
    /// Journal to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::with_sink(io::stdout())
    }

    /// Journal to an arbitrary sink (tests capture entries this way).
    pub fn with_sink(sink: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(sink)),
        }
    }

    /// Appends one entry.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the sink write or flush fails.
    pub fn append(&self, record: &Record, tag: Tag) -> io::Result<()> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        let mut out = match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        writeln!(
            out,
            "{} ; {} ; {} ; {} ; {} ; {}",
            millis, record.id, record.origin.pid, record.origin.tid, record.occupancy, tag
        )?;
        out.flush()
    }

    /// Appends one entry, reporting rather than propagating failure.
    ///
    /// Losing a journal line never changes a round's outcome.
    pub fn note(&self, record: &Record, tag: Tag) {
        if let Err(err) = self.append(record, tag) {
            warn!(id = record.id, tag = %tag, error = %err, "journal append failed");
        }
    }
}
