//! Named-pipe transport for fixed-size protocol frames.
//!
//! Two kinds of channel, with opposite ownership:
//!
//! - [`RequestPipe`] — the long-lived shared request channel. It already
//!   exists (the arbiter created it); we open the write end and never unlink
//!   the name.
//! - [`ReplyPipe`] — a per-round reply channel. We create the name
//!   exclusively, hold the read end, and unlink the name on drop.
//!
//! Frames are written in a single `write(2)` and must fit in `PIPE_BUF`, so
//! writes from different processes or threads can never interleave.
//!
//! # Reader-first rendezvous
//!
//! A reply pipe is opened for reading with `O_NONBLOCK` immediately after
//! creation: the requester is always the first party at the rendezvous, and
//! a plain blocking `open(O_RDONLY)` would sleep until the arbiter opened
//! the write end.

use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};

use rustix::fs::{self, CWD, FileType, Mode, OFlags};
use rustix::io::Errno;
use thiserror::Error;

/// Result alias for channel transport operations.
pub type Result<T> = std::result::Result<T, FifoError>;

/// Contextual errors produced by the FIFO transport.
#[derive(Debug, Error)]
pub enum FifoError {
    /// `mkfifo`, `open`, `read`, `write`, etc. failed with an errno.
    #[error("{op} failed for `{path}`: {source}")]
    Posix {
        op: &'static str,
        path: String,
        source: Errno,
    },
    /// A frame write moved fewer bytes than the frame holds.
    #[error("short write on `{path}`: sent {sent} of {expected} bytes")]
    ShortWrite {
        path: String,
        expected: usize,
        sent: usize,
    },
    /// A frame read returned fewer bytes than one frame.
    #[error("short read on `{path}`: got {got} of {expected} bytes")]
    ShortRead {
        path: String,
        expected: usize,
        got: usize,
    },
}

impl FifoError {
    fn posix(op: &'static str, path: &Path, source: Errno) -> Self {
        Self::Posix {
            op,
            path: path.display().to_string(),
            source,
        }
    }
}

/// Retries an operation while it fails with `EINTR`.
fn retry_eintr<T>(mut op: impl FnMut() -> rustix::io::Result<T>) -> rustix::io::Result<T> {
    loop {
        match op() {
            Err(Errno::INTR) => continue,
            other => return other,
        }
    }
}

/// Write end of the shared request channel.
///
/// The name belongs to the arbiter; dropping this handle closes the
/// descriptor and nothing else. The open is blocking: like the original
/// protocol, the client waits here until the arbiter holds the read end.
pub struct RequestPipe {
    fd: OwnedFd,
    path: PathBuf,
}

impl RequestPipe {
    /// Opens an existing FIFO write-only.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the path does not exist or cannot be opened for
    /// writing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let fd = fs::open(&path, OFlags::WRONLY, Mode::empty())
            .map_err(|err| FifoError::posix("open", &path, err))?;
        Ok(Self { fd, path })
    }

    /// Writes one whole frame.
    ///
    /// The caller must hold the write gate; the gate, not the pipe, is what
    /// orders concurrent writers.
    ///
    /// # Errors
    ///
    /// Returns `Err` on a syscall failure or a short write.
    pub fn send(&self, frame: &[u8]) -> Result<()> {
        let sent = retry_eintr(|| rustix::io::write(&self.fd, frame))
            .map_err(|err| FifoError::posix("write", &self.path, err))?;
        if sent != frame.len() {
            return Err(FifoError::ShortWrite {
                path: self.path.display().to_string(),
                expected: frame.len(),
                sent,
            });
        }
        Ok(())
    }

    /// The path this pipe was opened at.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read end of a per-round reply channel, created by this process.
///
/// Creation is exclusive: a pre-existing name means a stale leftover from a
/// crashed round and is a hard error, never silently reclaimed. Dropping the
/// handle closes the descriptor and unlinks the name.
pub struct ReplyPipe {
    fd: OwnedFd,
    path: PathBuf,
}

impl ReplyPipe {
    /// Creates a fresh FIFO at `path` and opens it read-only, non-blocking.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the name already exists (`EEXIST`) or the FIFO
    /// cannot be created or opened. On an open failure the just-created
    /// name is unlinked before returning.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        fs::mknodat(
            CWD,
            &path,
            FileType::Fifo,
            Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP,
            0,
        )
        .map_err(|err| FifoError::posix("mkfifo", &path, err))?;

        let fd = match fs::open(&path, OFlags::RDONLY | OFlags::NONBLOCK, Mode::empty()) {
            Ok(fd) => fd,
            Err(err) => {
                let _ = fs::unlink(&path);
                return Err(FifoError::posix("open", &path, err));
            }
        };

        Ok(Self { fd, path })
    }

    /// Reads exactly one frame into `buf`.
    ///
    /// The reply signal must have been waited on first; at that point the
    /// whole frame is in the pipe, so a single `read(2)` either returns it
    /// all or reports a protocol violation. A short or empty read is an
    /// error, not a partial result.
    ///
    /// # Errors
    ///
    /// Returns `Err` on a syscall failure or a read of fewer than
    /// `buf.len()` bytes.
    pub fn recv_exact(&self, buf: &mut [u8]) -> Result<()> {
        let expected = buf.len();
        let got = retry_eintr(|| rustix::io::read(&self.fd, &mut *buf))
            .map_err(|err| FifoError::posix("read", &self.path, err))?;
        if got != expected {
            return Err(FifoError::ShortRead {
                path: self.path.display().to_string(),
                expected,
                got,
            });
        }
        Ok(())
    }

    /// The path this pipe was created at.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ReplyPipe {
    fn drop(&mut self) {
        if let Err(err) = fs::unlink(&self.path) {
            crate::trace::warn!(path = %self.path.display(), error = %err, "reply pipe unlink failed");
        }
    }
}
