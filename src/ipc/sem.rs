//! POSIX named semaphores with type-safe ownership and automatic cleanup.
//!
//! The admission protocol uses three semaphores: the write gate and the
//! send-complete signal (opened by name, owned by the arbiter) and one
//! reply signal per round (created here, destroyed here). The typestate
//! markers encode that split:
//!
//! - [`Creator`] — `sem_open(O_CREAT | O_EXCL)`; drop closes **and unlinks**.
//! - [`Opener`] — `sem_open(0)`; drop only closes, the name persists.
//!
//! `rustix` has no named-semaphore wrapper, so this module calls the
//! `libc::sem_*` family directly and keeps every `unsafe` block behind a
//! safe API.
//!
//! Blocking waits take an explicit [`Timeout`]; expiry surfaces as the
//! distinct [`SemError::Timeout`] rather than hanging on an arbiter that
//! never answers.

use std::ffi::CString;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rustix::io::Errno;
use thiserror::Error;

/// Result alias for semaphore operations.
pub type Result<T> = std::result::Result<T, SemError>;

/// Timeout specification for blocking waits.
#[derive(Debug, Clone, Copy)]
pub enum Timeout {
    /// Wait indefinitely.
    Infinite,
    /// Wait for at most the specified duration.
    Duration(Duration),
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::Duration(d)
    }
}

/// Contextual errors produced by [`Semaphore`].
#[derive(Debug, Error)]
pub enum SemError {
    /// The provided semaphore name is invalid.
    #[error("invalid semaphore name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },
    /// `sem_open`, `sem_wait`, `sem_post`, etc. failed with an errno.
    #[error("{op} failed for `{name}`: {source}")]
    Posix {
        op: &'static str,
        name: String,
        source: Errno,
    },
    /// A bounded wait expired before the semaphore was posted.
    #[error("timed out waiting on `{name}`")]
    Timeout { name: String },
}

impl SemError {
    fn posix(op: &'static str, name: &str, source: Errno) -> Self {
        Self::Posix {
            op,
            name: name.to_string(),
            source,
        }
    }
}

/// Reads the errno left behind by a failed `libc::sem_*` call.
fn last_errno() -> Errno {
    Errno::from_raw_os_error(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
}

// Named semaphores become `sem.<name>` files, so the usable length is
// NAME_MAX minus that prefix.
const SEM_NAME_MAX: usize = 251;

/// Validates that a name meets POSIX `sem_open` requirements.
///
/// - Must start with '/'
/// - Must not contain additional slashes after the first
/// - Must not contain NUL bytes
/// - Must not exceed `SEM_NAME_MAX`
fn validate_sem_name(name: &str) -> Result<()> {
    if !name.starts_with('/') {
        return Err(SemError::InvalidName {
            name: name.to_string(),
            reason: "name must start with '/'",
        });
    }

    if name[1..].contains('/') {
        return Err(SemError::InvalidName {
            name: name.to_string(),
            reason: "name must not contain additional '/' characters",
        });
    }

    if name.contains('\0') {
        return Err(SemError::InvalidName {
            name: name.to_string(),
            reason: "name must not contain NUL bytes",
        });
    }

    if name.len() > SEM_NAME_MAX {
        return Err(SemError::InvalidName {
            name: name.to_string(),
            reason: "name length must be <= 251 bytes",
        });
    }

    Ok(())
}

/// Trait defining cleanup behavior for semaphore ownership modes.
///
/// Use the [`Creator`] or [`Opener`] markers; the constant is consulted in
/// `Drop` so the two modes are different types with different cleanup,
/// checked at compile time.
pub trait SemMode {
    /// Whether to unlink the semaphore name on drop.
    const SHOULD_UNLINK: bool;
}

/// Typestate marker for the process that creates a semaphore.
///
/// Dropping a `Semaphore<Creator>` closes the handle and unlinks the name.
pub struct Creator;
impl SemMode for Creator {
    const SHOULD_UNLINK: bool = true;
}

/// Typestate marker for processes that open an existing semaphore.
///
/// Dropping a `Semaphore<Opener>` only closes the handle; the creator is
/// responsible for the name.
pub struct Opener;
impl SemMode for Opener {
    const SHOULD_UNLINK: bool = false;
}

/// A POSIX named semaphore.
///
/// The `Mode` parameter ([`Creator`] or [`Opener`]) fixes cleanup behavior
/// at compile time. Ownership is unique, so the destroy-exactly-once rule
/// for per-round reply signals is enforced by the type system rather than
/// by caller discipline.
pub struct Semaphore<Mode: SemMode> {
    sem: NonNull<libc::sem_t>,
    name: String,
    _mode: PhantomData<Mode>,
}

// SAFETY: sem_post/sem_wait/sem_timedwait are async-signal-safe and
// thread-safe; the pointer refers to a kernel object, not thread-local
// state, so handles may move between and be shared across threads.
unsafe impl<Mode: SemMode> Send for Semaphore<Mode> {}
unsafe impl<Mode: SemMode> Sync for Semaphore<Mode> {}

impl Semaphore<Creator> {
    /// Creates a new named semaphore with the given initial value.
    ///
    /// Creation is exclusive: a pre-existing name is a hard `EEXIST` error,
    /// indicating a stale leftover from a crashed prior owner.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the name is invalid or `sem_open` fails.
    pub fn create(name: &str, initial: u32) -> Result<Self> {
        validate_sem_name(name)?;
        let c_name = CString::new(name).expect("validated name has no NUL");

        // SAFETY: c_name is a valid NUL-terminated string; O_CREAT takes the
        // two extra mode/value arguments per the sem_open contract.
        let raw = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o660 as libc::c_uint,
                initial as libc::c_uint,
            )
        };
        if raw.is_null() || raw == libc::SEM_FAILED {
            return Err(SemError::posix("sem_open", name, last_errno()));
        }

        // SAFETY: checked non-null above.
        let sem = unsafe { NonNull::new_unchecked(raw) };
        Ok(Self {
            sem,
            name: name.to_string(),
            _mode: PhantomData,
        })
    }
}

impl Semaphore<Opener> {
    /// Opens an existing named semaphore.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the name is invalid, the semaphore does not exist
    /// (`ENOENT`), or `sem_open` fails.
    pub fn open(name: &str) -> Result<Self> {
        validate_sem_name(name)?;
        let c_name = CString::new(name).expect("validated name has no NUL");

        // SAFETY: c_name is a valid NUL-terminated string; without O_CREAT
        // no extra arguments are read.
        let raw = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        if raw.is_null() || raw == libc::SEM_FAILED {
            return Err(SemError::posix("sem_open", name, last_errno()));
        }

        // SAFETY: checked non-null above.
        let sem = unsafe { NonNull::new_unchecked(raw) };
        Ok(Self {
            sem,
            name: name.to_string(),
            _mode: PhantomData,
        })
    }
}

impl<Mode: SemMode> Semaphore<Mode> {
    /// Increments the semaphore.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `sem_post` fails.
    pub fn post(&self) -> Result<()> {
        // SAFETY: self.sem is valid for the lifetime of self.
        if unsafe { libc::sem_post(self.sem.as_ptr()) } != 0 {
            return Err(SemError::posix("sem_post", &self.name, last_errno()));
        }
        Ok(())
    }

    /// Decrements the semaphore, blocking until it is positive or the
    /// timeout expires. `EINTR` is retried.
    ///
    /// # Errors
    ///
    /// Returns [`SemError::Timeout`] on expiry, or `Err` if the wait fails.
    pub fn wait(&self, timeout: Timeout) -> Result<()> {
        match timeout {
            Timeout::Infinite => loop {
                // SAFETY: self.sem is valid for the lifetime of self.
                if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                    return Ok(());
                }
                match last_errno() {
                    Errno::INTR => continue,
                    err => return Err(SemError::posix("sem_wait", &self.name, err)),
                }
            },
            Timeout::Duration(d) => {
                let deadline = absolute_deadline(d);
                loop {
                    // SAFETY: self.sem is valid; deadline is a fully
                    // initialized CLOCK_REALTIME timespec.
                    if unsafe { libc::sem_timedwait(self.sem.as_ptr(), &deadline) } == 0 {
                        return Ok(());
                    }
                    match last_errno() {
                        Errno::INTR => continue,
                        Errno::TIMEDOUT => {
                            return Err(SemError::Timeout {
                                name: self.name.clone(),
                            });
                        }
                        err => return Err(SemError::posix("sem_timedwait", &self.name, err)),
                    }
                }
            }
        }
    }

    /// Waits, then returns a guard that posts the semaphore back on drop.
    ///
    /// This is the scoped form of a mutual-exclusion acquire: the release
    /// happens on every exit path, including unwinds.
    ///
    /// # Errors
    ///
    /// Same as [`Semaphore::wait`].
    pub fn acquire(&self, timeout: Timeout) -> Result<SemGuard<'_, Mode>> {
        self.wait(timeout)?;
        Ok(SemGuard { sem: self })
    }

    /// The name this semaphore was created or opened with.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<Mode: SemMode> Drop for Semaphore<Mode> {
    fn drop(&mut self) {
        // SAFETY: self.sem has not been closed before (unique ownership).
        if unsafe { libc::sem_close(self.sem.as_ptr()) } != 0 {
            crate::trace::warn!(name = %self.name, error = %last_errno(), "sem_close failed");
        }

        if Mode::SHOULD_UNLINK {
            if let Ok(c_name) = CString::new(self.name.as_str()) {
                // SAFETY: c_name is a valid NUL-terminated string.
                if unsafe { libc::sem_unlink(c_name.as_ptr()) } != 0 {
                    crate::trace::warn!(name = %self.name, error = %last_errno(), "sem_unlink failed");
                }
            }
        }
    }
}

/// Scoped hold of a semaphore; posts it back on drop.
#[must_use = "releases the semaphore immediately if dropped"]
pub struct SemGuard<'a, Mode: SemMode> {
    sem: &'a Semaphore<Mode>,
}

impl<Mode: SemMode> Drop for SemGuard<'_, Mode> {
    fn drop(&mut self) {
        if let Err(err) = self.sem.post() {
            crate::trace::warn!(name = %self.sem.name(), error = %err, "gate release failed");
        }
    }
}

/// Converts a relative timeout into an absolute `CLOCK_REALTIME` deadline,
/// as `sem_timedwait` requires.
fn absolute_deadline(after: Duration) -> libc::timespec {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let deadline = now.saturating_add(after);
    libc::timespec {
        tv_sec: deadline.as_secs() as libc::time_t,
        tv_nsec: deadline.subsec_nanos() as libc::c_long,
    }
}
