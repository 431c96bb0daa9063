//! Named, filesystem-visible IPC primitives.
//!
//! This module wraps the POSIX entities the admission protocol runs over:
//!
//! - `fifo`: named pipes — the long-lived shared request channel and the
//!   per-round reply channels.
//! - `sem`: named semaphores — the write gate, the send-complete signal,
//!   and the per-round reply signals.
//!
//! Both follow the same ownership rule: whoever *creates* a named entity
//! unlinks it on drop; whoever merely *opens* one leaves the name alone.

pub mod fifo;
pub mod sem;
