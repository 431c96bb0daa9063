//! Process runtime: startup assembly and the round launcher.
//!
//! - `client`: opens the shared request channel and the gate semaphores at
//!   startup (fatal on failure, before any round exists) and owns them for
//!   the process lifetime.
//! - `dispatcher`: the tick-driven bounded worker pool that launches rounds
//!   inside the issuing window and joins them all before returning.

pub mod client;
pub mod dispatcher;
