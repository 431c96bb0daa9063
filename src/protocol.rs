//! The admission request/reply protocol.
//!
//! - `types`: the request/reply record, requester identity, the fixed wire
//!   layout, and the naming conventions for per-round reply channels and
//!   signals.
//! - `journal`: the append-only lifecycle log (`IWANT`/`IAMIN`/`CLOSD`/`FAILD`).
//! - `round`: one full protocol round, from record construction through
//!   reply receipt and teardown.

pub mod journal;
pub mod round;
pub mod types;
