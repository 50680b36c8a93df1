//! Update-sequence reconciliation.
//!
//! Messaging servers assign a monotonically-increasing counter (**pts**) to
//! every update they push, together with the increment (**count**) the
//! update claims over the previous value.  If the client misses updates
//! (due to a disconnect, lag, or packet loss) the counter jumps forward.
//! This crate
//! tracks the counter per channel, detects such gaps, buffers the
//! out-of-order payloads that keep arriving while a gap is open, and
//! replays them in arrival order once the gap resolves.
//!
//! [`PtsWaiter`] is the per-channel engine; it is a pure state machine with
//! no timers or I/O of its own.  Everything temporal goes through the
//! [`UpdateHost`] collaborator: re-delivering buffered payloads and arming
//! or cancelling the per-channel single-shot gap timer.  [`GapTimers`] is a
//! ready-made Tokio implementation of that timer primitive.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod timers;
pub mod waiter;

pub use timers::GapTimers;
pub use waiter::{
    ChannelId, PtsWaiter, RECHECK_OVERLAP_TIMEOUT, UpdateHost, WAIT_FOR_SKIPPED_TIMEOUT,
};
