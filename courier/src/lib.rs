//! # courier — messaging-client data-layer building blocks
//!
//! `courier` bundles two focused sub-crates wired together here for
//! convenience:
//!
//! | Sub-crate         | Role                                                |
//! |-------------------|-----------------------------------------------------|
//! | `courier-tasks`   | Serial background task queue (process → finish)     |
//! | `courier-updates` | Update-sequence gap detection, buffering and replay |
//!
//! ## Quick start: background work
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use courier::{TaskQueue, tasks};
//!
//! # struct ScalePhoto;
//! # impl tasks::Task for ScalePhoto {
//! #     fn id(&self) -> tasks::TaskId { 1 }
//! #     fn process(&self) {}
//! #     fn finish(&self) {}
//! # }
//! # async fn demo() {
//! // Worker thread starts on first enqueue, stops after 5 s of idleness.
//! let queue = TaskQueue::new(Some(Duration::from_secs(5)));
//! queue.add_task(Arc::new(ScalePhoto));
//! # }
//! ```
//!
//! ## Quick start: update sequencing
//!
//! Track one [`PtsWaiter`] per channel, call `updated` for every incoming
//! update, and replay with `apply_skipped_updates` when a gap resolves or
//! its timer fires.  See the `courier-updates` crate docs for the full
//! dispatch contract.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Re-export of [`courier_tasks`] — task trait, identifiers, and the queue.
pub use courier_tasks as tasks;

/// Re-export of [`courier_updates`] — waiter, host trait, and gap timers.
pub use courier_updates as updates;

// ─── Convenience re-exports ───────────────────────────────────────────────────

pub use courier_tasks::{Task, TaskId, TaskQueue, next_task_id};
pub use courier_updates::{ChannelId, GapTimers, PtsWaiter, UpdateHost};
