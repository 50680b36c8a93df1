//! Serial background task queue.
//!
//! A [`TaskQueue`] accepts opaque units of work ([`Task`]s), executes them
//! one at a time on a single lazily-started worker thread, and hands every
//! completed task back to the owning Tokio context where its `finish` phase
//! runs.  It exists to keep heavy file and media preparation (scaling
//! images, probing files, reading audio metadata) off the interactive
//! context without giving up ordering: tasks are processed in submission
//! order and finished in completion order.
//!
//! # Example
//! ```rust,no_run
//! use std::sync::{Arc, Mutex};
//! use std::time::Duration;
//! use courier_tasks::{next_task_id, Task, TaskId, TaskQueue};
//!
//! struct ScalePhoto {
//!     id:     TaskId,
//!     source: Vec<u8>,
//!     scaled: Mutex<Option<Vec<u8>>>,
//! }
//!
//! impl Task for ScalePhoto {
//!     fn id(&self) -> TaskId { self.id }
//!
//!     fn process(&self) {
//!         // Heavy work, off the interactive context.  An empty result is
//!         // the in-band failure encoding `finish` interprets.
//!         *self.scaled.lock().unwrap() = Some(self.source.clone());
//!     }
//!
//!     fn finish(&self) {
//!         // Back on the owning context: hand the result to the application.
//!         let _scaled = self.scaled.lock().unwrap().take();
//!     }
//! }
//!
//! # async fn demo() {
//! let queue = TaskQueue::new(Some(Duration::from_secs(5)));
//! let id = queue.add_task(Arc::new(ScalePhoto {
//!     id:     next_task_id(),
//!     source: vec![0u8; 1024],
//!     scaled: Mutex::new(None),
//! }));
//! queue.cancel_task(id); // best-effort; a no-op once finishing is underway
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod queue;
pub mod task;

pub use queue::TaskQueue;
pub use task::{Task, TaskId, next_task_id};
