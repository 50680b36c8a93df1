//! The unit of background work.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier of a [`Task`], allocated via [`next_task_id`].
pub type TaskId = u64;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh, process-unique [`TaskId`].
///
/// Identifiers are monotonic and never zero, so `0` can serve as a
/// "no task" sentinel in application state.
pub fn next_task_id() -> TaskId {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// A unit of background work with a two-phase lifecycle.
///
/// [`process`](Task::process) runs on the queue's worker thread and must
/// store its outcome inside the task itself (interior mutability);
/// [`finish`](Task::finish) runs later on the owning context and consumes
/// that outcome.  Neither phase returns a value and neither may panic across
/// the queue boundary: a task that cannot complete its operation encodes
/// the failure into its own result (a zero-size sentinel, an empty buffer)
/// for `finish` to interpret.
///
/// A task is shared between the queue and the worker only for the duration
/// of the processing window; afterwards ownership is handed back whole.
pub trait Task: Send + Sync + 'static {
    /// Stable identifier, used by [`TaskQueue::cancel_task`](crate::TaskQueue::cancel_task).
    fn id(&self) -> TaskId;

    /// Heavy phase, invoked exactly once on the worker thread.
    fn process(&self);

    /// Completion phase, invoked at most once on the owning context.
    ///
    /// Never called for tasks cancelled before finishing or abandoned by
    /// [`TaskQueue::stop`](crate::TaskQueue::stop).
    fn finish(&self);
}
