//! The queue, its worker thread, and the owning-side finisher.
//!
//! Two ordered sequences back the queue: `pending` (not yet processed) and
//! `done` (processed, awaiting finish).  A task is in exactly one of
//! {pending, done, neither} at any time.  Both sequences are touched only
//! under their mutex and only for O(1) push/pop/peek; no lock is ever held
//! across `process` or `finish`.
//!
//! The worker peeks the front of `pending` without popping, processes it,
//! and pops it only if it is still the front, so a task cancelled mid-flight
//! has its result discarded.  Completed tasks are drained strictly FIFO by
//! a finisher task living on the Tokio runtime the queue was created in.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::task::{Task, TaskId};

// ─── Shared state ─────────────────────────────────────────────────────────────

/// Tasks awaiting processing, plus the worker's quit flag (kept under the
/// same mutex so the condvar wait can observe both).
struct Pending {
    tasks: VecDeque<Arc<dyn Task>>,
    quit:  bool,
}

struct Inner {
    pending: Mutex<Pending>,
    wake:    Condvar,
    done:    Mutex<VecDeque<Arc<dyn Task>>>,
    worker:  Mutex<Option<JoinHandle<()>>>,
    events:  mpsc::UnboundedSender<QueueEvent>,
}

enum QueueEvent {
    /// A task was enqueued; any armed idle teardown is cancelled.
    Enqueued,
    /// The worker placed the first task into an empty `done` sequence.
    Processed,
}

/// A poisoned lock only means some task panicked while the queue itself was
/// between operations; the sequences are still consistent, so keep going.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    /// Ask the worker to exit and wait for it.  The caller holds the worker
    /// slot lock; in-flight processing is allowed to complete first.
    fn halt_worker(&self, slot: &mut Option<JoinHandle<()>>) {
        let Some(handle) = slot.take() else { return };
        lock(&self.pending).quit = true;
        self.wake.notify_all();
        let _ = handle.join();
        lock(&self.pending).quit = false;
        tracing::debug!("[tasks] worker thread stopped");
    }
}

// ─── TaskQueue ────────────────────────────────────────────────────────────────

/// Serial background work pipeline.
///
/// Accepts [`Task`]s, processes them one at a time in submission order on a
/// lazily-started worker thread, and finishes them in completion order on
/// the owning Tokio runtime.  Must be created inside a Tokio runtime.
///
/// With a `stop_timeout`, the worker thread is torn down after the queue has
/// been idle for that long and is transparently re-created on the next
/// enqueue; `None` keeps the worker warm forever.
pub struct TaskQueue {
    inner:  Arc<Inner>,
    cancel: CancellationToken,
}

impl TaskQueue {
    /// Create an empty queue.  The worker thread is not started until the
    /// first task arrives.
    pub fn new(stop_timeout: Option<Duration>) -> Self {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            pending: Mutex::new(Pending { tasks: VecDeque::new(), quit: false }),
            wake:    Condvar::new(),
            done:    Mutex::new(VecDeque::new()),
            worker:  Mutex::new(None),
            events,
        });
        let cancel = CancellationToken::new();
        tokio::spawn(finisher_loop(Arc::clone(&inner), rx, stop_timeout, cancel.clone()));
        Self { inner, cancel }
    }

    /// Append `task` to the pending sequence and wake the worker.
    ///
    /// Non-blocking; returns the task's identifier immediately.
    pub fn add_task(&self, task: Arc<dyn Task>) -> TaskId {
        let id = task.id();
        lock(&self.inner.pending).tasks.push_back(task);
        self.wake_worker();
        id
    }

    /// Append a batch of tasks and wake the worker once.
    pub fn add_tasks(&self, tasks: Vec<Arc<dyn Task>>) {
        lock(&self.inner.pending).tasks.extend(tasks);
        self.wake_worker();
    }

    /// Remove the task with identifier `id` from pending if it has not been
    /// processed yet, otherwise from the completed sequence if it has not
    /// been finished yet.  Unknown identifiers are a silent no-op, so the
    /// call is idempotent.
    ///
    /// Cancellation is best-effort: a task already mid-`process` on the
    /// worker still completes, but its result is discarded and `finish` is
    /// never called.  A task already finished cannot be cancelled.
    pub fn cancel_task(&self, id: TaskId) {
        {
            let mut pending = lock(&self.inner.pending);
            if let Some(pos) = pending.tasks.iter().position(|task| task.id() == id) {
                pending.tasks.remove(pos);
                return;
            }
        }
        let mut done = lock(&self.inner.done);
        if let Some(pos) = done.iter().position(|task| task.id() == id) {
            done.remove(pos);
        }
    }

    /// Stop the worker thread, waiting for any in-flight `process` to
    /// complete, then drop all pending and completed tasks without
    /// finishing them.
    ///
    /// The queue stays usable: the next enqueue starts a fresh worker.
    pub fn stop(&self) {
        let mut slot = lock(&self.inner.worker);
        self.inner.halt_worker(&mut slot);
        lock(&self.inner.pending).tasks.clear();
        lock(&self.inner.done).clear();
    }

    /// Whether the background worker thread is currently alive.
    pub fn worker_running(&self) -> bool {
        lock(&self.inner.worker).is_some()
    }

    fn wake_worker(&self) {
        let mut slot = lock(&self.inner.worker);
        if slot.is_none() {
            tracing::debug!("[tasks] starting worker thread");
            let inner = Arc::clone(&self.inner);
            *slot = Some(std::thread::spawn(move || worker_loop(&inner)));
        }
        drop(slot);
        self.inner.wake.notify_all();
        let _ = self.inner.events.send(QueueEvent::Enqueued);
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.stop();
        self.cancel.cancel();
    }
}

// ─── Worker thread ────────────────────────────────────────────────────────────

fn worker_loop(inner: &Inner) {
    loop {
        let task = {
            let mut pending = lock(&inner.pending);
            loop {
                if pending.quit {
                    return;
                }
                if let Some(front) = pending.tasks.front() {
                    break Arc::clone(front);
                }
                pending = inner.wake.wait(pending).unwrap_or_else(|poisoned| poisoned.into_inner());
            }
        };

        task.process();

        let mut first_done = false;
        {
            let mut pending = lock(&inner.pending);
            let still_front = pending.tasks.front().is_some_and(|front| Arc::ptr_eq(front, &task));
            if still_front {
                pending.tasks.pop_front();
                let mut done = lock(&inner.done);
                first_done = done.is_empty();
                done.push_back(task);
            }
            // Not the front any more: cancelled mid-flight, discard the result.
        }
        if first_done {
            let _ = inner.events.send(QueueEvent::Processed);
        }
    }
}

// ─── Owning-side finisher ─────────────────────────────────────────────────────

async fn finisher_loop(
    inner:        Arc<Inner>,
    mut events:   mpsc::UnboundedReceiver<QueueEvent>,
    stop_timeout: Option<Duration>,
    cancel:       CancellationToken,
) {
    let mut idle_deadline: Option<Instant> = None;
    loop {
        let idle = idle_deadline;
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    QueueEvent::Enqueued => idle_deadline = None,
                    QueueEvent::Processed => {
                        drain_finished(&inner);
                        if let Some(timeout) = stop_timeout {
                            if lock(&inner.pending).tasks.is_empty() {
                                idle_deadline = Some(Instant::now() + timeout);
                            }
                        }
                    }
                }
            }
            _ = async move {
                match idle {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None           => std::future::pending::<()>().await,
                }
            } => {
                idle_deadline = None;
                halt_if_idle(&inner);
            }
        }
    }
}

/// Drain the completed sequence strictly FIFO, finishing each task with no
/// lock held.
fn drain_finished(inner: &Inner) {
    loop {
        let task = lock(&inner.done).pop_front();
        let Some(task) = task else { break };
        task.finish();
    }
}

/// Idle teardown.  Re-checks emptiness under the locks: a task that arrived
/// after the timer fired wins, and the teardown is skipped.
fn halt_if_idle(inner: &Inner) {
    let mut slot = lock(&inner.worker);
    {
        let pending = lock(&inner.pending);
        if !pending.tasks.is_empty() || !lock(&inner.done).is_empty() {
            return;
        }
    }
    inner.halt_worker(&mut slot);
}
