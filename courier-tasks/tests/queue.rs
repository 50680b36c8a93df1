use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use courier_tasks::{Task, TaskId, TaskQueue, next_task_id};

// ── Test fixtures ─────────────────────────────────────────────────────────────

/// Re-usable latch: `process` blocks on it until the test opens it.
struct Gate(Mutex<bool>, Condvar);

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Gate(Mutex::new(false), Condvar::new()))
    }

    fn open(&self) {
        *self.0.lock().unwrap() = true;
        self.1.notify_all();
    }

    fn wait(&self) {
        let mut open = self.0.lock().unwrap();
        while !*open {
            open = self.1.wait(open).unwrap();
        }
    }
}

struct TestTask {
    id:             TaskId,
    label:          usize,
    gate:           Option<Arc<Gate>>,
    entered:        AtomicUsize,
    processed:      AtomicUsize,
    finished:       AtomicUsize,
    finished_order: Arc<Mutex<Vec<usize>>>,
}

impl TestTask {
    fn new(label: usize, finished_order: Arc<Mutex<Vec<usize>>>) -> Arc<Self> {
        Arc::new(Self {
            id: next_task_id(),
            label,
            gate: None,
            entered: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            finished_order,
        })
    }

    fn gated(label: usize, gate: Arc<Gate>, finished_order: Arc<Mutex<Vec<usize>>>) -> Arc<Self> {
        Arc::new(Self {
            id: next_task_id(),
            label,
            gate: Some(gate),
            entered: AtomicUsize::new(0),
            processed: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            finished_order,
        })
    }
}

impl Task for TestTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn process(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.wait();
        }
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
        self.finished_order.lock().unwrap().push(self.label);
    }
}

/// Poll `cond` until it holds, or panic after five seconds.
async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

// ── Ordering ──────────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn finishes_in_submission_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let queue = TaskQueue::new(None);

    let tasks: Vec<_> = (0..8).map(|label| TestTask::new(label, order.clone())).collect();
    for task in &tasks {
        queue.add_task(task.clone());
    }

    wait_until("all tasks finished", || order.lock().unwrap().len() == 8).await;
    assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
    for task in &tasks {
        assert_eq!(task.processed.load(Ordering::SeqCst), 1, "process must run exactly once");
        assert_eq!(task.finished.load(Ordering::SeqCst), 1, "finish must run exactly once");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn add_tasks_preserves_batch_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let queue = TaskQueue::new(None);

    let tasks: Vec<_> = (0..4).map(|label| TestTask::new(label, order.clone())).collect();
    queue.add_tasks(tasks.iter().map(|t| t.clone() as Arc<dyn Task>).collect());

    wait_until("batch finished", || order.lock().unwrap().len() == 4).await;
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

// ── Cancellation ──────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn cancel_before_processing_skips_both_phases() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let queue = TaskQueue::new(None);
    let gate = Gate::new();

    let blocker = TestTask::gated(0, gate.clone(), order.clone());
    let victim = TestTask::new(1, order.clone());
    queue.add_task(blocker.clone());
    queue.add_task(victim.clone());

    // The worker is inside `process` of the blocker; the victim is still pending.
    wait_until("worker entered blocker", || blocker.entered.load(Ordering::SeqCst) == 1).await;
    queue.cancel_task(victim.id());
    gate.open();

    wait_until("blocker finished", || blocker.finished.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(victim.entered.load(Ordering::SeqCst), 0, "cancelled task must never process");
    assert_eq!(victim.finished.load(Ordering::SeqCst), 0, "cancelled task must never finish");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_mid_flight_discards_the_result() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let queue = TaskQueue::new(None);
    let gate = Gate::new();

    let task = TestTask::gated(0, gate.clone(), order.clone());
    queue.add_task(task.clone());

    wait_until("worker entered task", || task.entered.load(Ordering::SeqCst) == 1).await;
    queue.cancel_task(task.id());
    gate.open();

    // Processing still completes, but the task is never finished.
    wait_until("process completed", || task.processed.load(Ordering::SeqCst) == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(task.finished.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_is_idempotent_and_ignores_unknown_ids() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let queue = TaskQueue::new(None);

    // Unknown id: silent no-op.
    queue.cancel_task(u64::MAX);

    let task = TestTask::new(0, order.clone());
    queue.add_task(task.clone());
    wait_until("task finished", || task.finished.load(Ordering::SeqCst) == 1).await;

    // Already finished: cancelling (twice) has no further effect.
    queue.cancel_task(task.id());
    queue.cancel_task(task.id());
    assert_eq!(task.finished.load(Ordering::SeqCst), 1);
}

// ── Stop / teardown ───────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn stop_abandons_queued_tasks_without_finishing() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let queue = Arc::new(TaskQueue::new(None));
    let gate = Gate::new();

    let in_flight = TestTask::gated(0, gate.clone(), order.clone());
    let abandoned = TestTask::new(1, order.clone());
    queue.add_task(in_flight.clone());
    queue.add_task(abandoned.clone());

    wait_until("worker entered task", || in_flight.entered.load(Ordering::SeqCst) == 1).await;

    // stop() blocks until the in-flight `process` returns, so release the
    // gate from a helper thread after it is underway.
    let stopper = {
        let queue = queue.clone();
        std::thread::spawn(move || queue.stop())
    };
    std::thread::sleep(Duration::from_millis(50));
    gate.open();
    stopper.join().unwrap();

    assert!(!queue.worker_running());
    assert_eq!(in_flight.processed.load(Ordering::SeqCst), 1);
    assert_eq!(abandoned.entered.load(Ordering::SeqCst), 0, "abandoned task must never process");
    assert_eq!(abandoned.finished.load(Ordering::SeqCst), 0, "abandoned task must never finish");

    // The queue stays usable after stop(): a new enqueue revives the worker.
    let revived = TestTask::new(2, order.clone());
    queue.add_task(revived.clone());
    wait_until("revived task finished", || revived.finished.load(Ordering::SeqCst) == 1).await;
    assert!(queue.worker_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn idle_timeout_tears_the_worker_down() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let queue = TaskQueue::new(Some(Duration::from_millis(150)));

    let task = TestTask::new(0, order.clone());
    queue.add_task(task.clone());
    wait_until("task finished", || task.finished.load(Ordering::SeqCst) == 1).await;
    assert!(queue.worker_running(), "worker stays warm inside the idle window");

    wait_until("idle teardown", || !queue.worker_running()).await;

    // A new task revives the worker transparently.
    let next = TestTask::new(1, order.clone());
    queue.add_task(next.clone());
    wait_until("next task finished", || next.finished.load(Ordering::SeqCst) == 1).await;
    assert!(queue.worker_running());
}

#[tokio::test(flavor = "multi_thread")]
async fn new_task_cancels_pending_idle_teardown() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let queue = TaskQueue::new(Some(Duration::from_millis(200)));

    let first = TestTask::new(0, order.clone());
    queue.add_task(first.clone());
    wait_until("first finished", || first.finished.load(Ordering::SeqCst) == 1).await;

    // Enqueue again inside the idle window; the teardown timer must re-arm
    // from the second task's completion, not fire from the first one's.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = TestTask::new(1, order.clone());
    queue.add_task(second.clone());
    wait_until("second finished", || second.finished.load(Ordering::SeqCst) == 1).await;

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(queue.worker_running(), "idle window restarts on new work");
}

#[tokio::test(flavor = "multi_thread")]
async fn no_timeout_keeps_the_worker_warm() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let queue = TaskQueue::new(None);

    let task = TestTask::new(0, order.clone());
    queue.add_task(task.clone());
    wait_until("task finished", || task.finished.load(Ordering::SeqCst) == 1).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(queue.worker_running());
}

// ── In-band failure encoding ──────────────────────────────────────────────────

/// The queue has no failure channel of its own; a task encodes failure in
/// its result and `finish` interprets it (here: a negative size sentinel).
struct ProbeFile {
    id:       TaskId,
    exists:   bool,
    size:     Mutex<Option<i64>>,
    reported: Arc<Mutex<Option<i64>>>,
}

impl Task for ProbeFile {
    fn id(&self) -> TaskId {
        self.id
    }

    fn process(&self) {
        *self.size.lock().unwrap() = Some(if self.exists { 4096 } else { -1 });
    }

    fn finish(&self) {
        *self.reported.lock().unwrap() = self.size.lock().unwrap().take();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn task_failure_is_encoded_in_band() {
    let queue = TaskQueue::new(None);
    let reported = Arc::new(Mutex::new(None));

    queue.add_task(Arc::new(ProbeFile {
        id: next_task_id(),
        exists: false,
        size: Mutex::new(None),
        reported: reported.clone(),
    }));

    wait_until("probe finished", || reported.lock().unwrap().is_some()).await;
    assert_eq!(*reported.lock().unwrap(), Some(-1));
}
