//! Cross-thread bridge
//!
//! The only path by which code running off the simulation thread may touch host
//! state. Work submitted from any thread is either run immediately (when the
//! caller already is the simulation thread) or queued until the next call to
//! [`CrossThreadBridge::drain_queued`].

use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, trace};

use crate::error::{BridgeError, BridgeResult};

/// A unit of work handed to the bridge
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Default timeout for [`CrossThreadBridge::call`]
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Task waiting in the delay queue.
/// Ordered by due step, then by submission order.
struct DelayedTask {
    due_step: i64,
    seq: u64,
    task: Task,
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.due_step == other.due_step && self.seq == other.seq
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.due_step
            .cmp(&other.due_step)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Hands work from arbitrary threads to the single simulation thread
pub struct CrossThreadBridge {
    simulation_thread: ThreadId,
    immediate_tx: UnboundedSender<Task>,
    immediate_rx: Mutex<UnboundedReceiver<Task>>,
    immediate_pending: AtomicUsize,
    delayed: Mutex<BinaryHeap<Reverse<DelayedTask>>>,
    next_seq: AtomicU64,
    current_step: AtomicI64,
    draining: AtomicBool,
    shutdown: AtomicBool,
    default_timeout: Duration,
}

/// Clears the draining flag even if the drain loop unwinds
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CrossThreadBridge {
    /// Create a bridge whose simulation thread is the calling thread
    pub fn new() -> Self {
        Self::with_simulation_thread(thread::current().id(), DEFAULT_CALL_TIMEOUT)
    }

    /// Create a bridge bound to a specific simulation thread
    pub fn with_simulation_thread(simulation_thread: ThreadId, default_timeout: Duration) -> Self {
        let (immediate_tx, immediate_rx) = mpsc::unbounded_channel();
        Self {
            simulation_thread,
            immediate_tx,
            immediate_rx: Mutex::new(immediate_rx),
            immediate_pending: AtomicUsize::new(0),
            delayed: Mutex::new(BinaryHeap::new()),
            next_seq: AtomicU64::new(0),
            current_step: AtomicI64::new(0),
            draining: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            default_timeout,
        }
    }

    /// Whether the calling thread is the simulation thread
    pub fn is_simulation_thread(&self) -> bool {
        thread::current().id() == self.simulation_thread
    }

    /// Number of completed drains, i.e. the bridge's own simulation step counter
    pub fn current_step(&self) -> i64 {
        self.current_step.load(Ordering::Acquire)
    }

    /// Tasks waiting in either queue; always 0 once shut down
    pub fn pending_count(&self) -> usize {
        if self.is_shutdown() {
            return 0;
        }
        self.immediate_pending.load(Ordering::Acquire) + self.delayed.lock().len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Run `task` now if on the simulation thread, otherwise queue it for the next step
    ///
    /// Never blocks and never propagates a failure from `task`.
    pub fn execute_now<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_simulation_thread() {
            run_guarded(Box::new(task), "immediate");
        } else {
            self.enqueue(Box::new(task));
        }
    }

    /// Alias of [`execute_now`](Self::execute_now) used by async continuations
    pub fn execute_on_main_thread<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute_now(task);
    }

    /// Queue `task` to run during the drain `delay_steps` steps from now
    ///
    /// A drain never runs work submitted after it started, so a delay of 0
    /// comes due on the next drain exactly like a delay of 1. Returns the step
    /// the task is due at.
    pub fn schedule_for_step<F>(&self, task: F, delay_steps: i64) -> i64
    where
        F: FnOnce() + Send + 'static,
    {
        let due_step = self.current_step() + delay_steps.max(0);
        if self.is_shutdown() {
            debug!(target: "bridge", due_step, "Dropping delayed task submitted after shutdown");
            return due_step;
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.delayed.lock().push(Reverse(DelayedTask {
            due_step,
            seq,
            task: Box::new(task),
        }));
        trace!(target: "bridge", due_step, seq, "Scheduled delayed task");
        due_step
    }

    /// Run every queued task, then every delayed task that has come due
    ///
    /// Must be called once per simulation step, from the simulation thread.
    /// Tasks queued while draining run on the next step. Returns the number of
    /// tasks executed.
    pub fn drain_queued(&self) -> BridgeResult<usize> {
        if !self.is_simulation_thread() {
            return Err(BridgeError::NotSimulationThread);
        }
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BridgeError::ReentrantDrain);
        }
        let _guard = DrainGuard(&self.draining);

        let step = self.current_step.fetch_add(1, Ordering::AcqRel) + 1;
        if self.is_shutdown() {
            return Ok(0);
        }

        let immediate = {
            let mut rx = self.immediate_rx.lock();
            let mut tasks = Vec::new();
            while let Ok(task) = rx.try_recv() {
                tasks.push(task);
            }
            tasks
        };
        self.release_pending(immediate.len());

        let due = {
            let mut delayed = self.delayed.lock();
            let mut tasks = Vec::new();
            while delayed
                .peek()
                .is_some_and(|Reverse(next)| next.due_step <= step)
            {
                if let Some(Reverse(next)) = delayed.pop() {
                    tasks.push(next.task);
                }
            }
            tasks
        };

        let count = immediate.len() + due.len();
        for task in immediate {
            run_guarded(task, "queued");
        }
        for task in due {
            run_guarded(task, "delayed");
        }

        if count > 0 {
            trace!(target: "bridge", step, count, "Drained bridge queues");
        }
        Ok(count)
    }

    /// Run `task` on the simulation thread and wait up to `timeout` for its result
    ///
    /// Called from the simulation thread, the task runs synchronously. From any
    /// other thread the caller blocks until the task has run during a drain, the
    /// timeout elapses, or the bridge shuts down.
    pub fn call_and_wait<T, F>(&self, task: F, timeout: Duration) -> BridgeResult<T>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_simulation_thread() {
            return invoke(task);
        }
        if self.is_shutdown() {
            return Err(BridgeError::Shutdown);
        }

        let (result_tx, result_rx) = std_mpsc::sync_channel(1);
        self.enqueue(Box::new(move || {
            // The waiter may have timed out already
            let _ = result_tx.send(invoke(task));
        }));

        match result_rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                debug!(target: "bridge", ?timeout, "call_and_wait timed out");
                Err(BridgeError::Timeout(timeout))
            }
            // The task was dropped without running
            Err(std_mpsc::RecvTimeoutError::Disconnected) => Err(BridgeError::Shutdown),
        }
    }

    /// [`call_and_wait`](Self::call_and_wait) with the bridge's default timeout
    pub fn call<T, F>(&self, task: F) -> BridgeResult<T>
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.call_and_wait(task, self.default_timeout)
    }

    /// Drop all queued work and fail any callers still waiting on a result
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        let dropped_immediate = {
            let mut rx = self.immediate_rx.lock();
            rx.close();
            let mut count = 0;
            while let Ok(task) = rx.try_recv() {
                drop(task);
                count += 1;
            }
            count
        };
        self.release_pending(dropped_immediate);

        let dropped_delayed = {
            let mut delayed = self.delayed.lock();
            let count = delayed.len();
            delayed.clear();
            count
        };

        info!(
            target: "bridge",
            "Bridge shut down, dropped {} queued and {} delayed task(s)",
            dropped_immediate,
            dropped_delayed
        );
    }

    fn enqueue(&self, task: Task) {
        self.immediate_pending.fetch_add(1, Ordering::AcqRel);
        if self.immediate_tx.send(task).is_err() {
            // Receiver closed by shutdown; dropping the task fails its waiter
            self.release_pending(1);
            debug!(target: "bridge", "Dropping task submitted after shutdown");
        }
    }

    fn release_pending(&self, count: usize) {
        let _ = self
            .immediate_pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(count))
            });
    }
}

impl Default for CrossThreadBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CrossThreadBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run a task, logging instead of propagating a panic
fn run_guarded(task: Task, queue: &str) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
        error!(
            target: "bridge",
            "Task from {} queue panicked: {}",
            queue,
            panic_message(payload.as_ref())
        );
    }
}

fn invoke<T, F>(task: F) -> BridgeResult<T>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(BridgeError::TaskFailed(format!("{:#}", e))),
        Err(payload) => Err(BridgeError::TaskFailed(panic_message(payload.as_ref()))),
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
