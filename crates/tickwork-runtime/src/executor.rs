//! Background work executor
//!
//! A bounded worker pool for work that must stay off the simulation thread
//! (file and network I/O, compiled units, long computations). Anything that
//! needs to touch host state afterwards hands a continuation to the
//! [`CrossThreadBridge`].

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::bridge::{panic_message, CrossThreadBridge};
use crate::config::ExecutorConfig;
use crate::error::ExecutorError;

#[derive(Debug, Default)]
struct ExecutorStats {
    active: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Decrements the active count when a background job ends, even by panic
struct ActiveGuard(Arc<ExecutorStats>);

impl ActiveGuard {
    fn start(stats: &Arc<ExecutorStats>) -> Self {
        stats.active.fetch_add(1, Ordering::AcqRel);
        Self(stats.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::AcqRel);
        self.0.completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Result handle for a job started with [`AsyncWorkExecutor::execute_async`]
pub struct BackgroundHandle<T> {
    inner: JoinHandle<T>,
    handle: Handle,
}

impl<T> BackgroundHandle<T> {
    /// Block the calling thread until the job finishes
    ///
    /// Must not be called from inside an async task.
    pub fn wait(self) -> Result<T, ExecutorError> {
        let BackgroundHandle { inner, handle } = self;
        handle
            .block_on(inner)
            .map_err(|e| ExecutorError::Join(e.to_string()))
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Get the underlying join handle, for awaiting from async code
    pub fn into_join_handle(self) -> JoinHandle<T> {
        self.inner
    }
}

/// Handle to delayed or repeating background work
#[derive(Debug)]
pub struct ScheduledHandle {
    inner: JoinHandle<()>,
}

impl ScheduledHandle {
    /// Stop the job. A run that already started is not interrupted.
    pub fn cancel(&self) {
        self.inner.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

/// Bounded worker pool plus a timer-driven scheduler for background work
pub struct AsyncWorkExecutor {
    runtime: Mutex<Option<Runtime>>,
    stats: Arc<ExecutorStats>,
    shutdown_grace: Duration,
}

impl AsyncWorkExecutor {
    pub fn new(config: &ExecutorConfig) -> Result<Self, ExecutorError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .max_blocking_threads(config.max_blocking_threads.max(1))
            .thread_name("tickwork-worker")
            .enable_time()
            .build()?;

        debug!(
            target: "executor",
            "Worker pool started with {} worker(s), {} blocking thread(s) max",
            config.worker_threads.max(1),
            config.max_blocking_threads.max(1)
        );

        Ok(Self {
            runtime: Mutex::new(Some(runtime)),
            stats: Arc::new(ExecutorStats::default()),
            shutdown_grace: config.shutdown_grace(),
        })
    }

    /// Jobs currently running or waiting for a worker
    pub fn active_count(&self) -> usize {
        self.stats.active.load(Ordering::Acquire)
    }

    /// Jobs that have finished, successfully or not
    pub fn completed_count(&self) -> u64 {
        self.stats.completed.load(Ordering::Relaxed)
    }

    /// Jobs that panicked
    pub fn failed_count(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    pub fn is_shutdown(&self) -> bool {
        self.runtime.lock().is_none()
    }

    /// Run `task` on the worker pool
    pub fn execute_async<T, F>(&self, task: F) -> Result<BackgroundHandle<T>, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.handle()?;
        let guard = ActiveGuard::start(&self.stats);
        let stats = self.stats.clone();
        let inner = handle.spawn_blocking(move || {
            let _guard = guard;
            match panic::catch_unwind(AssertUnwindSafe(task)) {
                Ok(value) => value,
                Err(payload) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    error!(
                        target: "executor",
                        "Background task panicked: {}",
                        panic_message(payload.as_ref())
                    );
                    panic::resume_unwind(payload)
                }
            }
        });
        Ok(BackgroundHandle { inner, handle })
    }

    /// Run `work` on the worker pool, then hand `continuation` its result on the simulation thread
    pub fn execute_async_then_main<T, W, C>(
        &self,
        bridge: Arc<CrossThreadBridge>,
        work: W,
        continuation: C,
    ) -> Result<(), ExecutorError>
    where
        T: Send + 'static,
        W: FnOnce() -> anyhow::Result<T> + Send + 'static,
        C: FnOnce(anyhow::Result<T>) + Send + 'static,
    {
        let stats = self.stats.clone();
        self.execute_async(move || {
            let result = match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(result) => result,
                Err(payload) => {
                    stats.failed.fetch_add(1, Ordering::Relaxed);
                    Err(anyhow::anyhow!(
                        "background task panicked: {}",
                        panic_message(payload.as_ref())
                    ))
                }
            };
            bridge.execute_on_main_thread(move || continuation(result));
        })?;
        Ok(())
    }

    /// Run `task` on the worker pool once `delay` of wall-clock time has passed
    pub fn schedule_async<F>(&self, task: F, delay: Duration) -> Result<ScheduledHandle, ExecutorError>
    where
        F: FnOnce() + Send + 'static,
    {
        let stats = self.stats.clone();
        self.spawn_scheduled(async move {
            tokio::time::sleep(delay).await;
            run_blocking(stats, task).await;
        })
    }

    /// Run `task` every `period` after `initial_delay`, until cancelled or shut down
    ///
    /// A run that panics is logged and does not stop later runs.
    pub fn schedule_async_repeating<F>(
        &self,
        task: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledHandle, ExecutorError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let stats = self.stats.clone();
        let task = Arc::new(task);
        let period = period.max(Duration::from_millis(1));
        self.spawn_scheduled(async move {
            let start = tokio::time::Instant::now() + initial_delay;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let task = task.clone();
                run_blocking(stats.clone(), move || task()).await;
            }
        })
    }

    /// Stop the pool, waiting up to the configured grace period for running jobs
    ///
    /// Jobs still running after the grace period are abandoned. Must not be
    /// called from inside an async task.
    pub fn shutdown(&self) {
        let Some(runtime) = self.runtime.lock().take() else {
            return;
        };

        let active = self.active_count();
        if active > 0 {
            debug!(target: "executor", "Waiting up to {:?} for {} job(s)", self.shutdown_grace, active);
        }

        runtime.shutdown_timeout(self.shutdown_grace);

        let remaining = self.active_count();
        if remaining > 0 {
            warn!(
                target: "executor",
                "Worker pool did not drain within {:?}, forced termination with {} job(s) still running",
                self.shutdown_grace,
                remaining
            );
        } else {
            info!(target: "executor", "Worker pool shut down");
        }
    }

    fn handle(&self) -> Result<Handle, ExecutorError> {
        self.runtime
            .lock()
            .as_ref()
            .map(|rt| rt.handle().clone())
            .ok_or(ExecutorError::Shutdown)
    }

    fn spawn_scheduled<Fut>(&self, future: Fut) -> Result<ScheduledHandle, ExecutorError>
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = self.handle()?;
        Ok(ScheduledHandle {
            inner: handle.spawn(future),
        })
    }
}

impl Drop for AsyncWorkExecutor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.get_mut().take() {
            runtime.shutdown_background();
        }
    }
}

async fn run_blocking<F>(stats: Arc<ExecutorStats>, task: F)
where
    F: FnOnce() + Send + 'static,
{
    let guard = ActiveGuard::start(&stats);
    let result = tokio::task::spawn_blocking(move || {
        let _guard = guard;
        panic::catch_unwind(AssertUnwindSafe(task))
    })
    .await;

    match result {
        Ok(Ok(())) => {}
        Ok(Err(payload)) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                target: "executor",
                "Scheduled background task panicked: {}",
                panic_message(payload.as_ref())
            );
        }
        Err(e) => {
            debug!(target: "executor", "Scheduled background task did not complete: {}", e);
        }
    }
}
