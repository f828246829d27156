use std::sync::Arc;

use tracing::{debug, info};

use crate::bridge::CrossThreadBridge;
use crate::cache::ScriptCache;
use crate::config::RuntimeConfig;
use crate::context::ScopeContext;
use crate::debugger::Debugger;
use crate::error::{BridgeResult, ExecutorError};
use crate::executor::AsyncWorkExecutor;
use crate::interner::StringInterner;
use crate::pool::ObjectPool;
use crate::timer::TickScheduler;

/// Owns every scheduling and debugging component of one scripting host
///
/// The thread that constructs the runtime becomes the simulation thread.
/// Components are shared by `Arc` so collaborators can hold on to the ones
/// they need.
pub struct ScriptRuntime<A> {
    config: RuntimeConfig,
    bridge: Arc<CrossThreadBridge>,
    executor: Arc<AsyncWorkExecutor>,
    scheduler: Arc<TickScheduler>,
    debugger: Arc<Debugger>,
    cache: Arc<ScriptCache<A>>,
    interner: Arc<StringInterner>,
    contexts: Arc<ObjectPool<ScopeContext>>,
}

impl<A> ScriptRuntime<A> {
    pub fn new(config: RuntimeConfig) -> Result<Self, ExecutorError> {
        let bridge = Arc::new(CrossThreadBridge::with_simulation_thread(
            std::thread::current().id(),
            config.bridge.call_timeout(),
        ));
        let executor = Arc::new(AsyncWorkExecutor::new(&config.executor)?);
        let scheduler = Arc::new(TickScheduler::new(bridge.clone()));
        let debugger = Arc::new(Debugger::new());
        debugger.set_enabled(config.debugger.enabled);

        let runtime = Self {
            bridge,
            executor,
            scheduler,
            debugger,
            cache: Arc::new(ScriptCache::new(config.cache.max_entries)),
            interner: Arc::new(StringInterner::new(config.interner.capacity)),
            contexts: Arc::new(ObjectPool::new(config.pool.max_pooled, ScopeContext::new)),
            config,
        };
        info!(target: "runtime", "Script runtime initialized");
        Ok(runtime)
    }

    /// Run one simulation step: drain the bridge, advance timers, then run `scripts`
    ///
    /// Must be called from the simulation thread.
    pub fn step<F>(&self, scripts: F) -> BridgeResult<()>
    where
        F: FnOnce(),
    {
        let drained = self.bridge.drain_queued()?;
        let fired = self.scheduler.advance();
        if drained > 0 || fired > 0 {
            debug!(
                target: "runtime",
                step = self.bridge.current_step(),
                drained,
                fired,
                "Step housekeeping"
            );
        }
        scripts();
        Ok(())
    }

    /// Run `work` on the worker pool, then `continuation` with its result on the simulation thread
    pub fn execute_async_then_main<T, W, C>(
        &self,
        work: W,
        continuation: C,
    ) -> Result<(), ExecutorError>
    where
        T: Send + 'static,
        W: FnOnce() -> anyhow::Result<T> + Send + 'static,
        C: FnOnce(anyhow::Result<T>) + Send + 'static,
    {
        self.executor
            .execute_async_then_main(self.bridge.clone(), work, continuation)
    }

    /// Stop background work, drop queued tasks and release any debugger pause
    pub fn shutdown(&self) {
        info!(target: "runtime", "Shutting down script runtime");
        self.debugger.set_enabled(false);
        self.executor.shutdown();
        self.bridge.shutdown();
        let cancelled = self.scheduler.cancel_all();
        if cancelled > 0 {
            debug!(target: "runtime", "Cancelled {} pending timer(s)", cancelled);
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn bridge(&self) -> &Arc<CrossThreadBridge> {
        &self.bridge
    }

    pub fn executor(&self) -> &Arc<AsyncWorkExecutor> {
        &self.executor
    }

    pub fn scheduler(&self) -> &Arc<TickScheduler> {
        &self.scheduler
    }

    pub fn debugger(&self) -> &Arc<Debugger> {
        &self.debugger
    }

    pub fn cache(&self) -> &Arc<ScriptCache<A>> {
        &self.cache
    }

    pub fn interner(&self) -> &Arc<StringInterner> {
        &self.interner
    }

    pub fn contexts(&self) -> &Arc<ObjectPool<ScopeContext>> {
        &self.contexts
    }
}
