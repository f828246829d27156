//! Interactive script debugger
//!
//! The interpreter calls [`Debugger::should_pause`] before every statement.
//! When a step condition or breakpoint matches, the calling thread (the
//! simulation thread) is suspended until a controller calls
//! [`resume`](Debugger::resume) or one of the step variants. The whole
//! simulation stalls for the duration of the pause.
//!
//! ```text
//! Running --(breakpoint hit | step condition met)--> Paused
//! Paused  --(resume | step_over | step_into | step_out)--> Running
//! ```

mod breakpoint;
mod eval;
mod state;
mod watch;

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tickwork_events::{
    DebugEvent, DebugEventBus, PauseReason, SourceLocation, StackFrame, StepMode, Value,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

pub use breakpoint::Breakpoint;
pub use eval::{ExpressionEvaluator, ScopeEvaluator};
pub use state::DebugState;
pub use watch::WatchExpression;

use crate::bridge::panic_message;
use crate::context::ExecutionContext;
use crate::error::{DebugError, DebugResult};
use breakpoint::BreakpointTable;
use state::{BeginRefused, PauseGate};

/// Receives debugger events synchronously on the thread that produced them
pub trait DebugListener: Send + Sync {
    fn on_event(&self, event: &DebugEvent);
}

impl<F> DebugListener for F
where
    F: Fn(&DebugEvent) + Send + Sync,
{
    fn on_event(&self, event: &DebugEvent) {
        self(event)
    }
}

/// Handle for removing a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Default)]
struct StepState {
    mode: StepMode,
    script_id: Option<String>,
    depth: usize,
}

pub struct Debugger {
    enabled: AtomicBool,
    breakpoints: RwLock<BreakpointTable>,
    watches: RwLock<Vec<WatchExpression>>,
    next_watch_id: AtomicU64,
    step: Mutex<StepState>,
    gate: PauseGate,
    evaluator: Box<dyn ExpressionEvaluator>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn DebugListener>)>>,
    next_listener_id: AtomicU64,
    bus: DebugEventBus,
}

impl Debugger {
    pub fn new() -> Self {
        Self::with_evaluator(Box::new(ScopeEvaluator))
    }

    /// Create a debugger that evaluates conditions and watches with `evaluator`
    pub fn with_evaluator(evaluator: Box<dyn ExpressionEvaluator>) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            breakpoints: RwLock::new(BreakpointTable::default()),
            watches: RwLock::new(Vec::new()),
            next_watch_id: AtomicU64::new(1),
            step: Mutex::new(StepState::default()),
            gate: PauseGate::default(),
            evaluator,
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            bus: DebugEventBus::default(),
        }
    }

    // ===== Debug Mode =====

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turn debug mode on or off
    ///
    /// Disabling releases any outstanding pause immediately.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::AcqRel);
        if was == enabled {
            return;
        }
        info!(target: "debugger", "Debug mode {}", if enabled { "enabled" } else { "disabled" });

        if !enabled {
            *self.step.lock() = StepState::default();
        }
        // The gate keeps its own copy under its lock, so a pause racing with
        // disable is either released here or refused in `begin`.
        if self.gate.set_enabled(enabled) {
            debug!(target: "debugger", "Released pause because debug mode was disabled");
        }
    }

    // ===== Interpreter Hook =====

    /// Decide whether to pause before the statement at `location`, and pause if so
    ///
    /// Returns true if execution was paused (and has since been resumed).
    pub fn should_pause(
        &self,
        script_id: &str,
        location: SourceLocation,
        ctx: &dyn ExecutionContext,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }

        let depth = ctx.call_depth();
        let step_mode = {
            let step = self.step.lock();
            // Depth is only comparable within the script that started the step
            let same_script = step.script_id.as_deref().map_or(true, |id| id == script_id);
            let met = match step.mode {
                StepMode::Continue => false,
                StepMode::StepInto => true,
                StepMode::StepOver => same_script && depth <= step.depth,
                StepMode::StepOut => same_script && depth < step.depth,
            };
            met.then_some(step.mode)
        };

        if let Some(mode) = step_mode {
            return self.pause(script_id, location, ctx, None, mode);
        }

        match self.match_breakpoint(script_id, location.line, ctx) {
            Some(hit) => self.pause(script_id, location, ctx, Some(hit), StepMode::Continue),
            None => false,
        }
    }

    fn match_breakpoint(
        &self,
        script_id: &str,
        line: u32,
        ctx: &dyn ExecutionContext,
    ) -> Option<Breakpoint> {
        let condition = {
            let breakpoints = self.breakpoints.read();
            let bp = breakpoints.get(script_id, line)?;
            if !bp.enabled {
                return None;
            }
            bp.condition.clone()
        };

        if let Some(condition) = condition {
            match self.evaluator.evaluate(&condition, ctx) {
                Ok(value) if value.is_truthy() => {}
                Ok(_) => return None,
                Err(e) => {
                    warn!(
                        target: "debugger",
                        "Breakpoint condition `{}` at {}:{} failed, skipping: {}",
                        condition,
                        script_id,
                        line,
                        e
                    );
                    return None;
                }
            }
        }

        let mut breakpoints = self.breakpoints.write();
        let bp = breakpoints.get_mut(script_id, line)?;
        bp.hit_count += 1;
        Some(bp.clone())
    }

    fn pause(
        &self,
        script_id: &str,
        location: SourceLocation,
        ctx: &dyn ExecutionContext,
        hit: Option<Breakpoint>,
        step_mode: StepMode,
    ) -> bool {
        self.step.lock().mode = StepMode::Continue;

        let reason = match &hit {
            Some(bp) => PauseReason::Breakpoint { line: bp.line },
            None => PauseReason::Step(step_mode),
        };
        let hit_event = hit.as_ref().map(|bp| DebugEvent::BreakpointHit {
            script_id: bp.script_id.clone(),
            line: bp.line,
            hit_count: bp.hit_count,
        });

        let state = Arc::new(DebugState::capture(script_id, location, ctx, hit, step_mode));
        let watch_events = self.evaluate_watches(ctx);

        match self.gate.begin(state) {
            Ok(()) => {}
            Err(BeginRefused::Disabled) => {
                debug!(target: "debugger", "Debug mode disabled before pausing at {}:{}", script_id, location);
                return false;
            }
            Err(BeginRefused::Outstanding) => {
                error!(target: "debugger", "Pause requested at {}:{} while another pause is outstanding", script_id, location);
                self.emit(DebugEvent::Error {
                    message: format!("nested pause at {}:{} ignored", script_id, location),
                });
                return false;
            }
        }

        info!(target: "debugger", "Paused at {}:{} ({:?})", script_id, location, reason);
        if let Some(event) = hit_event {
            self.emit(event);
        }
        for event in watch_events {
            self.emit(event);
        }
        self.emit(DebugEvent::Paused {
            script_id: script_id.to_string(),
            location,
            reason,
        });

        let mode = self.gate.wait();

        debug!(target: "debugger", "Resumed from {}:{} with {}", script_id, location, mode);
        match mode {
            StepMode::Continue => self.emit(DebugEvent::Resumed),
            mode => self.emit(DebugEvent::Stepping { mode }),
        }
        true
    }

    fn evaluate_watches(&self, ctx: &dyn ExecutionContext) -> Vec<DebugEvent> {
        let pending: Vec<(u64, String)> = self
            .watches
            .read()
            .iter()
            .filter(|w| w.enabled)
            .map(|w| (w.id, w.expression.clone()))
            .collect();

        let mut events = Vec::with_capacity(pending.len());
        for (id, expression) in pending {
            let result = self.evaluator.evaluate(&expression, ctx);
            let mut watches = self.watches.write();
            // The watch may have been removed while evaluating
            if let Some(watch) = watches.iter_mut().find(|w| w.id == id) {
                watch.record(result);
                events.push(watch_event(watch));
            }
        }
        events
    }

    // ===== Resume Control =====

    /// Continue running until the next breakpoint
    pub fn resume(&self) -> DebugResult<()> {
        self.release(StepMode::Continue)
    }

    /// Pause at the next statement at the same or a shallower call depth
    pub fn step_over(&self) -> DebugResult<()> {
        self.release(StepMode::StepOver)
    }

    /// Pause at the very next statement
    pub fn step_into(&self) -> DebugResult<()> {
        self.release(StepMode::StepInto)
    }

    /// Pause at the next statement after the current function returns
    pub fn step_out(&self) -> DebugResult<()> {
        self.release(StepMode::StepOut)
    }

    fn release(&self, mode: StepMode) -> DebugResult<()> {
        self.gate.release(mode, |state| {
            *self.step.lock() = StepState {
                mode,
                script_id: Some(state.script_id.clone()),
                depth: state.call_depth,
            };
        })
    }

    // ===== Inspection =====

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    /// Snapshot of the current pause, if any
    pub fn current_state(&self) -> Option<Arc<DebugState>> {
        self.gate.current()
    }

    /// Value of a variable in the paused scope; `None` when not paused or undefined
    pub fn inspect_variable(&self, name: &str) -> Option<Value> {
        self.gate.current()?.variables.get(name).cloned()
    }

    /// Every variable in the paused scope; empty when not paused
    pub fn inspect_all_variables(&self) -> BTreeMap<String, Value> {
        self.gate
            .current()
            .map(|state| state.variables.clone())
            .unwrap_or_default()
    }

    /// Call stack of the paused script, innermost last; empty when not paused
    pub fn get_call_stack(&self) -> Vec<StackFrame> {
        self.gate
            .current()
            .map(|state| state.call_stack.clone())
            .unwrap_or_default()
    }

    /// Script and depth captured by the most recent step command
    pub fn step_origin(&self) -> Option<(String, usize)> {
        let step = self.step.lock();
        step.script_id.clone().map(|id| (id, step.depth))
    }

    // ===== Breakpoints =====

    /// Add a breakpoint, replacing any existing one on the same line
    ///
    /// Returns true if the line had no breakpoint before.
    pub fn add_breakpoint(
        &self,
        script_id: impl Into<String>,
        line: u32,
        condition: Option<String>,
    ) -> bool {
        let bp = Breakpoint::new(script_id, line, condition);
        let event = DebugEvent::BreakpointAdded {
            script_id: bp.script_id.clone(),
            line,
            condition: bp.condition.clone(),
        };
        let added = self.breakpoints.write().insert(bp);
        self.emit(event);
        added
    }

    pub fn remove_breakpoint(&self, script_id: &str, line: u32) -> bool {
        let removed = self.breakpoints.write().remove(script_id, line);
        if removed.is_some() {
            self.emit(DebugEvent::BreakpointRemoved {
                script_id: script_id.to_string(),
                line,
            });
        }
        removed.is_some()
    }

    /// Remove the breakpoints of one script, or of every script when `None`
    pub fn clear_breakpoints(&self, script_id: Option<&str>) -> usize {
        let removed = {
            let mut breakpoints = self.breakpoints.write();
            match script_id {
                Some(id) => breakpoints.clear_script(id),
                None => breakpoints.clear(),
            }
        };
        for bp in &removed {
            self.emit(DebugEvent::BreakpointRemoved {
                script_id: bp.script_id.clone(),
                line: bp.line,
            });
        }
        removed.len()
    }

    pub fn set_breakpoint_enabled(&self, script_id: &str, line: u32, enabled: bool) -> bool {
        match self.breakpoints.write().get_mut(script_id, line) {
            Some(bp) => {
                bp.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn breakpoints(&self, script_id: &str) -> Vec<Breakpoint> {
        self.breakpoints.read().for_script(script_id)
    }

    pub fn all_breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints.read().all()
    }

    // ===== Watches =====

    /// Add a watch expression, evaluating it at once if currently paused
    pub fn add_watch(&self, expression: impl Into<String>) -> u64 {
        let id = self.next_watch_id.fetch_add(1, Ordering::Relaxed);
        let mut watch = WatchExpression::new(id, expression);

        let event = self.gate.current().map(|state| {
            watch.record(self.evaluator.evaluate(&watch.expression, state.as_ref()));
            watch_event(&watch)
        });

        self.watches.write().push(watch);
        if let Some(event) = event {
            self.emit(event);
        }
        id
    }

    pub fn remove_watch(&self, id: u64) -> DebugResult<()> {
        let mut watches = self.watches.write();
        let before = watches.len();
        watches.retain(|w| w.id != id);
        if watches.len() == before {
            return Err(DebugError::UnknownWatch(id));
        }
        Ok(())
    }

    pub fn set_watch_enabled(&self, id: u64, enabled: bool) -> DebugResult<()> {
        let mut watches = self.watches.write();
        let watch = watches
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or(DebugError::UnknownWatch(id))?;
        watch.enabled = enabled;
        Ok(())
    }

    pub fn watches(&self) -> Vec<WatchExpression> {
        self.watches.read().clone()
    }

    // ===== Events =====

    /// Register a synchronous listener
    pub fn add_listener<L>(&self, listener: L) -> ListenerId
    where
        L: DebugListener + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Subscribe to the async event stream
    pub fn subscribe(&self) -> broadcast::Receiver<DebugEvent> {
        self.bus.subscribe()
    }

    fn emit(&self, event: DebugEvent) {
        // Listeners may call back into the debugger, so never hold the lock while notifying
        let listeners: Vec<Arc<dyn DebugListener>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in listeners {
            if let Err(payload) =
                panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)))
            {
                error!(
                    target: "debugger",
                    "Debug listener panicked on {} event: {}",
                    event.kind(),
                    panic_message(payload.as_ref())
                );
            }
        }

        self.bus.publish(event);
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

fn watch_event(watch: &WatchExpression) -> DebugEvent {
    DebugEvent::WatchUpdated {
        watch_id: watch.id,
        expression: watch.expression.clone(),
        value: watch.last_value.clone(),
        error: watch.last_error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ScopeContext;

    /// Controller that resumes every pause as soon as it is announced
    fn auto_resume(debugger: &Arc<Debugger>, mode: StepMode) -> Arc<Mutex<Vec<DebugEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let log = events.clone();
        let weak = Arc::downgrade(debugger);
        debugger.add_listener(move |event: &DebugEvent| {
            log.lock().push(event.clone());
            if matches!(event, DebugEvent::Paused { .. }) {
                if let Some(debugger) = weak.upgrade() {
                    debugger.release(mode).unwrap();
                }
            }
        });
        events
    }

    fn paused_lines(events: &[DebugEvent]) -> Vec<u32> {
        events
            .iter()
            .filter_map(|e| match e {
                DebugEvent::Paused { location, .. } => Some(location.line),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_disabled_debugger_never_pauses() {
        let debugger = Debugger::new();
        debugger.add_breakpoint("a", 1, None);
        let ctx = ScopeContext::new();
        assert!(!debugger.should_pause("a", SourceLocation::line(1), &ctx));
    }

    #[test]
    fn test_conditional_breakpoint_truthiness() {
        let debugger = Arc::new(Debugger::new());
        debugger.set_enabled(true);
        let events = auto_resume(&debugger, StepMode::Continue);
        debugger.add_breakpoint("a", 3, Some("x".to_string()));

        let mut ctx = ScopeContext::new();
        ctx.set("x", 0i64);
        assert!(!debugger.should_pause("a", SourceLocation::line(3), &ctx));

        ctx.set("x", 1i64);
        assert!(debugger.should_pause("a", SourceLocation::line(3), &ctx));
        assert_eq!(paused_lines(&events.lock()), vec![3]);
        assert_eq!(debugger.breakpoints("a")[0].hit_count, 1);
    }

    #[test]
    fn test_failing_condition_skips_breakpoint() {
        let debugger = Debugger::new();
        debugger.set_enabled(true);
        debugger.add_breakpoint("a", 3, Some("undefined_thing > 2".to_string()));
        let ctx = ScopeContext::new();
        assert!(!debugger.should_pause("a", SourceLocation::line(3), &ctx));
        assert_eq!(debugger.breakpoints("a")[0].hit_count, 0);
    }

    #[test]
    fn test_disabled_breakpoint_is_skipped() {
        let debugger = Debugger::new();
        debugger.set_enabled(true);
        debugger.add_breakpoint("a", 2, None);
        assert!(debugger.set_breakpoint_enabled("a", 2, false));
        let ctx = ScopeContext::new();
        assert!(!debugger.should_pause("a", SourceLocation::line(2), &ctx));
    }

    #[test]
    fn test_step_over_skips_deeper_frames() {
        let debugger = Arc::new(Debugger::new());
        debugger.set_enabled(true);
        let events = auto_resume(&debugger, StepMode::StepOver);
        debugger.add_breakpoint("a", 1, None);

        let mut ctx = ScopeContext::new();
        ctx.push_frame("<main>", "a", SourceLocation::line(1));
        debugger.should_pause("a", SourceLocation::line(1), &ctx);

        ctx.push_frame("helper", "a", SourceLocation::line(10));
        assert!(!debugger.should_pause("a", SourceLocation::line(10), &ctx));
        ctx.pop_frame();

        assert!(debugger.should_pause("a", SourceLocation::line(2), &ctx));
        assert_eq!(paused_lines(&events.lock()), vec![1, 2]);
    }

    #[test]
    fn test_step_out_waits_for_shallower_frame() {
        let debugger = Arc::new(Debugger::new());
        debugger.set_enabled(true);
        let events = auto_resume(&debugger, StepMode::StepOut);
        debugger.add_breakpoint("a", 10, None);

        let mut ctx = ScopeContext::new();
        ctx.push_frame("<main>", "a", SourceLocation::line(1));
        ctx.push_frame("helper", "a", SourceLocation::line(10));
        assert!(debugger.should_pause("a", SourceLocation::line(10), &ctx));
        assert_eq!(debugger.step_origin(), Some(("a".to_string(), 2)));

        assert!(!debugger.should_pause("a", SourceLocation::line(11), &ctx));
        ctx.pop_frame();
        assert!(debugger.should_pause("a", SourceLocation::line(2), &ctx));
        assert_eq!(paused_lines(&events.lock()), vec![10, 2]);
    }

    #[test]
    fn test_step_over_stays_in_stepping_script() {
        let debugger = Arc::new(Debugger::new());
        debugger.set_enabled(true);
        let events = auto_resume(&debugger, StepMode::StepOver);
        debugger.add_breakpoint("a", 1, None);

        let mut ctx = ScopeContext::new();
        ctx.push_frame("<main>", "a", SourceLocation::line(1));
        assert!(debugger.should_pause("a", SourceLocation::line(1), &ctx));

        let mut other = ScopeContext::new();
        other.push_frame("<main>", "b", SourceLocation::line(1));
        assert!(!debugger.should_pause("b", SourceLocation::line(1), &other));

        assert!(debugger.should_pause("a", SourceLocation::line(2), &ctx));
        assert_eq!(paused_lines(&events.lock()), vec![1, 2]);
    }

    /// Evaluator that turns debug mode off from another thread mid-evaluation
    struct DisablingEvaluator(Arc<Mutex<std::sync::Weak<Debugger>>>);

    impl ExpressionEvaluator for DisablingEvaluator {
        fn evaluate(
            &self,
            expression: &str,
            ctx: &dyn ExecutionContext,
        ) -> Result<Value, crate::error::EvalError> {
            if let Some(debugger) = self.0.lock().upgrade() {
                std::thread::spawn(move || debugger.set_enabled(false))
                    .join()
                    .unwrap();
            }
            ScopeEvaluator.evaluate(expression, ctx)
        }
    }

    #[test]
    fn test_disable_during_watch_evaluation_does_not_pause() {
        let target = Arc::new(Mutex::new(std::sync::Weak::new()));
        let debugger = Arc::new(Debugger::with_evaluator(Box::new(DisablingEvaluator(
            target.clone(),
        ))));
        *target.lock() = Arc::downgrade(&debugger);

        debugger.set_enabled(true);
        debugger.add_breakpoint("a", 1, None);
        debugger.add_watch("1");

        let ctx = ScopeContext::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let worker = {
            let debugger = debugger.clone();
            std::thread::spawn(move || {
                let paused = debugger.should_pause("a", SourceLocation::line(1), &ctx);
                tx.send(paused).unwrap();
            })
        };

        let paused = rx
            .recv_timeout(std::time::Duration::from_secs(2))
            .expect("should_pause blocked after debug mode was disabled");
        worker.join().unwrap();
        assert!(!paused);
        assert!(!debugger.is_enabled());
        assert!(!debugger.is_paused());
    }

    #[test]
    fn test_watches_capture_values_and_errors() {
        let debugger = Arc::new(Debugger::new());
        debugger.set_enabled(true);
        let events = auto_resume(&debugger, StepMode::Continue);
        let hp = debugger.add_watch("hp * 2");
        let ok = debugger.add_watch("hp");
        debugger.add_breakpoint("a", 1, None);

        let mut ctx = ScopeContext::new();
        ctx.set("hp", 9i64);
        assert!(debugger.should_pause("a", SourceLocation::line(1), &ctx));

        let watches = debugger.watches();
        let failed = watches.iter().find(|w| w.id == hp).unwrap();
        assert!(failed.last_error.is_some());
        let good = watches.iter().find(|w| w.id == ok).unwrap();
        assert_eq!(good.last_value, Some(Value::Int(9)));

        let updates = events
            .lock()
            .iter()
            .filter(|e| matches!(e, DebugEvent::WatchUpdated { .. }))
            .count();
        assert_eq!(updates, 2);
    }

    #[test]
    fn test_control_calls_outside_pause() {
        let debugger = Debugger::new();
        assert_eq!(debugger.resume(), Err(DebugError::NotPaused));
        assert_eq!(debugger.step_into(), Err(DebugError::NotPaused));
        assert!(debugger.inspect_all_variables().is_empty());
        assert!(debugger.get_call_stack().is_empty());
        assert_eq!(debugger.inspect_variable("x"), None);
        assert_eq!(debugger.remove_watch(99), Err(DebugError::UnknownWatch(99)));
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let debugger = Debugger::new();
        let seen = Arc::new(AtomicU64::new(0));
        debugger.add_listener(|_: &DebugEvent| panic!("listener failure"));
        let counter = seen.clone();
        debugger.add_listener(move |_: &DebugEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        debugger.add_breakpoint("a", 1, None);
        debugger.remove_breakpoint("a", 1);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_remove_listener() {
        let debugger = Debugger::new();
        let id = debugger.add_listener(|_: &DebugEvent| {});
        assert!(debugger.remove_listener(id));
        assert!(!debugger.remove_listener(id));
    }
}
