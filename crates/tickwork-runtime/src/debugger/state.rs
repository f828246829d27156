use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tickwork_events::{SourceLocation, StackFrame, StepMode, Value};

use super::breakpoint::Breakpoint;
use crate::context::ExecutionContext;
use crate::error::{DebugError, DebugResult};

/// Snapshot of the interpreter taken when execution paused
///
/// Variables and the call stack are copied out of the live context, so
/// inspection from another thread never touches interpreter state.
#[derive(Debug, Clone, Serialize)]
pub struct DebugState {
    pub script_id: String,
    pub location: SourceLocation,
    pub variables: BTreeMap<String, Value>,
    pub call_stack: Vec<StackFrame>,
    pub call_depth: usize,
    pub hit_breakpoint: Option<Breakpoint>,
    /// Step mode that caused the pause, `Continue` for breakpoints
    pub step_mode: StepMode,
    pub paused_at: DateTime<Utc>,
}

impl DebugState {
    pub(crate) fn capture(
        script_id: &str,
        location: SourceLocation,
        ctx: &dyn ExecutionContext,
        hit_breakpoint: Option<Breakpoint>,
        step_mode: StepMode,
    ) -> Self {
        Self {
            script_id: script_id.to_string(),
            location,
            variables: ctx.variables(),
            call_stack: ctx.call_stack(),
            call_depth: ctx.call_depth(),
            hit_breakpoint,
            step_mode,
            paused_at: Utc::now(),
        }
    }
}

impl ExecutionContext for DebugState {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.variables.get(name).cloned()
    }

    fn variables(&self) -> BTreeMap<String, Value> {
        self.variables.clone()
    }

    fn call_stack(&self) -> Vec<StackFrame> {
        self.call_stack.clone()
    }

    fn call_depth(&self) -> usize {
        self.call_depth
    }
}

#[derive(Debug, Default)]
struct PauseSlot {
    /// Mirrors debug mode; no pause may open while false
    enabled: bool,
    state: Option<Arc<DebugState>>,
    command: Option<StepMode>,
}

/// Why [`PauseGate::begin`] refused to open a pause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BeginRefused {
    Outstanding,
    Disabled,
}

/// Single-slot suspend/resume primitive
///
/// At most one pause is outstanding, and each pause is released exactly once.
#[derive(Debug, Default)]
pub(crate) struct PauseGate {
    slot: Mutex<PauseSlot>,
    resumed: Condvar,
}

impl PauseGate {
    /// Allow or forbid pausing
    ///
    /// Forbidding releases any outstanding pause with `Continue`; returns true
    /// if one was released.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        let mut slot = self.slot.lock();
        slot.enabled = enabled;
        if enabled || slot.state.is_none() || slot.command.is_some() {
            return false;
        }
        slot.command = Some(StepMode::Continue);
        self.resumed.notify_one();
        true
    }

    /// Open a pause; fails if pausing is disabled or one is already outstanding
    pub fn begin(&self, state: Arc<DebugState>) -> Result<(), BeginRefused> {
        let mut slot = self.slot.lock();
        if !slot.enabled {
            return Err(BeginRefused::Disabled);
        }
        if slot.state.is_some() {
            return Err(BeginRefused::Outstanding);
        }
        slot.state = Some(state);
        slot.command = None;
        Ok(())
    }

    /// Block until the pause is released, then close it
    pub fn wait(&self) -> StepMode {
        let mut slot = self.slot.lock();
        let command = loop {
            if let Some(command) = slot.command.take() {
                break command;
            }
            self.resumed.wait(&mut slot);
        };
        slot.state = None;
        command
    }

    /// Release the outstanding pause with `mode`
    ///
    /// `on_release` runs under the gate's lock, before the waiter wakes.
    pub fn release<F>(&self, mode: StepMode, on_release: F) -> DebugResult<()>
    where
        F: FnOnce(&DebugState),
    {
        let mut slot = self.slot.lock();
        let Some(state) = slot.state.clone() else {
            return Err(DebugError::NotPaused);
        };
        if slot.command.is_some() {
            return Err(DebugError::AlreadyResumed);
        }
        on_release(&state);
        slot.command = Some(mode);
        self.resumed.notify_one();
        Ok(())
    }

    pub fn current(&self) -> Option<Arc<DebugState>> {
        self.slot.lock().state.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.slot.lock().state.is_some()
    }
}
