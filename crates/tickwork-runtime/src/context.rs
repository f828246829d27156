use std::collections::BTreeMap;

use tickwork_events::{SourceLocation, StackFrame, Value};

use crate::pool::Reusable;

/// The interpreter's view of a running script, as seen by the debugger
pub trait ExecutionContext {
    /// Resolve a variable in the current scope
    fn lookup(&self, name: &str) -> Option<Value>;

    /// Every variable visible in the current scope
    fn variables(&self) -> BTreeMap<String, Value>;

    /// Call stack, innermost frame last
    fn call_stack(&self) -> Vec<StackFrame>;

    fn call_depth(&self) -> usize {
        self.call_stack().len()
    }
}

#[derive(Debug, Clone)]
struct Frame {
    function: String,
    script_id: String,
    location: SourceLocation,
    locals: BTreeMap<String, Value>,
}

/// A simple frame-based execution context
///
/// Lookups see the innermost frame's locals first, then globals. Contexts are
/// pooled; [`Reusable::reset`] clears every frame and variable.
#[derive(Debug, Clone, Default)]
pub struct ScopeContext {
    globals: BTreeMap<String, Value>,
    frames: Vec<Frame>,
}

impl ScopeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_global(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.globals.insert(name.into(), value.into());
    }

    /// Set a variable in the innermost frame, or a global at top level
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.locals.insert(name.into(), value.into());
            }
            None => self.set_global(name, value),
        }
    }

    /// Update a variable where it is visible, otherwise set it like [`set`](Self::set)
    pub fn assign(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        if let Some(slot) = self
            .frames
            .last_mut()
            .and_then(|frame| frame.locals.get_mut(name))
        {
            *slot = value;
        } else if let Some(slot) = self.globals.get_mut(name) {
            *slot = value;
        } else {
            self.set(name, value);
        }
    }

    pub fn push_frame(
        &mut self,
        function: impl Into<String>,
        script_id: impl Into<String>,
        location: SourceLocation,
    ) {
        self.frames.push(Frame {
            function: function.into(),
            script_id: script_id.into(),
            location,
            locals: BTreeMap::new(),
        });
    }

    pub fn pop_frame(&mut self) -> bool {
        self.frames.pop().is_some()
    }

    /// Record the statement the innermost frame is about to execute
    pub fn set_location(&mut self, location: SourceLocation) {
        if let Some(frame) = self.frames.last_mut() {
            frame.location = location;
        }
    }
}

impl ExecutionContext for ScopeContext {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.frames
            .last()
            .and_then(|frame| frame.locals.get(name))
            .or_else(|| self.globals.get(name))
            .cloned()
    }

    fn variables(&self) -> BTreeMap<String, Value> {
        let mut vars = self.globals.clone();
        if let Some(frame) = self.frames.last() {
            vars.extend(frame.locals.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        vars
    }

    fn call_stack(&self) -> Vec<StackFrame> {
        self.frames
            .iter()
            .map(|f| StackFrame::new(f.function.clone(), f.script_id.clone(), f.location))
            .collect()
    }

    fn call_depth(&self) -> usize {
        self.frames.len()
    }
}

impl Reusable for ScopeContext {
    fn reset(&mut self) {
        self.globals.clear();
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locals_shadow_globals() {
        let mut ctx = ScopeContext::new();
        ctx.set("x", 1i64);
        ctx.push_frame("f", "a", SourceLocation::line(3));
        ctx.set("x", 2i64);

        assert_eq!(ctx.lookup("x"), Some(Value::Int(2)));
        assert_eq!(ctx.variables().get("x"), Some(&Value::Int(2)));
        assert_eq!(ctx.call_depth(), 1);

        ctx.pop_frame();
        assert_eq!(ctx.lookup("x"), Some(Value::Int(1)));
    }

    #[test]
    fn test_assign_updates_visible_variable() {
        let mut ctx = ScopeContext::new();
        ctx.set_global("hp", 1i64);
        ctx.push_frame("heal", "a", SourceLocation::line(2));

        ctx.assign("hp", 5i64);
        ctx.assign("bonus", 4i64);
        ctx.pop_frame();

        assert_eq!(ctx.lookup("hp"), Some(Value::Int(5)));
        assert_eq!(ctx.lookup("bonus"), None);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut ctx = ScopeContext::new();
        ctx.set_global("y", "hello");
        ctx.push_frame("main", "a", SourceLocation::line(1));
        ctx.reset();

        assert!(ctx.variables().is_empty());
        assert!(ctx.call_stack().is_empty());
    }
}
