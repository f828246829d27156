/// Core value and event types for tickwork
///
/// This crate provides the types shared between the runtime and anything that
/// observes it (an editor, a console, a log sink), so observers never need to
/// depend on the runtime itself.
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod bus;
pub mod value;

pub use bus::{DebugEventBus, DEFAULT_EVENT_CAPACITY};
pub use value::Value;

// ============================================================================
// Source Positions
// ============================================================================

/// Position of a statement inside a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    /// 1-based line number
    pub line: u32,
    /// 1-based column number (0 when unknown)
    pub column: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    /// Location for interpreters that only track lines
    pub fn line(line: u32) -> Self {
        Self { line, column: 0 }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.column == 0 {
            write!(f, "{}", self.line)
        } else {
            write!(f, "{}:{}", self.line, self.column)
        }
    }
}

/// One entry of a script call stack, innermost frame last
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    /// Function (or `<main>` for top-level code) owning this frame
    pub function: String,
    /// Script the frame belongs to
    pub script_id: String,
    /// Statement currently executing in this frame
    pub location: SourceLocation,
}

impl StackFrame {
    pub fn new(
        function: impl Into<String>,
        script_id: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        Self {
            function: function.into(),
            script_id: script_id.into(),
            location,
        }
    }
}

// ============================================================================
// Debug Events
// ============================================================================

/// How execution proceeds after a pause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepMode {
    /// Run until the next breakpoint
    #[default]
    Continue,
    /// Pause at the next statement at the same or a shallower call depth
    StepOver,
    /// Pause at the very next statement
    StepInto,
    /// Pause at the next statement in a caller frame
    StepOut,
}

impl fmt::Display for StepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepMode::Continue => write!(f, "Continue"),
            StepMode::StepOver => write!(f, "Step Over"),
            StepMode::StepInto => write!(f, "Step Into"),
            StepMode::StepOut => write!(f, "Step Out"),
        }
    }
}

/// Why the debugger suspended execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    Breakpoint { line: u32 },
    Step(StepMode),
}

/// Events emitted by the debugger to its listeners and subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DebugEvent {
    Paused {
        script_id: String,
        location: SourceLocation,
        reason: PauseReason,
    },
    Resumed,
    Stepping {
        mode: StepMode,
    },
    BreakpointAdded {
        script_id: String,
        line: u32,
        condition: Option<String>,
    },
    BreakpointRemoved {
        script_id: String,
        line: u32,
    },
    BreakpointHit {
        script_id: String,
        line: u32,
        hit_count: u64,
    },
    WatchUpdated {
        watch_id: u64,
        expression: String,
        value: Option<Value>,
        error: Option<String>,
    },
    Error {
        message: String,
    },
}

impl DebugEvent {
    /// Short name of the event kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            DebugEvent::Paused { .. } => "paused",
            DebugEvent::Resumed => "resumed",
            DebugEvent::Stepping { .. } => "stepping",
            DebugEvent::BreakpointAdded { .. } => "breakpoint_added",
            DebugEvent::BreakpointRemoved { .. } => "breakpoint_removed",
            DebugEvent::BreakpointHit { .. } => "breakpoint_hit",
            DebugEvent::WatchUpdated { .. } => "watch_updated",
            DebugEvent::Error { .. } => "error",
        }
    }
}
