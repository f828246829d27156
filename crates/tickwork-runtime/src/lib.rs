/// Tick-driven scripting runtime
///
/// Hands work between background threads and the single simulation thread,
/// runs tick-based timers and exposes an interactive script debugger. The
/// [`ScriptRuntime`] ties every component together for a host loop.
pub mod bridge;
pub mod cache;
pub mod config;
pub mod context;
pub mod debugger;
pub mod error;
pub mod executor;
pub mod interner;
pub mod pool;
pub mod runtime;
pub mod timer;

pub use bridge::{CrossThreadBridge, Task, DEFAULT_CALL_TIMEOUT};
pub use cache::{content_hash, ScriptCache};
pub use config::RuntimeConfig;
pub use context::{ExecutionContext, ScopeContext};
pub use debugger::{
    Breakpoint, DebugListener, DebugState, Debugger, ExpressionEvaluator, ListenerId,
    ScopeEvaluator, WatchExpression,
};
pub use error::{BridgeError, ConfigError, DebugError, EvalError, ExecutorError};
pub use executor::{AsyncWorkExecutor, BackgroundHandle, ScheduledHandle};
pub use interner::StringInterner;
pub use pool::{ObjectPool, Reusable};
pub use runtime::ScriptRuntime;
pub use timer::{TickScheduler, TimerId, TimerTask};

pub use tickwork_events::{
    DebugEvent, PauseReason, SourceLocation, StackFrame, StepMode, Value,
};
