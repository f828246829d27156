//! Runtime errors

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the cross-thread bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("task did not complete within {0:?}")]
    Timeout(Duration),

    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("bridge has been shut down")]
    Shutdown,

    #[error("drain_queued must be called from the simulation thread")]
    NotSimulationThread,

    #[error("drain_queued re-entered while already draining")]
    ReentrantDrain,
}

/// Errors surfaced by the background worker pool
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("executor has been shut down")]
    Shutdown,

    #[error("failed to start worker pool: {0}")]
    Start(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Join(String),
}

/// Errors surfaced by the debug-control API
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DebugError {
    #[error("debugger is not paused")]
    NotPaused,

    #[error("the current pause was already resumed")]
    AlreadyResumed,

    #[error("watch not found: {0}")]
    UnknownWatch(u64),
}

/// Errors produced while evaluating a breakpoint condition or watch expression
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),

    #[error("cannot apply '{op}' to {lhs} and {rhs}")]
    TypeMismatch {
        op: String,
        lhs: &'static str,
        rhs: &'static str,
    },

    #[error("integer overflow in '{0}'")]
    Overflow(&'static str),
}

/// Errors loading a runtime configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("could not determine the platform config directory")]
    NoConfigDir,
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
pub type DebugResult<T> = std::result::Result<T, DebugError>;
