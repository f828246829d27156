use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub interner: InternerConfig,

    #[serde(default)]
    pub debugger: DebuggerConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Async worker threads (default: 4)
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Upper bound on threads running blocking background work (default: 16)
    #[serde(default = "default_max_blocking_threads")]
    pub max_blocking_threads: usize,

    /// How long shutdown waits for in-flight work before forcing termination
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_worker_threads() -> usize {
    4
}

fn default_max_blocking_threads() -> usize {
    16
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            max_blocking_threads: default_max_blocking_threads(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl ExecutorConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Default timeout for `call_and_wait` (default: 5000ms)
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_call_timeout_ms() -> u64 {
    5000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl BridgeConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of parsed scripts kept (default: 256)
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

fn default_cache_entries() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum idle execution contexts kept for reuse (default: 64)
    #[serde(default = "default_max_pooled")]
    pub max_pooled: usize,
}

fn default_max_pooled() -> usize {
    64
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pooled: default_max_pooled(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternerConfig {
    /// Maximum number of distinct interned strings (default: 10000)
    #[serde(default = "default_interner_capacity")]
    pub capacity: usize,
}

fn default_interner_capacity() -> usize {
    10_000
}

impl Default for InternerConfig {
    fn default() -> Self {
        Self {
            capacity: default_interner_capacity(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebuggerConfig {
    /// Whether debug mode starts enabled
    #[serde(default)]
    pub enabled: bool,
}

impl RuntimeConfig {
    /// Default location of the config file (`<config dir>/tickwork/runtime.toml`)
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let dirs = ProjectDirs::from("", "", "tickwork").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("runtime.toml"))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        info!(target: "runtime", "Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(io_err)?;
        info!(target: "runtime", "Saved config to {}", path.display());
        Ok(())
    }
}
