//! Runtime Configuration
//!
//! Configuration for the executor, the interpreter, and teardown. Values
//! can be set programmatically through the builder or loaded from
//! environment variables.
//!
//! # Environment Variables
//!
//! All environment variables use the `ICHOR_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `ICHOR_NUM_WORKERS` | Executor worker threads | CPU count |
//! | `ICHOR_OPS_BUDGET` | Effect nodes interpreted per fiber turn | 10000 |
//! | `ICHOR_GRACEFUL_SHUTDOWN_MS` | Teardown drain timeout in milliseconds | 5000 |
//! | `ICHOR_LOG_LEVEL` | Log level (off/error/warn/info/debug/trace) | info |
//! | `ICHOR_LOG_FORMAT` | Log format (plain/json) | plain |
//!
//! # Example
//!
//! ```rust,ignore
//! use ichor::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::builder()
//!     .executor_workers(4)
//!     .ops_budget(2048)
//!     .build()?;
//! ichor::config::init(config);
//! ```

use std::env;
use std::sync::OnceLock;
use std::time::Duration;

use thiserror::Error;

use crate::log::{self, LogFormat, LogLevel};

/// Default effect nodes interpreted per fiber turn before yielding.
pub const DEFAULT_OPS_BUDGET: usize = 10_000;

/// Invalid configuration value.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("invalid configuration for '{field}': {message}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// What was wrong with it.
        message: String,
    },
}

/// Complete runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Executor worker threads. Default: available parallelism.
    pub executor_workers: usize,

    /// Effect nodes interpreted per fiber turn before the remainder is
    /// resubmitted to the executor. Default: 10000.
    pub ops_budget: usize,

    /// How long the signal-aware entry point waits for tracked fibers to
    /// acknowledge interruption at teardown. Default: 5 seconds.
    pub graceful_shutdown: Duration,

    /// Log level. Default: info.
    pub log_level: LogLevel,

    /// Log format. Default: plain.
    pub log_format: LogFormat,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            executor_workers: num_cpus(),
            ops_budget: DEFAULT_OPS_BUDGET,
            graceful_shutdown: Duration::from_secs(5),
            log_level: LogLevel::Info,
            log_format: LogFormat::Plain,
        }
    }
}

impl RuntimeConfig {
    /// A builder starting from defaults.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Load configuration from `ICHOR_*` environment variables.
    ///
    /// Unset variables keep their defaults; unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = parse_env_usize("ICHOR_NUM_WORKERS") {
            if val > 0 {
                config.executor_workers = val;
            }
        }
        if let Some(val) = parse_env_usize("ICHOR_OPS_BUDGET") {
            if val > 0 {
                config.ops_budget = val;
            }
        }
        if let Some(val) = parse_env_usize("ICHOR_GRACEFUL_SHUTDOWN_MS") {
            config.graceful_shutdown = Duration::from_millis(val as u64);
        }
        if let Ok(val) = env::var("ICHOR_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&val) {
                config.log_level = level;
            }
        }
        if let Ok(val) = env::var("ICHOR_LOG_FORMAT") {
            if let Some(format) = LogFormat::parse(&val) {
                config.log_format = format;
            }
        }

        config
    }

    /// Check invariants the runtime relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.executor_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "executor_workers",
                message: "must be at least 1".into(),
            });
        }
        if self.ops_budget == 0 {
            return Err(ConfigError::InvalidValue {
                field: "ops_budget",
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Set the number of executor worker threads.
    pub fn executor_workers(mut self, n: usize) -> Self {
        self.config.executor_workers = n;
        self
    }

    /// Set the per-turn op budget.
    pub fn ops_budget(mut self, budget: usize) -> Self {
        self.config.ops_budget = budget;
        self
    }

    /// Set the teardown drain timeout.
    pub fn graceful_shutdown(mut self, timeout: Duration) -> Self {
        self.config.graceful_shutdown = timeout;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log_level = level;
        self
    }

    /// Set the log format.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log_format = format;
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

static GLOBAL: OnceLock<RuntimeConfig> = OnceLock::new();

/// Install the process-wide configuration and apply its log settings.
///
/// May be called at most once, before the runtime is first used; later
/// calls have no effect and return false.
pub fn init(config: RuntimeConfig) -> bool {
    let installed = GLOBAL.set(config).is_ok();
    if installed {
        let config = global();
        log::set_level(config.log_level);
        log::set_format(config.log_format);
    }
    installed
}

/// The process-wide configuration, loading from the environment on first
/// use if [`init`] was never called.
pub fn global() -> &'static RuntimeConfig {
    GLOBAL.get_or_init(RuntimeConfig::from_env)
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn parse_env_usize(var: &str) -> Option<usize> {
    env::var(var).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ops_budget, DEFAULT_OPS_BUDGET);
        assert!(config.executor_workers >= 1);
    }

    #[test]
    fn test_builder_rejects_zero_workers() {
        let err = RuntimeConfig::builder()
            .executor_workers(0)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("executor_workers"));
    }

    #[test]
    fn test_builder_rejects_zero_budget() {
        let err = RuntimeConfig::builder().ops_budget(0).build().unwrap_err();
        assert!(err.to_string().contains("ops_budget"));
    }

    #[test]
    fn test_builder_sets_fields() {
        let config = RuntimeConfig::builder()
            .executor_workers(3)
            .ops_budget(128)
            .graceful_shutdown(Duration::from_millis(250))
            .log_level(LogLevel::Debug)
            .build()
            .unwrap();
        assert_eq!(config.executor_workers, 3);
        assert_eq!(config.ops_budget, 128);
        assert_eq!(config.graceful_shutdown, Duration::from_millis(250));
        assert_eq!(config.log_level, LogLevel::Debug);
    }
}
