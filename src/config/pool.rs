//! Pool, wheel, and runtime configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::env::env_int_var;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration document could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Parsing slots per core. Parsing units block on I/O often enough that the
/// pool runs well above the core count.
pub const PARSING_SLOTS_PER_CORE: usize = 4;

/// Sizing for one worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum concurrently executing units (one worker thread each).
    pub capacity: usize,
    /// Maximum units waiting for a slot before submissions are rejected.
    pub queue_limit: usize,
    /// Stack size for worker threads; platform default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_stack_size: Option<usize>,
}

impl PoolConfig {
    /// Create a configuration with the given slot count and queue limit.
    #[must_use]
    pub const fn new(capacity: usize, queue_limit: usize) -> Self {
        Self {
            capacity,
            queue_limit,
            thread_stack_size: None,
        }
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Defaults for the CPU-bound parsing pool: [`PARSING_SLOTS_PER_CORE`]
    /// slots per core and a deep queue of one hundred units per core.
    #[must_use]
    pub fn parsing_default() -> Self {
        let cpus = num_cpus::get();
        Self::new(PARSING_SLOTS_PER_CORE * cpus, 100 * cpus)
    }

    /// Defaults for the CPU/network-balanced writing pool: one slot and one
    /// queue position per core.
    #[must_use]
    pub fn writing_default() -> Self {
        let cpus = num_cpus::get();
        Self::new(cpus, cpus)
    }

    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first offending value.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("capacity must be greater than 0".into());
        }
        if self.thread_stack_size == Some(0) {
            return Err("thread_stack_size must be greater than 0".into());
        }
        Ok(())
    }
}

/// Timing wheel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelConfig {
    /// Duration of one tick in milliseconds.
    pub tick_interval_ms: u64,
    /// Number of buckets; rounded up to a power of two.
    pub buckets: usize,
    /// Core threads that run due callbacks off the driver thread. More are
    /// spawned while all of them are busy.
    pub dispatch_threads: usize,
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            buckets: 512,
            dispatch_threads: num_cpus::get(),
        }
    }
}

impl WheelConfig {
    /// Tick interval as a `Duration`.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Validate wheel configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first offending value.
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_interval_ms == 0 {
            return Err("tick_interval_ms must be greater than 0".into());
        }
        if self.buckets == 0 {
            return Err("buckets must be greater than 0".into());
        }
        if self.dispatch_threads == 0 {
            return Err("dispatch_threads must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root configuration for the shared runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// The shared timing wheel.
    #[serde(default)]
    pub wheel: WheelConfig,
    /// The CPU-bound parsing pool.
    #[serde(default = "PoolConfig::parsing_default")]
    pub parsing: PoolConfig,
    /// The CPU/network-balanced writing pool.
    #[serde(default = "PoolConfig::writing_default")]
    pub writing: PoolConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            wheel: WheelConfig::default(),
            parsing: PoolConfig::parsing_default(),
            writing: PoolConfig::writing_default(),
        }
    }
}

impl RuntimeConfig {
    /// Validate the wheel and both pools.
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` naming the offending section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.wheel
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("wheel: {e}")))?;
        self.parsing
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("pool `parsing`: {e}")))?;
        self.writing
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("pool `writing`: {e}")))?;
        Ok(())
    }

    /// Parse runtime configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// `ConfigError::Parse` for malformed JSON, `ConfigError::Invalid` for bad values.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overlaid with the process environment (after loading `.env`).
    ///
    /// # Errors
    ///
    /// `ConfigError::Invalid` if the resulting values are out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env");
        }
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Overlay values from process environment variables.
    ///
    /// See [`RuntimeConfig::apply_overrides`] for the recognised keys.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Overlay values from `lookup`, which receives upper-case variable names.
    ///
    /// Recognised keys: `timer-tick-interval-ms`, `timer-buckets`,
    /// `timer-dispatch-threads`, `parsing-capacity`, `parsing-queue-limit`,
    /// `writing-capacity`, `writing-queue-limit` (looked up as e.g.
    /// `PARSING_CAPACITY`). Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        env_int_var(&lookup, &mut self.wheel.tick_interval_ms, "timer-tick-interval-ms");
        env_int_var(&lookup, &mut self.wheel.buckets, "timer-buckets");
        env_int_var(&lookup, &mut self.wheel.dispatch_threads, "timer-dispatch-threads");
        env_int_var(&lookup, &mut self.parsing.capacity, "parsing-capacity");
        env_int_var(&lookup, &mut self.parsing.queue_limit, "parsing-queue-limit");
        env_int_var(&lookup, &mut self.writing.capacity, "writing-capacity");
        env_int_var(&lookup, &mut self.writing.queue_limit, "writing-queue-limit");
    }
}
