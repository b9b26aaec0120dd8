//! Configuration models for pools, the timing wheel, and the shared runtime.

pub mod env;
pub mod pool;

pub use env::{env_int_var, env_key};
pub use pool::{ConfigError, PoolConfig, RuntimeConfig, WheelConfig, PARSING_SLOTS_PER_CORE};
