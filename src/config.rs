//! Configuration Layer
//!
//! YAML-based configuration loading and validation for:
//! - The monitored host (identity, device kind, execution limits, filters)
//! - Engine cadence (collect interval, cycle count, connector directory)
//! - Raw per-protocol sections handed to extensions for typed building
//!
//! # Components
//!
//! - [`EngineConfig`]: top-level document, loaded with `${env::...}` expansion
//! - [`HostConfig`] / [`DeviceKind`]: the monitored host
//! - [`ConfigError`]: shared error type for load and validation failures

mod engine;
mod host;
mod validation;

pub use engine::{DEFAULT_COLLECT_INTERVAL, EngineConfig};
pub use host::{
    DEFAULT_GUARD_TIMEOUT, DEFAULT_JOB_TIMEOUT, DEFAULT_MAX_CONCURRENT_SOURCES, DeviceKind,
    HostConfig,
};
pub use validation::{ConfigError, expand_env_vars, load_yaml, parse_duration};
