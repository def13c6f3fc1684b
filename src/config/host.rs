//! Monitored-host configuration.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use super::validation::ConfigError;

// =============================================================================
// Constants
// =============================================================================

/// Default bound on one job's total execution time.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(120);

/// Default bounded wait for the per-connector serialization guard.
pub const DEFAULT_GUARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on sources running concurrently within one dependency wave.
pub const DEFAULT_MAX_CONCURRENT_SOURCES: usize = 8;

fn default_job_timeout() -> Duration {
    DEFAULT_JOB_TIMEOUT
}

fn default_guard_timeout() -> Duration {
    DEFAULT_GUARD_TIMEOUT
}

fn default_max_concurrent_sources() -> usize {
    DEFAULT_MAX_CONCURRENT_SOURCES
}

// =============================================================================
// Device kind
// =============================================================================

/// Kind of device the host is, matched by device-type detection criteria.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DeviceKind {
    Linux,
    Windows,
    Aix,
    Hpux,
    Solaris,
    Network,
    Storage,
    /// Out-of-band management controller.
    Oob,
    #[default]
    Other,
}

// =============================================================================
// Host configuration
// =============================================================================

/// One monitored host: identity, execution limits and monitor filters.
///
/// Per-protocol credentials live in the engine configuration's raw protocol
/// sections; extensions turn those into typed configurations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Hostname or address the protocols target.
    pub hostname: String,

    /// Device kind, matched by device-type criteria (default: other).
    #[serde(default)]
    pub device_kind: DeviceKind,

    /// Force single-threaded source execution for this host.
    #[serde(default)]
    pub sequential: bool,

    /// Bound on one job's total execution time (default: 2m).
    #[serde(default = "default_job_timeout", with = "humantime_serde")]
    pub job_timeout: Duration,

    /// Bounded wait for the per-connector serialization guard (default: 30s).
    #[serde(default = "default_guard_timeout", with = "humantime_serde")]
    pub guard_timeout: Duration,

    /// Cap on sources running concurrently within one wave (default: 8).
    #[serde(default = "default_max_concurrent_sources")]
    pub max_concurrent_sources: usize,

    /// When present, only these monitor types are processed.
    #[serde(default)]
    pub included_monitors: Option<BTreeSet<String>>,

    /// Monitor types to skip.
    #[serde(default)]
    pub excluded_monitors: BTreeSet<String>,

    /// Record per-job duration metrics on the host monitor.
    #[serde(default)]
    pub self_monitoring: bool,
}

impl HostConfig {
    /// Create a configuration with defaults for everything but the hostname.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            device_kind: DeviceKind::default(),
            sequential: false,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            guard_timeout: DEFAULT_GUARD_TIMEOUT,
            max_concurrent_sources: DEFAULT_MAX_CONCURRENT_SOURCES,
            included_monitors: None,
            excluded_monitors: BTreeSet::new(),
            self_monitoring: false,
        }
    }

    /// Set the device kind.
    pub fn with_device_kind(mut self, kind: DeviceKind) -> Self {
        self.device_kind = kind;
        self
    }

    /// Force single-threaded execution.
    pub fn with_sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    /// Set the job timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    /// Set the guard timeout.
    pub fn with_guard_timeout(mut self, timeout: Duration) -> Self {
        self.guard_timeout = timeout;
        self
    }

    /// Enable per-job duration metrics.
    pub fn with_self_monitoring(mut self, enabled: bool) -> Self {
        self.self_monitoring = enabled;
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hostname.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "host hostname cannot be empty".to_string(),
            ));
        }
        if self.max_concurrent_sources == 0 {
            return Err(ConfigError::ValidationError(
                "host max_concurrent_sources must be positive".to_string(),
            ));
        }
        if self.job_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "host job_timeout must be positive".to_string(),
            ));
        }
        if self.guard_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "host guard_timeout must be positive".to_string(),
            ));
        }
        if let Some(included) = &self.included_monitors {
            if let Some(both) = included.intersection(&self.excluded_monitors).next() {
                return Err(ConfigError::ValidationError(format!(
                    "monitor type '{both}' is both included and excluded"
                )));
            }
        }
        Ok(())
    }

    /// Monitor-type filter: included set (when present) wins over exclusions.
    pub fn is_monitor_included(&self, monitor_type: &str) -> bool {
        if let Some(included) = &self.included_monitors {
            return included.contains(monitor_type);
        }
        !self.excluded_monitors.contains(monitor_type)
    }
}
