//! Engine configuration: host, cadence and raw protocol sections.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::host::HostConfig;
use super::validation::{ConfigError, load_yaml};

/// Default collect cadence (60 seconds).
pub const DEFAULT_COLLECT_INTERVAL: Duration = Duration::from_secs(60);

fn default_collect_interval() -> Duration {
    DEFAULT_COLLECT_INTERVAL
}

fn default_connector_dir() -> String {
    "connectors".to_string()
}

/// Top-level engine configuration.
///
/// The `protocols` sections stay raw YAML here: each section is handed to the
/// extension that claims its key, which builds and validates the typed
/// protocol configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The monitored host.
    pub host: HostConfig,

    /// Directory scanned for connector YAML documents.
    #[serde(default = "default_connector_dir")]
    pub connector_dir: String,

    /// Interval between collect cycles (default: 60s).
    #[serde(default = "default_collect_interval", with = "humantime_serde")]
    pub collect_interval: Duration,

    /// Run this many collect cycles then exit; absent means run until
    /// shutdown.
    #[serde(default)]
    pub cycles: Option<u64>,

    /// Raw per-protocol configuration sections, keyed by protocol identifier
    /// (`http`, `oscommand`, `snmp`, ...).
    #[serde(default)]
    pub protocols: BTreeMap<String, serde_yaml::Value>,
}

impl EngineConfig {
    /// Load configuration from a YAML file.
    ///
    /// `${env::VAR}` tokens are expanded before parsing so credentials can
    /// stay out of the file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: Self = load_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.host.validate()?;

        if self.collect_interval < Duration::from_secs(1) {
            return Err(ConfigError::ValidationError(
                "collect_interval must be at least 1s".to_string(),
            ));
        }
        if self.connector_dir.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "connector_dir cannot be empty".to_string(),
            ));
        }
        for key in self.protocols.keys() {
            if key.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "protocol section key cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_engine_config_from_yaml() {
        let yaml = r#"
host:
  hostname: server-01
  device_kind: linux
collect_interval: 30s
protocols:
  http:
    base_url: https://server-01:9443
  oscommand: {}
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.host.hostname, "server-01");
        assert_eq!(config.collect_interval, Duration::from_secs(30));
        assert_eq!(config.connector_dir, "connectors");
        assert!(config.protocols.contains_key("http"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_config_load_expands_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "host:\n  hostname: ${{env::ARGUS_TEST_HOSTNAME:-fallback-host}}\n"
        )
        .unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.host.hostname, "fallback-host");
    }

    #[test]
    fn test_engine_config_rejects_subsecond_interval() {
        let yaml = r#"
host:
  hostname: h
collect_interval: 100ms
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_engine_config_load_missing_file() {
        let result = EngineConfig::load("/nonexistent/argus.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
