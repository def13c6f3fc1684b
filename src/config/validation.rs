//! Configuration validation utilities.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration or connector file could not be read.
    #[error("cannot read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// The YAML content did not deserialize.
    #[error("malformed YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// The document parsed but a semantic rule failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

/// Parse a human-readable duration (`30s`, `5m30s`, `1h`, `100ms`).
///
/// # Examples
///
/// ```
/// use argus::config::parse_duration;
///
/// assert_eq!(parse_duration("45s").unwrap().as_secs(), 45);
/// assert_eq!(parse_duration("1h30m").unwrap().as_secs(), 5400);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(trimmed).map_err(|e| e.to_string())
}

/// Expand environment variables in a string.
/// Supports ${env::VAR} and ${env::VAR:-default} syntax.
///
/// The `env::` prefix keeps these tokens disjoint from the engine's
/// `${source::...}` and `${attribute::...}` reference tokens, so connector
/// fragments embedded in a configuration file pass through untouched.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{env::([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("failed to compile env var regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            match std::env::var(&caps[1]) {
                Ok(value) => value,
                Err(_) => caps
                    .get(2)
                    .map(|default| default.as_str().to_string())
                    .unwrap_or_default(),
            }
        })
        .into_owned()
}

/// Read a YAML file, expand `${env::...}` tokens, and deserialize it.
pub fn load_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path.as_ref())?;
    let expanded = expand_env_vars(&content);
    Ok(serde_yaml::from_str(&expanded)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_duration_valid() {
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration(" 1h ").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("soon").is_err());
        // Bare numbers carry no unit.
        assert!(parse_duration("60").is_err());
    }

    #[test]
    fn test_expand_env_vars_no_tokens() {
        assert_eq!(expand_env_vars("timeout: 30s"), "timeout: 30s");
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        let result = expand_env_vars("community: ${env::ARGUS_NO_SUCH_VAR_1:-public}");
        assert_eq!(result, "community: public");
    }

    #[test]
    fn test_expand_env_vars_from_env() {
        // SAFETY: variable name is unique to this test.
        unsafe {
            std::env::set_var("ARGUS_TEST_COMMUNITY", "s3cret");
        }
        let result = expand_env_vars("community: ${env::ARGUS_TEST_COMMUNITY}");
        assert_eq!(result, "community: s3cret");
        // SAFETY: same variable, removed after the assertion.
        unsafe {
            std::env::remove_var("ARGUS_TEST_COMMUNITY");
        }
    }

    #[test]
    fn test_expand_env_vars_missing_without_default_becomes_empty() {
        assert_eq!(expand_env_vars("user: ${env::ARGUS_NO_SUCH_VAR_3}"), "user: ");
    }

    #[test]
    fn test_expand_env_vars_leaves_engine_tokens() {
        let text = "value: ${source::monitors.disk.discovery.sources.ids}";
        assert_eq!(expand_env_vars(text), text);
    }

    #[test]
    fn test_load_yaml() {
        #[derive(serde::Deserialize)]
        struct Probe {
            name: String,
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name: ${{env::ARGUS_NO_SUCH_VAR_2:-fallback}}").unwrap();
        let probe: Probe = load_yaml(file.path()).unwrap();
        assert_eq!(probe.name, "fallback");
    }
}
