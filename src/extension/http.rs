//! Built-in HTTP protocol extension.
//!
//! Executes `http` sources and criteria against a REST or web endpoint on the
//! monitored host. Responses come back as raw text tables; connectors shape
//! them with compute steps (`json2csv`, script sources).

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::connector::{
    Criterion, CriterionKind, CriterionType, HttpMethod, ResultContent, Source, SourceKind,
    SourceType,
};
use crate::extension::{ProtocolConfig, ProtocolError, ProtocolExtension};
use crate::strategy::{CriterionTestResult, SourceTable, matches_expected_result};
use crate::telemetry::TelemetryStore;

/// Protocol identifier of this extension.
pub const HTTP_PROTOCOL: &str = "http";

/// Default request timeout (2 minutes).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_verify_certificates() -> bool {
    true
}

/// `http` section of the host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProtocolConfig {
    /// Base URL of the monitored endpoint (scheme, host, port).
    pub url: String,
    /// Basic-auth username.
    #[serde(default)]
    pub username: Option<String>,
    /// Basic-auth password.
    #[serde(default)]
    pub password: Option<String>,
    /// Request timeout (default: 2m).
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Verify TLS certificates (default: true).
    #[serde(default = "default_verify_certificates")]
    pub verify_certificates: bool,
}

impl HttpProtocolConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            timeout: DEFAULT_TIMEOUT,
            verify_certificates: true,
        }
    }

    /// Set basic-auth credentials.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl ProtocolConfig for HttpProtocolConfig {
    fn protocol(&self) -> &str {
        HTTP_PROTOCOL
    }

    fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("url must not be empty".to_string());
        }
        url::Url::parse(&self.url).map_err(|e| format!("invalid url '{}': {}", self.url, e))?;
        if self.timeout.is_zero() {
            return Err("timeout must be positive".to_string());
        }
        Ok(())
    }

    fn property(&self, name: &str) -> Option<String> {
        match name {
            "url" => Some(self.url.clone()),
            "username" => self.username.clone(),
            "timeout" => Some(humantime::format_duration(self.timeout).to_string()),
            _ => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// HTTP protocol extension.
#[derive(Debug, Default)]
pub struct HttpExtension;

impl HttpExtension {
    pub fn new() -> Self {
        Self
    }

    fn downcast(config: &dyn ProtocolConfig) -> Result<&HttpProtocolConfig, ProtocolError> {
        config
            .as_any()
            .downcast_ref::<HttpProtocolConfig>()
            .ok_or_else(|| {
                ProtocolError::InvalidConfiguration(format!(
                    "expected an http configuration, got '{}'",
                    config.protocol()
                ))
            })
    }

    fn client(config: &HttpProtocolConfig) -> Result<Client, ProtocolError> {
        Ok(Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_certificates)
            .build()?)
    }

    /// Execute one request and render the selected response content as text.
    async fn execute(
        &self,
        config: &HttpProtocolConfig,
        method: HttpMethod,
        path: &str,
        header: Option<&str>,
        body: Option<&str>,
        result_content: ResultContent,
    ) -> Result<HttpResult, ProtocolError> {
        let url = join_url(&config.url, path);
        let client = Self::client(config)?;

        let mut request = match method {
            HttpMethod::Get => client.get(&url),
            HttpMethod::Post => client.post(&url),
            HttpMethod::Put => client.put(&url),
            HttpMethod::Delete => client.delete(&url),
            HttpMethod::Head => client.head(&url),
        };

        for (name, value) in parse_header_block(header) {
            request = request.header(name, value);
        }
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            request = request.basic_auth(username, Some(password));
        }
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        let response = match timeout(config.timeout, request.send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(ProtocolError::Http(e)),
            Err(_) => return Err(ProtocolError::Timeout),
        };

        let status = response.status().as_u16();
        let header_text = response
            .headers()
            .iter()
            .map(|(name, value)| {
                format!("{}: {}", name.as_str(), value.to_str().unwrap_or_default())
            })
            .collect::<Vec<_>>()
            .join("\n");
        let body_text = match result_content {
            ResultContent::Header => String::new(),
            _ => response.text().await.unwrap_or_default(),
        };

        let content = match result_content {
            ResultContent::Body => body_text,
            ResultContent::Header => header_text,
            ResultContent::HttpStatus => status.to_string(),
            ResultContent::All => format!("{header_text}\n\n{body_text}"),
        };

        Ok(HttpResult { status, content })
    }
}

struct HttpResult {
    status: u16,
    content: String,
}

#[async_trait::async_trait]
impl ProtocolExtension for HttpExtension {
    fn protocol(&self) -> &str {
        HTTP_PROTOCOL
    }

    fn supported_sources(&self) -> BTreeSet<SourceType> {
        BTreeSet::from([SourceType::Http])
    }

    fn supported_criteria(&self) -> BTreeSet<CriterionType> {
        BTreeSet::from([CriterionType::Http])
    }

    fn build_configuration(
        &self,
        protocol_key: &str,
        raw: &serde_yaml::Value,
    ) -> Result<Arc<dyn ProtocolConfig>, ProtocolError> {
        let config: HttpProtocolConfig = serde_yaml::from_value(raw.clone()).map_err(|e| {
            ProtocolError::InvalidConfiguration(format!("section '{protocol_key}': {e}"))
        })?;
        config
            .validate()
            .map_err(|e| ProtocolError::InvalidConfiguration(format!("section '{protocol_key}': {e}")))?;
        Ok(Arc::new(config))
    }

    async fn process_source(
        &self,
        source: &Source,
        connector_id: &str,
        config: &dyn ProtocolConfig,
        _store: &TelemetryStore,
    ) -> Result<SourceTable, ProtocolError> {
        let config = Self::downcast(config)?;
        let SourceKind::Http {
            path,
            method,
            header,
            body,
            result_content,
        } = &source.kind
        else {
            return Err(ProtocolError::UnsupportedOperation(
                source.kind.source_type().to_string(),
            ));
        };

        let result = self
            .execute(
                config,
                *method,
                path,
                header.as_deref(),
                body.as_deref(),
                *result_content,
            )
            .await?;

        tracing::debug!(
            connector_id,
            source = %source.name,
            path = %path,
            status = result.status,
            "HTTP source executed"
        );
        Ok(SourceTable::from_raw(result.content))
    }

    async fn process_criterion(
        &self,
        criterion: &Criterion,
        connector_id: &str,
        config: &dyn ProtocolConfig,
        _store: &TelemetryStore,
    ) -> Result<CriterionTestResult, ProtocolError> {
        let config = Self::downcast(config)?;
        let CriterionKind::Http {
            path,
            method,
            header,
            body,
            expected_result,
            error_message,
        } = &criterion.kind
        else {
            return Err(ProtocolError::UnsupportedOperation(
                criterion.kind.criterion_type().to_string(),
            ));
        };

        let result = match self
            .execute(
                config,
                *method,
                path,
                header.as_deref(),
                body.as_deref(),
                ResultContent::Body,
            )
            .await
        {
            Ok(result) => result,
            Err(e) => {
                return Ok(CriterionTestResult::failure(
                    error_message
                        .clone()
                        .unwrap_or_else(|| format!("HTTP test on {path} failed: {e}")),
                ));
            }
        };

        let reachable = result.status < 400;
        let success = reachable
            && matches_expected_result(&result.content, expected_result.as_deref());

        tracing::debug!(
            connector_id,
            path = %path,
            status = result.status,
            success,
            "HTTP criterion tested"
        );

        if success {
            Ok(CriterionTestResult::success(result.content))
        } else {
            let message = error_message.clone().unwrap_or_else(|| {
                format!(
                    "HTTP test on {path} returned status {} with a non-matching response",
                    result.status
                )
            });
            Ok(CriterionTestResult::failure(message).with_result(result.content))
        }
    }

    async fn check_protocol(
        &self,
        config: &dyn ProtocolConfig,
        _store: &TelemetryStore,
    ) -> Option<bool> {
        let config = Self::downcast(config).ok()?;
        match self
            .execute(config, HttpMethod::Get, "/", None, None, ResultContent::HttpStatus)
            .await
        {
            // Any completed response proves the endpoint is reachable.
            Ok(_) => Some(true),
            Err(_) => Some(false),
        }
    }
}

/// Join a base URL and a request path without doubling the slash.
fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Parse a `Name: Value` header block, one header per line.
fn parse_header_block(header: Option<&str>) -> Vec<(String, String)> {
    header
        .map(|block| {
            block
                .lines()
                .filter_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    let name = name.trim();
                    if name.is_empty() {
                        return None;
                    }
                    Some((name.to_string(), value.trim().to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let yaml = "url: https://oob.example.com:8443";
        let config: HttpProtocolConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.url, "https://oob.example.com:8443");
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert!(config.verify_certificates);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_url() {
        let config = HttpProtocolConfig::new("not a url");
        assert!(config.validate().is_err());

        let config = HttpProtocolConfig::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_hides_password() {
        let config = HttpProtocolConfig::new("https://h").with_basic_auth("admin", "secret");
        assert_eq!(config.property("username").as_deref(), Some("admin"));
        assert!(config.property("password").is_none());
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://h:443/", "/api"), "https://h:443/api");
        assert_eq!(join_url("https://h:443", "api"), "https://h:443/api");
    }

    #[test]
    fn test_parse_header_block() {
        let headers = parse_header_block(Some("Accept: application/json\nX-Token: abc"));
        assert_eq!(
            headers,
            vec![
                ("Accept".to_string(), "application/json".to_string()),
                ("X-Token".to_string(), "abc".to_string()),
            ]
        );
        assert!(parse_header_block(None).is_empty());
        assert!(parse_header_block(Some("garbage line")).is_empty());
    }

    #[test]
    fn test_capabilities() {
        let ext = HttpExtension::new();
        assert!(ext.supported_sources().contains(&SourceType::Http));
        assert!(!ext.supported_sources().contains(&SourceType::SnmpGet));
        assert!(ext.supported_criteria().contains(&CriterionType::Http));
    }

    #[test]
    fn test_build_configuration_rejects_invalid() {
        let ext = HttpExtension::new();
        let raw: serde_yaml::Value = serde_yaml::from_str("url: ''").unwrap();
        let err = ext.build_configuration("http", &raw).unwrap_err();
        assert!(err.to_string().contains("http"));
    }
}
