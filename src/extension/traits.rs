//! Protocol extension traits and types.

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use crate::connector::{Criterion, CriterionType, Source, SourceType};
use crate::strategy::{CriterionTestResult, SourceTable};
use crate::telemetry::TelemetryStore;

/// Errors raised inside a protocol extension.
///
/// These never cross the strategy boundary: the engine converts a failed
/// source into an empty table and a failed criterion into a failure result,
/// so one broken protocol cannot abort a cycle.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Network or process I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Timeout elapsed.
    #[error("timeout elapsed")]
    Timeout,

    /// The protocol configuration is malformed or of the wrong type.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The extension was handed a source or criterion kind it does not
    /// support.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The remote end answered, but with something unusable.
    #[error("execution failed: {0}")]
    Execution(String),
}

/// One protocol section of the host configuration.
///
/// Extensions downcast through [`ProtocolConfig::as_any`] to recover their
/// concrete configuration type.
pub trait ProtocolConfig: Send + Sync + std::fmt::Debug + 'static {
    /// Protocol identifier this configuration belongs to (e.g. `http`).
    fn protocol(&self) -> &str;

    /// Validate field values, returning a human-readable description of the
    /// first problem found.
    fn validate(&self) -> Result<(), String>;

    /// Look up a configuration property by name, for `${attribute::...}`-style
    /// diagnostics and logging. Secrets must not be returned here.
    fn property(&self, name: &str) -> Option<String>;

    /// Upcast for downcasting to the concrete type.
    fn as_any(&self) -> &dyn Any;
}

/// A protocol extension: the pluggable executor for one family of sources and
/// criteria.
///
/// Extensions are stateless between calls; everything they need arrives as
/// arguments. The telemetry store reference is read-only and serves attribute
/// lookups, never mutation.
#[async_trait::async_trait]
pub trait ProtocolExtension: Send + Sync + 'static {
    /// Unique protocol identifier (e.g. `http`, `oscommand`).
    fn protocol(&self) -> &str;

    /// Source kinds this extension can execute.
    fn supported_sources(&self) -> BTreeSet<SourceType>;

    /// Criterion kinds this extension can test.
    fn supported_criteria(&self) -> BTreeSet<CriterionType>;

    /// True when the given configuration is usable by this extension.
    fn accepts(&self, config: &dyn ProtocolConfig) -> bool {
        config.protocol() == self.protocol()
    }

    /// Parse one raw protocol section of the host configuration into this
    /// extension's concrete configuration.
    ///
    /// `protocol_key` is the section name from the host configuration, which
    /// may carry an instance suffix (e.g. `http-backup`).
    fn build_configuration(
        &self,
        protocol_key: &str,
        raw: &serde_yaml::Value,
    ) -> Result<Arc<dyn ProtocolConfig>, ProtocolError>;

    /// Execute a source against the host and produce its result table.
    async fn process_source(
        &self,
        source: &Source,
        connector_id: &str,
        config: &dyn ProtocolConfig,
        store: &TelemetryStore,
    ) -> Result<SourceTable, ProtocolError>;

    /// Test a detection criterion against the host.
    async fn process_criterion(
        &self,
        criterion: &Criterion,
        connector_id: &str,
        config: &dyn ProtocolConfig,
        store: &TelemetryStore,
    ) -> Result<CriterionTestResult, ProtocolError>;

    /// Liveness probe for the protocol, backing the `<protocol>.up` metric.
    ///
    /// `None` means the extension cannot tell (no probe implemented); the
    /// engine then skips the metric instead of guessing.
    async fn check_protocol(
        &self,
        config: &dyn ProtocolConfig,
        store: &TelemetryStore,
    ) -> Option<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidConfiguration("missing url".to_string());
        assert_eq!(err.to_string(), "invalid configuration: missing url");

        let err = ProtocolError::UnsupportedOperation("snmp_get".to_string());
        assert_eq!(err.to_string(), "unsupported operation: snmp_get");
    }

    #[test]
    fn test_timeout_display() {
        assert_eq!(ProtocolError::Timeout.to_string(), "timeout elapsed");
    }
}
