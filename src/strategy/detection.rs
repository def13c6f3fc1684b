//! Connector detection: criterion evaluation and verdict recording.
//!
//! Detection decides which connectors apply to the host. Each connector's
//! criteria are tested in declaration order and combined as a logical AND;
//! the first failure ends the test. Engine-internal criteria (device type,
//! product requirements) are evaluated in place, everything else dispatches
//! through the extension registry the same way sources do. The verdict lands
//! in three places: a `connector` monitor whose `connector.status` state-set
//! metric is `ok` or `failed`, a `StatusInformation` attribute carrying the
//! joined criterion messages, and the connector namespace's status flag that
//! later jobs consult.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::connector::{Connector, Criterion, CriterionKind};
use crate::extension::ExtensionRegistry;
use crate::strategy::engine::record_job_duration;
use crate::strategy::guard::run_serialized;
use crate::strategy::surrounding::SurroundingExecutor;
use crate::telemetry::{
    CONNECTOR_ID_ATTRIBUTE, CONNECTOR_MONITOR_TYPE, TelemetryStore, build_monitor_id,
};

/// State-set metric key recording a connector's detection verdict.
pub const CONNECTOR_STATUS_METRIC: &str = "connector.status";

/// State recorded when every criterion passed.
pub const CONNECTOR_STATE_OK: &str = "ok";

/// State recorded when a criterion failed.
pub const CONNECTOR_STATE_FAILED: &str = "failed";

// =============================================================================
// Criterion test result
// =============================================================================

/// Outcome of one criterion test.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CriterionTestResult {
    /// Whether the criterion passed.
    pub success: bool,

    /// Raw content the probe returned, when any.
    pub result: Option<String>,

    /// Human-readable explanation, surfaced in the connector's status
    /// information.
    pub message: Option<String>,
}

impl CriterionTestResult {
    /// A passing result carrying the probe's returned content.
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            success: true,
            result: Some(result.into()),
            message: None,
        }
    }

    /// A failing result carrying an explanation.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            message: Some(message.into()),
        }
    }

    /// Attach the probe's returned content.
    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    /// Attach an explanation.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// One line for the connector's status information report.
    pub fn summary(&self) -> String {
        let outcome = if self.success { "passed" } else { "failed" };
        match (&self.message, &self.result) {
            (Some(message), _) => format!("{outcome}: {message}"),
            (None, Some(result)) if !result.is_empty() => {
                format!("{outcome}: returned '{result}'")
            }
            _ => outcome.to_string(),
        }
    }
}

/// Match probe output against an optional expected pattern.
///
/// Without a pattern, any non-blank output passes. With one, the pattern is a
/// case-insensitive regex searched anywhere in the output; a pattern that
/// does not compile degrades to a case-insensitive substring check.
pub fn matches_expected_result(content: &str, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return !content.trim().is_empty();
    };
    match regex::RegexBuilder::new(expected).case_insensitive(true).build() {
        Ok(pattern) => pattern.is_match(content),
        Err(_) => content.to_lowercase().contains(&expected.to_lowercase()),
    }
}

// =============================================================================
// Criterion evaluation
// =============================================================================

/// Evaluates detection criteria for one connector.
#[derive(Debug, Clone)]
pub struct CriterionEvaluator {
    store: Arc<TelemetryStore>,
    registry: Arc<ExtensionRegistry>,
    connector_id: String,
}

impl CriterionEvaluator {
    /// Create an evaluator for one connector.
    pub fn new(
        store: Arc<TelemetryStore>,
        registry: Arc<ExtensionRegistry>,
        connector_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            connector_id: connector_id.into(),
        }
    }

    /// Test one criterion.
    ///
    /// Internal kinds are answered directly; the rest dispatch through the
    /// registry, under the serialization guard when flagged. Every outcome is
    /// a [`CriterionTestResult`]; nothing escapes as an error.
    pub async fn evaluate(&self, criterion: &Criterion) -> CriterionTestResult {
        if criterion.kind.is_internal() {
            return self.evaluate_internal(&criterion.kind);
        }

        let body = self.dispatch(criterion);
        if criterion.force_serialization {
            let namespace = self.store.namespace(&self.connector_id).await;
            let criterion_type = criterion.kind.criterion_type();
            run_serialized(
                &namespace,
                &self.connector_id,
                criterion_type.as_ref(),
                self.store.host().guard_timeout,
                CriterionTestResult::failure(format!(
                    "serialized {criterion_type} criterion timed out"
                )),
                body,
            )
            .await
        } else {
            body.await
        }
    }

    /// Kinds the engine answers without a protocol client.
    fn evaluate_internal(&self, kind: &CriterionKind) -> CriterionTestResult {
        match kind {
            CriterionKind::DeviceType { keep, exclude } => {
                let device_kind = self.store.host().device_kind;
                let included = if keep.contains(&device_kind) {
                    true
                } else if exclude.contains(&device_kind) {
                    false
                } else {
                    keep.is_empty()
                };
                if included {
                    CriterionTestResult::success(format!("configured device kind: {device_kind}"))
                } else {
                    CriterionTestResult::failure(format!(
                        "device kind {device_kind} is not covered by this connector"
                    ))
                }
            }
            CriterionKind::ProductRequirements { engine_version } => {
                let Some(required) = engine_version.as_deref().filter(|v| !v.trim().is_empty())
                else {
                    return CriterionTestResult::success(String::new());
                };
                if version_at_least(env!("CARGO_PKG_VERSION"), required) {
                    CriterionTestResult::success(format!("engine version satisfies {required}"))
                } else {
                    CriterionTestResult::failure(format!(
                        "engine version {} is older than required {required}",
                        env!("CARGO_PKG_VERSION")
                    ))
                }
            }
            other => CriterionTestResult::failure(format!(
                "criterion {} is not engine-internal",
                other.criterion_type()
            )),
        }
    }

    /// Protocol dispatch through the extension registry.
    async fn dispatch(&self, criterion: &Criterion) -> CriterionTestResult {
        let criterion_type = criterion.kind.criterion_type();
        let Some(extension) = self.registry.extension_for_criterion(criterion_type) else {
            return CriterionTestResult::failure(format!(
                "no extension registered for {criterion_type} criteria"
            ));
        };
        let Some(config) = self.store.find_protocol_config(extension.protocol()) else {
            return CriterionTestResult::failure(format!(
                "protocol {} is not configured for this host",
                extension.protocol()
            ));
        };

        match extension
            .process_criterion(criterion, &self.connector_id, config.as_ref(), &self.store)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                debug!(
                    connector_id = %self.connector_id,
                    criterion = %criterion_type,
                    error = %e,
                    "Criterion test errored"
                );
                CriterionTestResult::failure(format!("{criterion_type} criterion failed: {e}"))
            }
        }
    }
}

/// Dotted numeric version comparison: `actual >= required`.
///
/// Non-numeric segment suffixes are ignored; trailing zero segments are
/// insignificant, so `1.0.0` and `1` compare equal.
fn version_at_least(actual: &str, required: &str) -> bool {
    numeric_segments(actual) >= numeric_segments(required)
}

fn numeric_segments(version: &str) -> Vec<u64> {
    let mut segments: Vec<u64> = version
        .split('.')
        .map(|part| {
            part.chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .unwrap_or(0)
        })
        .collect();
    while segments.last() == Some(&0) {
        segments.pop();
    }
    segments
}

// =============================================================================
// Detection executor
// =============================================================================

/// Aggregated detection verdict for one connector.
#[derive(Debug, Clone, Default)]
pub struct ConnectorTestResult {
    pub connector_id: String,

    /// Per-criterion outcomes, in test order, ending at the first failure.
    pub criterion_results: Vec<CriterionTestResult>,
}

impl ConnectorTestResult {
    /// True when every tested criterion passed (a connector without criteria
    /// passes).
    pub fn succeeded(&self) -> bool {
        self.criterion_results.iter().all(|r| r.success)
    }

    /// Multi-line report joined from the criterion summaries, ending in a
    /// conclusion line.
    pub fn status_information(&self, hostname: &str) -> String {
        let mut lines: Vec<String> = self
            .criterion_results
            .iter()
            .filter(|r| r.message.is_some() || r.result.is_some())
            .map(CriterionTestResult::summary)
            .collect();
        lines.push(format!(
            "Conclusion: test on {hostname} {}",
            if self.succeeded() { "SUCCEEDED" } else { "FAILED" }
        ));
        lines.join("\n")
    }
}

/// Runs detection across connectors and records the verdicts.
#[derive(Debug, Clone)]
pub struct DetectionExecutor {
    store: Arc<TelemetryStore>,
    registry: Arc<ExtensionRegistry>,
}

impl DetectionExecutor {
    pub fn new(store: Arc<TelemetryStore>, registry: Arc<ExtensionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Detect every given connector and return the ones that matched.
    pub async fn run(
        &self,
        connectors: &[Arc<Connector>],
        strategy_time: DateTime<Utc>,
    ) -> Vec<Arc<Connector>> {
        let mut detected = Vec::new();
        for connector in connectors {
            let result = self.detect_connector(connector, strategy_time).await;
            if result.succeeded() {
                detected.push(Arc::clone(connector));
            }
        }
        info!(
            host = self.store.hostname(),
            tested = connectors.len(),
            detected = detected.len(),
            "Detection finished"
        );
        detected
    }

    /// Test one connector's criteria and record the verdict.
    ///
    /// Pre sources run first so criteria can reference their tables. The
    /// verdict is recorded even for a failing connector, so operators can see
    /// why it was rejected.
    pub async fn detect_connector(
        &self,
        connector: &Connector,
        strategy_time: DateTime<Utc>,
    ) -> ConnectorTestResult {
        let connector_id = connector.connector_id.as_str();
        let started = std::time::Instant::now();

        SurroundingExecutor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            connector_id,
        )
        .run_pre(connector)
        .await;

        let evaluator = CriterionEvaluator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            connector_id,
        );

        let mut result = ConnectorTestResult {
            connector_id: connector_id.to_string(),
            criterion_results: Vec::new(),
        };
        for criterion in &connector.detection.criteria {
            let outcome = evaluator.evaluate(criterion).await;
            let failed = !outcome.success;
            result.criterion_results.push(outcome);
            if failed {
                break;
            }
        }

        let verdict = result.succeeded();
        debug!(
            connector_id,
            criteria = connector.detection.criteria.len(),
            tested = result.criterion_results.len(),
            verdict,
            "Connector detection tested"
        );

        self.record_verdict(connector, &result, strategy_time).await;
        record_job_duration(
            &self.store,
            "detection",
            CONNECTOR_MONITOR_TYPE,
            connector_id,
            started,
            strategy_time,
        )
        .await;
        result
    }

    /// Write the connector monitor, its status metric and the namespace flag.
    async fn record_verdict(
        &self,
        connector: &Connector,
        result: &ConnectorTestResult,
        strategy_time: DateTime<Utc>,
    ) {
        let connector_id = connector.connector_id.as_str();
        let verdict = result.succeeded();
        let monitor_id = build_monitor_id(connector_id, CONNECTOR_MONITOR_TYPE, &[]);

        let mut attributes = std::collections::BTreeMap::new();
        attributes.insert(CONNECTOR_ID_ATTRIBUTE.to_string(), connector_id.to_string());
        attributes.insert(
            "name".to_string(),
            connector
                .display_name
                .clone()
                .unwrap_or_else(|| connector_id.to_string()),
        );
        attributes.insert(
            "StatusInformation".to_string(),
            result.status_information(self.store.hostname()),
        );

        self.store
            .upsert_monitor(CONNECTOR_MONITOR_TYPE, &monitor_id, attributes, strategy_time)
            .await;
        self.store
            .with_monitor_mut(CONNECTOR_MONITOR_TYPE, &monitor_id, |monitor| {
                monitor.update_state_metric(
                    CONNECTOR_STATUS_METRIC,
                    if verdict { CONNECTOR_STATE_OK } else { CONNECTOR_STATE_FAILED },
                    vec![CONNECTOR_STATE_OK.to_string(), CONNECTOR_STATE_FAILED.to_string()],
                    strategy_time,
                );
            })
            .await;

        let namespace = self.store.namespace(connector_id).await;
        namespace.set_status_ok(verdict).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use crate::config::{DeviceKind, HostConfig};
    use crate::connector::Detection;
    use crate::telemetry::Metric;

    fn store_for(kind: DeviceKind) -> Arc<TelemetryStore> {
        Arc::new(TelemetryStore::new(
            HostConfig::new("server-01").with_device_kind(kind),
        ))
    }

    fn evaluator(store: &Arc<TelemetryStore>) -> CriterionEvaluator {
        CriterionEvaluator::new(
            Arc::clone(store),
            Arc::new(ExtensionRegistry::new()),
            "test-connector",
        )
    }

    // ===== expected-result matching =====

    #[test]
    fn test_matches_without_pattern_requires_output() {
        assert!(matches_expected_result("anything", None));
        assert!(!matches_expected_result("", None));
        assert!(!matches_expected_result("   ", None));
    }

    #[test]
    fn test_matches_pattern_case_insensitive() {
        assert!(matches_expected_result("PowerEdge R740", Some("poweredge")));
        assert!(matches_expected_result("ILO version 2.61", Some("ilo.*2\\.\\d+")));
        assert!(!matches_expected_result("ProLiant", Some("poweredge")));
    }

    #[test]
    fn test_invalid_pattern_degrades_to_substring() {
        assert!(matches_expected_result("price [USD]", Some("[usd")));
        assert!(!matches_expected_result("price [EUR]", Some("[usd")));
    }

    // ===== criterion test result =====

    #[test]
    fn test_summary_prefers_message() {
        let result = CriterionTestResult::failure("no route").with_result("raw");
        assert_eq!(result.summary(), "failed: no route");

        let result = CriterionTestResult::success("MODEL-7");
        assert_eq!(result.summary(), "passed: returned 'MODEL-7'");
    }

    // ===== internal criteria =====

    #[tokio::test]
    async fn test_device_type_keep_matches() {
        let store = store_for(DeviceKind::Linux);
        let criterion = Criterion::new(CriterionKind::DeviceType {
            keep: BTreeSet::from([DeviceKind::Linux, DeviceKind::Aix]),
            exclude: BTreeSet::new(),
        });
        assert!(evaluator(&store).evaluate(&criterion).await.success);
    }

    #[tokio::test]
    async fn test_device_type_keep_rejects_other_kinds() {
        let store = store_for(DeviceKind::Windows);
        let criterion = Criterion::new(CriterionKind::DeviceType {
            keep: BTreeSet::from([DeviceKind::Linux]),
            exclude: BTreeSet::new(),
        });
        assert!(!evaluator(&store).evaluate(&criterion).await.success);
    }

    #[tokio::test]
    async fn test_device_type_exclude_rejects() {
        let store = store_for(DeviceKind::Network);
        let criterion = Criterion::new(CriterionKind::DeviceType {
            keep: BTreeSet::new(),
            exclude: BTreeSet::from([DeviceKind::Network]),
        });
        assert!(!evaluator(&store).evaluate(&criterion).await.success);
    }

    #[tokio::test]
    async fn test_device_type_empty_sets_pass() {
        let store = store_for(DeviceKind::Storage);
        let criterion = Criterion::new(CriterionKind::DeviceType {
            keep: BTreeSet::new(),
            exclude: BTreeSet::new(),
        });
        assert!(evaluator(&store).evaluate(&criterion).await.success);
    }

    #[tokio::test]
    async fn test_product_requirements_absent_version_passes() {
        let store = store_for(DeviceKind::Other);
        let criterion = Criterion::new(CriterionKind::ProductRequirements {
            engine_version: None,
        });
        assert!(evaluator(&store).evaluate(&criterion).await.success);
    }

    #[tokio::test]
    async fn test_product_requirements_future_version_fails() {
        let store = store_for(DeviceKind::Other);
        let criterion = Criterion::new(CriterionKind::ProductRequirements {
            engine_version: Some("999.0".to_string()),
        });
        let outcome = evaluator(&store).evaluate(&criterion).await;
        assert!(!outcome.success);
        assert!(outcome.message.unwrap().contains("999.0"));
    }

    #[test]
    fn test_version_comparison() {
        assert!(version_at_least("1.2.3", "1.2"));
        assert!(version_at_least("1.2", "1.2.0"));
        assert!(version_at_least("2.0", "1.9.9"));
        assert!(!version_at_least("1.2", "1.2.1"));
        assert!(!version_at_least("0.9", "1.0"));
    }

    // ===== dispatch failures =====

    #[tokio::test]
    async fn test_unsupported_criterion_fails_naming_type() {
        let store = store_for(DeviceKind::Other);
        let criterion = Criterion::new(CriterionKind::SnmpGet {
            oid: "1.3.6.1.2.1.1.1.0".to_string(),
            expected_result: None,
        });
        let outcome = evaluator(&store).evaluate(&criterion).await;
        assert!(!outcome.success);
        assert!(outcome.message.unwrap().contains("snmp_get"));
    }

    #[tokio::test]
    async fn test_unconfigured_protocol_fails_naming_protocol() {
        let store = store_for(DeviceKind::Other);
        let registry = Arc::new(ExtensionRegistry::builtin());
        let criterion = Criterion::new(CriterionKind::Http {
            path: "/redfish/v1".to_string(),
            method: Default::default(),
            header: None,
            body: None,
            expected_result: None,
            error_message: None,
        });
        let evaluator = CriterionEvaluator::new(store, registry, "test-connector");
        let outcome = evaluator.evaluate(&criterion).await;
        assert!(!outcome.success);
        assert!(outcome.message.unwrap().contains("http"));
    }

    // ===== detection executor =====

    fn bare_connector(id: &str, criteria: Vec<Criterion>) -> Arc<Connector> {
        Arc::new(Connector {
            connector_id: id.to_string(),
            display_name: None,
            detection: Detection { criteria },
            metrics: Default::default(),
            pre: Vec::new(),
            before_all: Vec::new(),
            after_all: Vec::new(),
            monitors: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_connector_without_criteria_is_detected() {
        let store = store_for(DeviceKind::Linux);
        let executor = DetectionExecutor::new(
            Arc::clone(&store),
            Arc::new(ExtensionRegistry::new()),
        );
        let connectors = vec![bare_connector("generic", Vec::new())];
        let detected = executor.run(&connectors, chrono::Utc::now()).await;
        assert_eq!(detected.len(), 1);
        assert!(store.namespace("generic").await.status_ok().await);
    }

    #[tokio::test]
    async fn test_failed_detection_records_failed_status() {
        let store = store_for(DeviceKind::Windows);
        let executor = DetectionExecutor::new(
            Arc::clone(&store),
            Arc::new(ExtensionRegistry::new()),
        );
        let connector = bare_connector(
            "linux-only",
            vec![Criterion::new(CriterionKind::DeviceType {
                keep: BTreeSet::from([DeviceKind::Linux]),
                exclude: BTreeSet::new(),
            })],
        );
        let detected = executor.run(&[connector], chrono::Utc::now()).await;
        assert!(detected.is_empty());
        assert!(!store.namespace("linux-only").await.status_ok().await);

        let monitor_id = build_monitor_id("linux-only", CONNECTOR_MONITOR_TYPE, &[]);
        let monitor = store
            .monitor(CONNECTOR_MONITOR_TYPE, &monitor_id)
            .await
            .unwrap();
        match monitor.metric(CONNECTOR_STATUS_METRIC) {
            Some(Metric::StateSet(state)) => {
                assert_eq!(state.value, CONNECTOR_STATE_FAILED);
                assert_eq!(
                    state.state_set,
                    vec![CONNECTOR_STATE_OK.to_string(), CONNECTOR_STATE_FAILED.to_string()]
                );
            }
            other => panic!("expected state-set metric, got {other:?}"),
        }
        let info = monitor.attribute("StatusInformation").unwrap();
        assert!(info.contains("FAILED"));
    }

    #[tokio::test]
    async fn test_detection_stops_at_first_failure() {
        let store = store_for(DeviceKind::Windows);
        let executor = DetectionExecutor::new(
            Arc::clone(&store),
            Arc::new(ExtensionRegistry::new()),
        );
        let connector = bare_connector(
            "two-criteria",
            vec![
                Criterion::new(CriterionKind::DeviceType {
                    keep: BTreeSet::from([DeviceKind::Linux]),
                    exclude: BTreeSet::new(),
                }),
                Criterion::new(CriterionKind::ProductRequirements {
                    engine_version: None,
                }),
            ],
        );
        let result = executor
            .detect_connector(&connector, chrono::Utc::now())
            .await;
        assert_eq!(result.criterion_results.len(), 1);
        assert!(!result.succeeded());
    }
}
