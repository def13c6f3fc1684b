//! Monitor instances and their metric maps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::connector::{MetricDefinition, lookup_definition};
use crate::telemetry::metric::{Metric, NumberMetric, StateSetMetric, parse_metric_name};

/// Attribute every discovered monitor carries, naming the connector that
/// produced it.
pub const CONNECTOR_ID_ATTRIBUTE: &str = "connector_id";

/// Monitor type of the root host monitor.
pub const HOST_MONITOR_TYPE: &str = "host";

/// Monitor type of the per-connector status monitors.
pub const CONNECTOR_MONITOR_TYPE: &str = "connector";

/// Build a deterministic monitor identifier from the connector, the monitor
/// type and the key attribute values, in key declaration order.
///
/// Characters outside `[A-Za-z0-9._-]` are folded to `_` so the identifier is
/// stable across runs and safe to use in file names and metric attributes.
pub fn build_monitor_id(connector_id: &str, monitor_type: &str, key_values: &[&str]) -> String {
    let mut raw = String::with_capacity(connector_id.len() + monitor_type.len() + 16);
    raw.push_str(connector_id);
    raw.push('_');
    raw.push_str(monitor_type);
    for value in key_values {
        raw.push('_');
        raw.push_str(value);
    }
    sanitize_id(&raw)
}

fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One monitored instance: attributes plus its metric map.
#[derive(Debug, Clone, Serialize)]
pub struct Monitor {
    pub id: String,
    pub monitor_type: String,
    pub attributes: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, Metric>,
    /// Timestamp of the discovery (or creation) that last refreshed the
    /// attributes.
    pub discovery_time: DateTime<Utc>,
}

impl Monitor {
    pub fn new(
        id: impl Into<String>,
        monitor_type: impl Into<String>,
        discovery_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            monitor_type: monitor_type.into(),
            attributes: BTreeMap::new(),
            metrics: BTreeMap::new(),
            discovery_time,
        }
    }

    /// Set attributes, builder-style.
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn connector_id(&self) -> Option<&str> {
        self.attribute(CONNECTOR_ID_ATTRIBUTE)
    }

    /// Merge discovered attributes into the existing map and refresh the
    /// discovery timestamp.
    pub fn refresh_attributes(
        &mut self,
        attributes: BTreeMap<String, String>,
        discovery_time: DateTime<Utc>,
    ) {
        self.attributes.extend(attributes);
        self.discovery_time = discovery_time;
    }

    pub fn metric(&self, key: &str) -> Option<&Metric> {
        self.metrics.get(key)
    }

    /// Current value of a number metric, by full key.
    pub fn number_value(&self, key: &str) -> Option<f64> {
        self.metrics.get(key)?.as_number().map(|m| m.value)
    }

    /// Record a raw mapped value under a metric key, honoring the connector's
    /// metric definitions.
    ///
    /// Non-numeric values become state-set metrics when the definition
    /// declares a set; otherwise a value that fails to parse as a number is
    /// logged and skipped, leaving the previous sample intact.
    pub fn collect_metric(
        &mut self,
        key: &str,
        raw_value: &str,
        definitions: &BTreeMap<String, MetricDefinition>,
        collect_time: DateTime<Utc>,
    ) {
        let value = raw_value.trim();
        if value.is_empty() {
            return;
        }

        let definition = lookup_definition(definitions, key);
        let is_state_set = definition.is_some_and(MetricDefinition::is_state_set);

        if is_state_set {
            let states = definition
                .map(|d| d.state_set.clone())
                .unwrap_or_default();
            self.update_state_metric(key, value, states, collect_time);
            return;
        }

        match value.parse::<f64>() {
            Ok(number) => {
                let unit = definition.and_then(|d| d.unit.clone());
                self.update_number_metric(key, number, unit, collect_time);
            }
            Err(_) => {
                warn!(
                    monitor_id = %self.id,
                    metric = key,
                    value,
                    "non-numeric value for number metric, sample skipped"
                );
            }
        }
    }

    /// Record a numeric sample under a metric key.
    pub fn update_number_metric(
        &mut self,
        key: &str,
        value: f64,
        unit: Option<String>,
        collect_time: DateTime<Utc>,
    ) {
        match self.metrics.get_mut(key) {
            Some(Metric::Number(existing)) => existing.update(value, collect_time),
            _ => {
                let (base, attributes) = parse_metric_name(key);
                let mut metric = NumberMetric::new(base, value, collect_time)
                    .with_attributes(attributes);
                metric.unit = unit;
                self.metrics.insert(key.to_string(), Metric::Number(metric));
            }
        }
    }

    /// Record a state under a state-set metric key.
    pub fn update_state_metric(
        &mut self,
        key: &str,
        value: &str,
        state_set: Vec<String>,
        collect_time: DateTime<Utc>,
    ) {
        match self.metrics.get_mut(key) {
            Some(Metric::StateSet(existing)) => existing.update(value, collect_time),
            _ => {
                let (base, attributes) = parse_metric_name(key);
                let metric = StateSetMetric::new(base, value, state_set, collect_time)
                    .with_attributes(attributes);
                self.metrics.insert(key.to_string(), Metric::StateSet(metric));
            }
        }
    }

    /// True when no metric of this monitor was refreshed at the given
    /// strategy timestamp.
    ///
    /// Staleness is derived on read; nothing is stored. A monitor without any
    /// metric yet is not considered missing.
    pub fn is_missing(&self, strategy_time: DateTime<Utc>) -> bool {
        !self.metrics.is_empty()
            && !self
                .metrics
                .values()
                .any(|metric| metric.is_updated_at(strategy_time))
    }
}
