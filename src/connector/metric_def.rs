//! Connector-declared metric definitions.
//!
//! A connector may describe the metrics its mappings emit: unit, metric type
//! and, for state metrics, the enumerated state set. Definitions are keyed by
//! the metric's base name (attributes in the mapped key, such as
//! `hw.errors{hw.type="memory"}`, are not part of the definition key).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// How successive samples of a number metric relate.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum MetricType {
    /// Point-in-time measurement.
    #[default]
    Gauge,
    /// Monotonically increasing value; consumers derive rates from samples.
    Counter,
    /// Sum that can increase and decrease.
    UpDownCounter,
}

/// Declaration of one metric a connector can emit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Unit string (`Cel`, `W`, `By`, ...).
    #[serde(default)]
    pub unit: Option<String>,

    /// Sample relationship (default: gauge).
    #[serde(default)]
    pub metric_type: MetricType,

    /// Enumerated states; non-empty makes this a state-set metric.
    #[serde(default)]
    pub state_set: Vec<String>,
}

impl MetricDefinition {
    /// True when the definition declares a state-set metric.
    pub fn is_state_set(&self) -> bool {
        !self.state_set.is_empty()
    }
}

/// Find the definition for a metric key, ignoring any `{...}` attribute part.
pub fn lookup_definition<'a>(
    definitions: &'a BTreeMap<String, MetricDefinition>,
    metric_key: &str,
) -> Option<&'a MetricDefinition> {
    let base = metric_key.split('{').next().unwrap_or(metric_key).trim();
    definitions.get(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_definition_from_yaml() {
        let yaml = r#"
hw.temperature:
  unit: Cel
hw.status:
  state_set: [ok, degraded, failed]
hw.energy:
  unit: J
  metric_type: counter
"#;
        let defs: BTreeMap<String, MetricDefinition> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(defs["hw.temperature"].unit.as_deref(), Some("Cel"));
        assert!(defs["hw.status"].is_state_set());
        assert_eq!(defs["hw.energy"].metric_type, MetricType::Counter);
        assert!(!defs["hw.energy"].is_state_set());
    }

    #[test]
    fn test_lookup_definition_strips_attributes() {
        let mut defs = BTreeMap::new();
        defs.insert(
            "hw.errors".to_string(),
            MetricDefinition {
                unit: None,
                metric_type: MetricType::Counter,
                state_set: Vec::new(),
            },
        );

        let found = lookup_definition(&defs, "hw.errors{hw.type=\"memory\"}");
        assert!(found.is_some());
        assert!(lookup_definition(&defs, "hw.power").is_none());
    }

    #[test]
    fn test_metric_type_parsing() {
        use std::str::FromStr;
        assert_eq!(MetricType::from_str("counter").unwrap(), MetricType::Counter);
        assert_eq!(
            MetricType::from_str("up_down_counter").unwrap(),
            MetricType::UpDownCounter
        );
        assert_eq!(MetricType::default(), MetricType::Gauge);
    }
}
