//! Metric value holders.
//!
//! Number metrics retain the previous sample and both collect timestamps so
//! consumers can derive rates and integrals (energy from power) without any
//! external history. State-set metrics hold the current state plus the
//! declared enumerated set.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Split a mapped metric key into its base name and attribute map.
///
/// `hw.errors{hw.type="memory", limit_type=degraded}` parses to
/// `("hw.errors", {hw.type: memory, limit_type: degraded})`; a key without
/// braces has an empty attribute map.
pub fn parse_metric_name(key: &str) -> (String, BTreeMap<String, String>) {
    static NAME_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = NAME_REGEX.get_or_init(|| {
        regex::Regex::new(r"^\s*([^{]+?)\s*(?:\{(.*)\}\s*)?$")
            .expect("failed to compile metric name regex")
    });

    let Some(caps) = regex.captures(key) else {
        return (key.trim().to_string(), BTreeMap::new());
    };

    let base = caps[1].trim().to_string();
    let mut attributes = BTreeMap::new();
    if let Some(attrs) = caps.get(2) {
        for pair in attrs.as_str().split(',') {
            if let Some((name, value)) = pair.split_once('=') {
                attributes.insert(
                    name.trim().to_string(),
                    value.trim().trim_matches('"').to_string(),
                );
            }
        }
    }
    (base, attributes)
}

/// Numeric metric with one retained previous sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumberMetric {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub value: f64,
    pub collect_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_collect_time: Option<DateTime<Utc>>,
}

impl NumberMetric {
    /// Create a metric from its first sample.
    pub fn new(name: impl Into<String>, value: f64, collect_time: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            unit: None,
            value,
            collect_time,
            previous_value: None,
            previous_collect_time: None,
        }
    }

    /// Set attributes, builder-style.
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Set the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Record a new sample, retaining the current one as previous.
    ///
    /// A second update at the same timestamp overwrites the value without
    /// shifting the previous sample: one cycle contributes one sample.
    pub fn update(&mut self, value: f64, collect_time: DateTime<Utc>) {
        if collect_time == self.collect_time {
            self.value = value;
            return;
        }
        self.previous_value = Some(self.value);
        self.previous_collect_time = Some(self.collect_time);
        self.value = value;
        self.collect_time = collect_time;
    }

    /// Seconds elapsed between the previous and current samples.
    pub fn delta_seconds(&self) -> Option<f64> {
        let previous = self.previous_collect_time?;
        let millis = (self.collect_time - previous).num_milliseconds();
        if millis <= 0 {
            return None;
        }
        Some(millis as f64 / 1000.0)
    }

    /// Per-second rate between the previous and current samples.
    pub fn rate(&self) -> Option<f64> {
        let dt = self.delta_seconds()?;
        let previous = self.previous_value?;
        Some((self.value - previous) / dt)
    }

    /// True when the metric was refreshed at the given strategy timestamp.
    pub fn is_updated_at(&self, time: DateTime<Utc>) -> bool {
        self.collect_time == time
    }
}

/// State metric over a declared enumerated set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSetMetric {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    pub value: String,
    pub state_set: Vec<String>,
    pub collect_time: DateTime<Utc>,
}

impl StateSetMetric {
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        state_set: Vec<String>,
        collect_time: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeMap::new(),
            value: value.into(),
            state_set,
            collect_time,
        }
    }

    /// Set attributes, builder-style.
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Record a new state.
    pub fn update(&mut self, value: impl Into<String>, collect_time: DateTime<Utc>) {
        self.value = value.into();
        self.collect_time = collect_time;
    }

    /// True when the metric was refreshed at the given strategy timestamp.
    pub fn is_updated_at(&self, time: DateTime<Utc>) -> bool {
        self.collect_time == time
    }
}

/// One monitor metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Metric {
    Number(NumberMetric),
    StateSet(StateSetMetric),
}

impl Metric {
    pub fn name(&self) -> &str {
        match self {
            Metric::Number(m) => &m.name,
            Metric::StateSet(m) => &m.name,
        }
    }

    pub fn collect_time(&self) -> DateTime<Utc> {
        match self {
            Metric::Number(m) => m.collect_time,
            Metric::StateSet(m) => m.collect_time,
        }
    }

    pub fn is_updated_at(&self, time: DateTime<Utc>) -> bool {
        match self {
            Metric::Number(m) => m.is_updated_at(time),
            Metric::StateSet(m) => m.is_updated_at(time),
        }
    }

    pub fn as_number(&self) -> Option<&NumberMetric> {
        match self {
            Metric::Number(m) => Some(m),
            Metric::StateSet(_) => None,
        }
    }

    pub fn as_state_set(&self) -> Option<&StateSetMetric> {
        match self {
            Metric::StateSet(m) => Some(m),
            Metric::Number(_) => None,
        }
    }
}

/// Integrate power into cumulative energy: `E += P × Δt`.
///
/// Uses the power metric's retained sample pair for Δt; returns `None` until
/// two samples exist.
pub fn estimate_energy_from_power(power: &NumberMetric, previous_energy: Option<f64>) -> Option<f64> {
    let dt = power.delta_seconds()?;
    Some(previous_energy.unwrap_or(0.0) + power.value * dt)
}
