//! Connector document model.
//!
//! A [`Connector`] is the immutable, already-validated description of how to
//! detect one class of entity and which acquisition jobs to run per monitor
//! type. It is built once at load time and only read during execution.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::config::ConfigError;

use super::criterion::Criterion;
use super::metric_def::MetricDefinition;
use super::source::Source;

fn default_keys() -> Vec<String> {
    vec!["id".to_string()]
}

/// Job names as they appear in source reference keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum JobName {
    Discovery,
    Collect,
    Simple,
}

/// Surrounding source phases run outside the monitor-type loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SurroundingPhase {
    Pre,
    BeforeAll,
    AfterAll,
}

/// Full reference key of a source inside a monitor job:
/// `monitors.<type>.<job>.sources.<name>`.
pub fn job_source_key(monitor_type: &str, job: JobName, source_name: &str) -> String {
    format!("monitors.{monitor_type}.{job}.sources.{source_name}")
}

/// Full reference key of a surrounding source: `<phase>.<name>`.
pub fn surrounding_source_key(phase: SurroundingPhase, source_name: &str) -> String {
    format!("{phase}.{source_name}")
}

/// How a collect job distributes rows onto monitors.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CollectMode {
    /// Run sources once; match each result row to a monitor via key columns.
    #[default]
    AllAtOnce,
    /// Re-run sources per monitor with `${attribute::...}` substitution.
    PerMonitor,
}

/// Detection section: ordered criteria, all of which must pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub criteria: Vec<Criterion>,
}

/// Mapping of a result table's columns onto monitor attributes and metrics.
///
/// Values may be literals, `$N` column references, or conversion helper
/// calls; `source` references the table the mapping reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mapping {
    /// Reference (`${source::...}`) or inline literal naming the input table.
    pub source: String,

    /// Attribute name → mapped value.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    /// Metric key (may carry `{attr="v"}` parts) → mapped value.
    #[serde(default)]
    pub metrics: BTreeMap<String, String>,
}

/// One acquisition job: sources plus the mapping applied to the final table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub sources: Vec<Source>,

    /// Optional explicit ordering hint over source names; sources it omits
    /// keep declaration order after the hinted ones.
    #[serde(default)]
    pub execution_order: Vec<String>,

    pub mapping: Mapping,
}

/// Collect job: a [`Job`] plus its distribution mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectJob {
    #[serde(flatten)]
    pub job: Job,

    #[serde(default)]
    pub mode: CollectMode,
}

/// Jobs declared for one monitor type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorJobs {
    pub monitor_type: String,

    /// Attributes whose values identify one instance; monitor ids derive
    /// from them (default: `[id]`).
    #[serde(default = "default_keys")]
    pub keys: Vec<String>,

    #[serde(default)]
    pub discovery: Option<Job>,

    #[serde(default)]
    pub collect: Option<CollectJob>,

    #[serde(default)]
    pub simple: Option<Job>,
}

/// One connector document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connector {
    pub connector_id: String,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub detection: Detection,

    /// Declared metric definitions (unit, type, state set).
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricDefinition>,

    /// Sources run before detection criteria each cycle.
    #[serde(default)]
    pub pre: Vec<Source>,

    /// Sources run once before all monitor jobs of a cycle.
    #[serde(default)]
    pub before_all: Vec<Source>,

    /// Sources run once after all monitor jobs of a cycle.
    #[serde(default)]
    pub after_all: Vec<Source>,

    #[serde(default)]
    pub monitors: Vec<MonitorJobs>,
}

impl Connector {
    /// Jobs declared for a monitor type, if any.
    pub fn monitor_jobs(&self, monitor_type: &str) -> Option<&MonitorJobs> {
        self.monitors
            .iter()
            .find(|jobs| jobs.monitor_type == monitor_type)
    }

    /// Validate structural invariants a loaded connector must satisfy.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` naming the offending element.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connector_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "connector_id cannot be empty".to_string(),
            ));
        }

        let mut seen_types = BTreeSet::new();
        for jobs in &self.monitors {
            if jobs.monitor_type.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "connector '{}': monitor_type cannot be empty",
                    self.connector_id
                )));
            }
            if !seen_types.insert(&jobs.monitor_type) {
                return Err(ConfigError::ValidationError(format!(
                    "connector '{}': duplicate monitor type '{}'",
                    self.connector_id, jobs.monitor_type
                )));
            }
            if jobs.keys.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "connector '{}': monitor '{}' must declare at least one key",
                    self.connector_id, jobs.monitor_type
                )));
            }
            if let Some(job) = &jobs.discovery {
                self.validate_job(&jobs.monitor_type, JobName::Discovery, job)?;
            }
            if let Some(collect) = &jobs.collect {
                self.validate_job(&jobs.monitor_type, JobName::Collect, &collect.job)?;
            }
            if let Some(job) = &jobs.simple {
                self.validate_job(&jobs.monitor_type, JobName::Simple, job)?;
            }
        }

        for (phase, sources) in [
            (SurroundingPhase::Pre, &self.pre),
            (SurroundingPhase::BeforeAll, &self.before_all),
            (SurroundingPhase::AfterAll, &self.after_all),
        ] {
            Self::validate_unique_source_names(&self.connector_id, phase.as_ref(), sources)?;
        }

        Ok(())
    }

    fn validate_job(&self, monitor_type: &str, job: JobName, def: &Job) -> Result<(), ConfigError> {
        let context = format!("monitors.{monitor_type}.{job}");
        Self::validate_unique_source_names(&self.connector_id, &context, &def.sources)?;

        if def.mapping.source.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "connector '{}': {context} mapping source cannot be empty",
                self.connector_id
            )));
        }
        for hinted in &def.execution_order {
            if !def.sources.iter().any(|s| &s.name == hinted) {
                return Err(ConfigError::ValidationError(format!(
                    "connector '{}': {context} execution_order names unknown source '{hinted}'",
                    self.connector_id
                )));
            }
        }
        Ok(())
    }

    fn validate_unique_source_names(
        connector_id: &str,
        context: &str,
        sources: &[Source],
    ) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for source in sources {
            if source.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "connector '{connector_id}': {context} contains a source with an empty name"
                )));
            }
            if !seen.insert(&source.name) {
                return Err(ConfigError::ValidationError(format!(
                    "connector '{connector_id}': {context} declares source '{}' twice",
                    source.name
                )));
            }
        }
        Ok(())
    }
}
