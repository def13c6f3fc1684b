//! Connector Model
//!
//! Immutable, already-validated descriptions of how to detect one class of
//! entity and which acquisition jobs to run per monitor type. Connectors are
//! deserialized from YAML documents, validated once at load time, and only
//! read during execution.
//!
//! # Components
//!
//! - [`Connector`] / [`MonitorJobs`] / [`Job`] / [`Mapping`]: the document model
//! - [`Source`] / [`SourceKind`]: data-acquisition steps (closed variant set)
//! - [`Compute`]: tabular transformation steps (closed variant set)
//! - [`Criterion`] / [`CriterionKind`]: detection predicates (closed variant set)
//! - [`MetricDefinition`]: declared metric units, types and state sets
//! - [`ConnectorStore`]: loaded connectors keyed by id

mod compute;
mod criterion;
mod metric_def;
mod model;
mod source;
mod store;

pub use compute::{Compute, ConversionType};
pub use criterion::{Criterion, CriterionKind, CriterionType};
pub use metric_def::{MetricDefinition, MetricType, lookup_definition};
pub use model::{
    CollectJob, CollectMode, Connector, Detection, Job, JobName, Mapping, MonitorJobs,
    SurroundingPhase, job_source_key, surrounding_source_key,
};
pub use source::{HttpMethod, ResultContent, Source, SourceKind, SourceType};
pub use store::ConnectorStore;
