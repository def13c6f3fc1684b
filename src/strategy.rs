//! Strategy Layer
//!
//! Everything that executes connectors against a host: detection, discovery,
//! collect and the source pipeline they share. The [`Engine`] drives whole
//! cycles; the executors below it each own one phase.
//!
//! # Components
//!
//! - [`Engine`] / [`EngineError`]: cycle orchestration and store assembly
//! - [`DetectionExecutor`] / [`CriterionEvaluator`]: criteria testing
//! - [`DiscoveryExecutor`] / [`CollectExecutor`]: monitor jobs
//! - [`SurroundingExecutor`]: pre / before-all / after-all brackets
//! - [`SourceExecutor`] / [`apply_computes`]: the source pipeline
//! - [`MappingInterpreter`]: row-to-monitor value mapping
//! - [`SourceTable`]: the tabular currency every source produces

mod collect;
mod compute;
mod detection;
mod discovery;
mod engine;
mod guard;
mod mapping;
mod order;
mod reference;
mod source;
mod surrounding;
mod table;

pub use collect::CollectExecutor;
pub use compute::apply_computes;
pub use detection::{
    CONNECTOR_STATE_FAILED, CONNECTOR_STATE_OK, CONNECTOR_STATUS_METRIC, ConnectorTestResult,
    CriterionEvaluator, CriterionTestResult, DetectionExecutor, matches_expected_result,
};
pub use discovery::DiscoveryExecutor;
pub use engine::{Engine, EngineError, JOB_PRIORITY_ORDER, build_store};
pub use guard::run_serialized;
pub use mapping::{MappingInterpreter, interpret_value, resolve_mapping_table};
pub use order::{apply_execution_order, resolve_execution_waves, source_dependencies};
pub use reference::{
    as_source_ref, has_reference_tokens, replace_attribute_refs, replace_source_refs, source_refs,
};
pub use source::SourceExecutor;
pub use surrounding::SurroundingExecutor;
pub use table::{ALTERNATE_COLUMN_SEPARATOR, DEFAULT_COLUMN_SEPARATOR, SourceTable};
