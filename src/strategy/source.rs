//! Source execution: substitution, dispatch, computes, table storage.
//!
//! One [`SourceExecutor`] runs the sources of one connector against one
//! telemetry store. Per source the flow is: substitute reference tokens,
//! execute (engine-internal kinds directly, protocol kinds through the
//! extension registry, under the serialization guard when flagged), warn on
//! an empty result, apply the compute chain, and cache the final table in
//! the connector namespace. A failed source degrades to an empty table;
//! only a dependency cycle aborts the job.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::connector::{Compute, Source, SourceKind};
use crate::extension::ExtensionRegistry;
use crate::strategy::engine::EngineError;
use crate::strategy::guard::run_serialized;
use crate::strategy::order::{resolve_execution_waves, source_dependencies};
use crate::strategy::compute::apply_computes;
use crate::strategy::reference::{as_source_ref, replace_attribute_refs, replace_source_refs};
use crate::strategy::table::{DEFAULT_COLUMN_SEPARATOR, SourceTable};
use crate::telemetry::TelemetryStore;

/// Executes sources for one connector.
///
/// Cloning is cheap; per-monitor collect runs clone the executor with the
/// monitor's attributes attached.
#[derive(Debug, Clone)]
pub struct SourceExecutor {
    store: Arc<TelemetryStore>,
    registry: Arc<ExtensionRegistry>,
    connector_id: String,
    attributes: Option<BTreeMap<String, String>>,
}

impl SourceExecutor {
    /// Create an executor for one connector.
    pub fn new(
        store: Arc<TelemetryStore>,
        registry: Arc<ExtensionRegistry>,
        connector_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            connector_id: connector_id.into(),
            attributes: None,
        }
    }

    /// Attach monitor attributes for `${attribute::...}` substitution.
    pub fn with_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Run a keyed set of sources in dependency order.
    ///
    /// Sources within one wave run concurrently on spawned tasks, bounded by
    /// the host's concurrency cap; a sequential host runs everything in
    /// order.
    ///
    /// # Errors
    /// [`EngineError::DependencyCycle`] when the sources reference each other
    /// cyclically.
    pub async fn execute_job(&self, keyed_sources: &[(String, Source)]) -> Result<(), EngineError> {
        let borrowed: Vec<(String, &Source)> = keyed_sources
            .iter()
            .map(|(key, source)| (key.clone(), source))
            .collect();
        let waves = resolve_execution_waves(&borrowed)?;
        let by_key: BTreeMap<&str, &Source> = keyed_sources
            .iter()
            .map(|(key, source)| (key.as_str(), source))
            .collect();

        let host = self.store.host();
        let parallel = !host.sequential && host.max_concurrent_sources > 1;
        for wave in waves {
            if !parallel || wave.len() == 1 {
                for key in &wave {
                    if let Some(source) = by_key.get(key.as_str()) {
                        self.execute(key, source).await;
                    }
                }
                continue;
            }

            for chunk in wave.chunks(host.max_concurrent_sources) {
                let mut handles = Vec::with_capacity(chunk.len());
                for key in chunk {
                    let Some(source) = by_key.get(key.as_str()) else {
                        continue;
                    };
                    let executor = self.clone();
                    let key = key.clone();
                    let source = (*source).clone();
                    handles.push(tokio::spawn(async move {
                        executor.execute(&key, &source).await;
                    }));
                }
                for handle in handles {
                    if let Err(e) = handle.await {
                        warn!(
                            connector_id = %self.connector_id,
                            error = %e,
                            "Source task aborted"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Execute one source end to end and cache its final table under `key`.
    pub async fn execute(&self, key: &str, source: &Source) -> SourceTable {
        debug!(
            connector_id = %self.connector_id,
            source = key,
            kind = %source.kind.source_type(),
            "Executing source"
        );
        let prepared = self.prepare(source).await;
        let namespace = self.store.namespace(&self.connector_id).await;

        let body = async {
            if prepared.kind.is_internal() {
                self.execute_internal(key, &prepared.kind).await
            } else {
                self.dispatch(key, &prepared).await
            }
        };
        let raw = if prepared.force_serialization {
            run_serialized(
                &namespace,
                &self.connector_id,
                key,
                self.store.host().guard_timeout,
                SourceTable::new(),
                body,
            )
            .await
        } else {
            body.await
        };

        if raw.is_empty() {
            warn!(
                connector_id = %self.connector_id,
                source = key,
                "Source produced no data"
            );
        }

        let table = apply_computes(raw, &prepared.computes, key);
        namespace.insert_table(key, table.clone()).await;
        table
    }

    /// Substitute attribute and source reference tokens in every textual
    /// field of the source and its computes.
    ///
    /// Attribute references resolve first, then source references resolve to
    /// the referenced table's delimited serialization. Fields that name whole
    /// tables (copy/join/union operands, static values) keep their reference
    /// form; the executor resolves those against the namespace directly, so
    /// no serialization round trip is involved.
    async fn prepare(&self, source: &Source) -> Source {
        let refs = source_dependencies(source);
        if refs.is_empty() && self.attributes.is_none() {
            return source.clone();
        }

        let mut tables = BTreeMap::new();
        if !refs.is_empty() {
            let namespace = self.store.namespace(&self.connector_id).await;
            for key in refs {
                if let Some(table) = namespace.table(&key).await {
                    tables.insert(key, table.to_csv(DEFAULT_COLUMN_SEPARATOR, true));
                }
            }
        }

        Substitution {
            attributes: self.attributes.as_ref(),
            tables: &tables,
        }
        .source(source)
    }

    /// Protocol dispatch through the extension registry.
    async fn dispatch(&self, key: &str, source: &Source) -> SourceTable {
        let source_type = source.kind.source_type();
        let Some(extension) = self.registry.extension_for_source(source_type) else {
            warn!(
                connector_id = %self.connector_id,
                source = key,
                kind = %source_type,
                "No extension supports this source kind"
            );
            return SourceTable::new();
        };
        let Some(config) = self.store.find_protocol_config(extension.protocol()) else {
            warn!(
                connector_id = %self.connector_id,
                source = key,
                protocol = extension.protocol(),
                "No protocol configuration for this source"
            );
            return SourceTable::new();
        };

        match extension
            .process_source(source, &self.connector_id, config.as_ref(), &self.store)
            .await
        {
            Ok(table) => table,
            Err(e) => {
                warn!(
                    connector_id = %self.connector_id,
                    source = key,
                    error = %e,
                    "Source execution failed"
                );
                SourceTable::new()
            }
        }
    }

    /// Kinds the engine executes without a protocol client.
    async fn execute_internal(&self, key: &str, kind: &SourceKind) -> SourceTable {
        match kind {
            SourceKind::Static { value } => self.resolve_table_operand(value).await,
            SourceKind::Copy { from } => self.resolve_table_operand(from).await,
            SourceKind::TableJoin {
                left_table,
                right_table,
                left_key_column,
                right_key_column,
                default_right_line,
            } => {
                let left = self.resolve_table_operand(left_table).await;
                let right = self.resolve_table_operand(right_table).await;
                join_tables(
                    &left,
                    &right,
                    *left_key_column,
                    *right_key_column,
                    default_right_line.as_deref(),
                )
            }
            SourceKind::TableUnion { tables } => {
                let mut union = SourceTable::new();
                for operand in tables {
                    let table = self.resolve_table_operand(operand).await;
                    if union.headers.is_empty() {
                        union.headers = table.headers;
                    }
                    union.rows.extend(table.rows);
                }
                union
            }
            other => {
                warn!(
                    source = key,
                    kind = %other.source_type(),
                    "Source kind is not engine-internal"
                );
                SourceTable::new()
            }
        }
    }

    /// A table operand is either a `${source::...}` reference or an inline
    /// delimited literal.
    async fn resolve_table_operand(&self, operand: &str) -> SourceTable {
        if let Some(key) = as_source_ref(operand) {
            let namespace = self.store.namespace(&self.connector_id).await;
            match namespace.table(key).await {
                Some(table) => table,
                None => {
                    debug!(
                        connector_id = %self.connector_id,
                        reference = key,
                        "Referenced table not present, using empty table"
                    );
                    SourceTable::new()
                }
            }
        } else {
            SourceTable::from_inline(operand)
        }
    }
}

/// Join two tables on 1-based key columns, case-insensitively.
///
/// Each left row gains the first matching right row's cells; without a match
/// the `default_right_line` cells are appended, or the row is dropped when no
/// default is given.
fn join_tables(
    left: &SourceTable,
    right: &SourceTable,
    left_key: usize,
    right_key: usize,
    default_right_line: Option<&str>,
) -> SourceTable {
    if left_key == 0 || right_key == 0 {
        warn!("Table join key columns are 1-based");
        return SourceTable::new();
    }

    let mut lookup: HashMap<String, &Vec<String>> = HashMap::new();
    for row in &right.rows {
        if let Some(cell) = row.get(right_key - 1) {
            lookup.entry(cell.trim().to_lowercase()).or_insert(row);
        }
    }
    let default_cells: Option<Vec<String>> = default_right_line
        .map(|line| SourceTable::line_to_cells(line, DEFAULT_COLUMN_SEPARATOR));

    let mut rows = Vec::new();
    for row in &left.rows {
        let matched = row
            .get(left_key - 1)
            .and_then(|cell| lookup.get(&cell.trim().to_lowercase()));
        if let Some(right_row) = matched {
            rows.push(row.iter().chain(right_row.iter()).cloned().collect());
        } else if let Some(default) = &default_cells {
            rows.push(row.iter().chain(default.iter()).cloned().collect());
        }
    }
    SourceTable::from_rows(rows)
}

/// Token substitution over a source definition.
struct Substitution<'a> {
    attributes: Option<&'a BTreeMap<String, String>>,
    tables: &'a BTreeMap<String, String>,
}

impl Substitution<'_> {
    /// Attribute references only; table-operand fields keep reference form.
    fn operand(&self, text: &str) -> String {
        match self.attributes {
            Some(attributes) => replace_attribute_refs(text, attributes),
            None => text.to_string(),
        }
    }

    /// Attribute references, then source references to serialized tables.
    fn full(&self, text: &str) -> String {
        let text = self.operand(text);
        replace_source_refs(&text, |key| self.tables.get(key).cloned())
    }

    fn full_opt(&self, text: &Option<String>) -> Option<String> {
        text.as_ref().map(|t| self.full(t))
    }

    fn source(&self, source: &Source) -> Source {
        let kind = match &source.kind {
            SourceKind::SnmpGet { oid } => SourceKind::SnmpGet {
                oid: self.full(oid),
            },
            SourceKind::SnmpTable {
                oid,
                select_columns,
            } => SourceKind::SnmpTable {
                oid: self.full(oid),
                select_columns: select_columns.clone(),
            },
            SourceKind::SnmpGetNext { oid } => SourceKind::SnmpGetNext {
                oid: self.full(oid),
            },
            SourceKind::Wmi { query, namespace } => SourceKind::Wmi {
                query: self.full(query),
                namespace: self.operand(namespace),
            },
            SourceKind::Http {
                path,
                method,
                header,
                body,
                result_content,
            } => SourceKind::Http {
                path: self.full(path),
                method: *method,
                header: self.full_opt(header),
                body: self.full_opt(body),
                result_content: *result_content,
            },
            SourceKind::CommandLine {
                command_line,
                execute_locally,
                exclude_regex,
                keep_only_regex,
                separators,
                select_columns,
            } => SourceKind::CommandLine {
                command_line: self.full(command_line),
                execute_locally: *execute_locally,
                exclude_regex: exclude_regex.as_ref().map(|r| self.operand(r)),
                keep_only_regex: keep_only_regex.as_ref().map(|r| self.operand(r)),
                separators: separators.clone(),
                select_columns: select_columns.clone(),
            },
            SourceKind::Jmx {
                object_name,
                attributes,
                key_properties,
            } => SourceKind::Jmx {
                object_name: self.full(object_name),
                attributes: attributes.clone(),
                key_properties: key_properties.clone(),
            },
            SourceKind::Sql { query } => SourceKind::Sql {
                query: self.full(query),
            },
            SourceKind::Awk {
                script,
                input,
                keep_only_regex,
                separators,
                select_columns,
            } => SourceKind::Awk {
                script: self.full(script),
                input: self.full_opt(input),
                keep_only_regex: keep_only_regex.as_ref().map(|r| self.operand(r)),
                separators: separators.clone(),
                select_columns: select_columns.clone(),
            },
            SourceKind::Static { value } => SourceKind::Static {
                value: self.operand(value),
            },
            SourceKind::Copy { from } => SourceKind::Copy {
                from: self.operand(from),
            },
            SourceKind::TableJoin {
                left_table,
                right_table,
                left_key_column,
                right_key_column,
                default_right_line,
            } => SourceKind::TableJoin {
                left_table: self.operand(left_table),
                right_table: self.operand(right_table),
                left_key_column: *left_key_column,
                right_key_column: *right_key_column,
                default_right_line: default_right_line.as_ref().map(|l| self.operand(l)),
            },
            SourceKind::TableUnion { tables } => SourceKind::TableUnion {
                tables: tables.iter().map(|t| self.operand(t)).collect(),
            },
        };

        Source {
            name: source.name.clone(),
            computes: source.computes.iter().map(|c| self.compute(c)).collect(),
            force_serialization: source.force_serialization,
            kind,
        }
    }

    fn compute(&self, compute: &Compute) -> Compute {
        match compute {
            Compute::LeftConcat { column, value } => Compute::LeftConcat {
                column: *column,
                value: self.full(value),
            },
            Compute::RightConcat { column, value } => Compute::RightConcat {
                column: *column,
                value: self.full(value),
            },
            Compute::Substring {
                column,
                start,
                length,
            } => Compute::Substring {
                column: *column,
                start: self.full(start),
                length: self.full(length),
            },
            Compute::Replace {
                column,
                search,
                replace_by,
            } => Compute::Replace {
                column: *column,
                search: self.full(search),
                replace_by: self.full(replace_by),
            },
            Compute::KeepOnlyMatchingLines {
                column,
                regexp,
                value_list,
            } => Compute::KeepOnlyMatchingLines {
                column: *column,
                regexp: regexp.as_ref().map(|r| self.operand(r)),
                value_list: self.full_opt(value_list),
            },
            Compute::ExcludeMatchingLines {
                column,
                regexp,
                value_list,
            } => Compute::ExcludeMatchingLines {
                column: *column,
                regexp: regexp.as_ref().map(|r| self.operand(r)),
                value_list: self.full_opt(value_list),
            },
            Compute::Add { column, value } => Compute::Add {
                column: *column,
                value: self.full(value),
            },
            Compute::Subtract { column, value } => Compute::Subtract {
                column: *column,
                value: self.full(value),
            },
            Compute::Multiply { column, value } => Compute::Multiply {
                column: *column,
                value: self.full(value),
            },
            Compute::Divide { column, value } => Compute::Divide {
                column: *column,
                value: self.full(value),
            },
            Compute::Json2Csv {
                entry_key,
                properties,
                separator,
            } => Compute::Json2Csv {
                entry_key: self.operand(entry_key),
                properties: properties.iter().map(|p| self.operand(p)).collect(),
                separator: *separator,
            },
            Compute::ExtractPropertyFromWbemPath { column, property } => {
                Compute::ExtractPropertyFromWbemPath {
                    column: *column,
                    property: self.operand(property),
                }
            }
            unchanged @ (Compute::KeepColumns { .. }
            | Compute::DuplicateColumn { .. }
            | Compute::Translate { .. }
            | Compute::Convert { .. }) => unchanged.clone(),
        }
    }
}
