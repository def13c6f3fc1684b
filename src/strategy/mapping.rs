//! Mapping interpretation: result-table columns onto attributes and metrics.
//!
//! A job's mapping turns each row of its final source table into monitor
//! attributes and metric values. A mapping value is a literal, a `$N`
//! column reference (1-based, also valid embedded inside a literal), or a
//! conversion helper call wrapping either. Interpretation never fails: an
//! out-of-range column or a non-numeric conversion input degrades to the
//! empty string, which downstream metric collection ignores.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::connector::Mapping;
use crate::strategy::reference::as_source_ref;
use crate::strategy::table::SourceTable;
use crate::telemetry::TelemetryStore;

/// Interprets one mapping against one source-table row.
#[derive(Debug, Clone, Copy)]
pub struct MappingInterpreter<'a> {
    mapping: &'a Mapping,
    row: &'a [String],
}

impl<'a> MappingInterpreter<'a> {
    pub fn new(mapping: &'a Mapping, row: &'a [String]) -> Self {
        Self { mapping, row }
    }

    /// Interpreted attribute values, keyed by attribute name.
    pub fn attributes(&self) -> BTreeMap<String, String> {
        self.mapping
            .attributes
            .iter()
            .map(|(name, expr)| (name.clone(), interpret_value(expr, self.row)))
            .collect()
    }

    /// Interpreted metric values, keyed by metric key.
    pub fn metrics(&self) -> BTreeMap<String, String> {
        self.mapping
            .metrics
            .iter()
            .map(|(key, expr)| (key.clone(), interpret_value(expr, self.row)))
            .collect()
    }
}

/// Interpret one mapping value expression against a row.
pub fn interpret_value(expr: &str, row: &[String]) -> String {
    let expr = expr.trim();

    if let Some((function, inner)) = split_conversion(expr) {
        let input = interpret_value(inner, row);
        return apply_conversion(function, &input);
    }

    replace_column_refs(expr, row)
}

/// `$N` tokens (1-based) replaced by the row's cells; out-of-range columns
/// become empty.
fn replace_column_refs(expr: &str, row: &[String]) -> String {
    static COLUMN_REF: OnceLock<Regex> = OnceLock::new();
    let pattern = COLUMN_REF
        .get_or_init(|| Regex::new(r"\$(\d+)").expect("failed to compile column ref regex"));

    pattern
        .replace_all(expr, |caps: &regex::Captures| {
            let index: usize = caps[1].parse().unwrap_or(0);
            if index == 0 {
                return String::new();
            }
            row.get(index - 1).map(|cell| cell.trim().to_string()).unwrap_or_default()
        })
        .into_owned()
}

/// Split `helper(inner)` into its parts, case-insensitively.
fn split_conversion(expr: &str) -> Option<(Conversion, &str)> {
    static CONVERSION: OnceLock<Regex> = OnceLock::new();
    let pattern = CONVERSION.get_or_init(|| {
        Regex::new(r"(?i)^(percent2ratio|megahertz2hertz|mebibytes2bytes|boolean)\((.*)\)$")
            .expect("failed to compile conversion regex")
    });

    let caps = pattern.captures(expr)?;
    let function = match caps.get(1)?.as_str().to_ascii_lowercase().as_str() {
        "percent2ratio" => Conversion::Percent2Ratio,
        "megahertz2hertz" => Conversion::Megahertz2Hertz,
        "mebibytes2bytes" => Conversion::Mebibytes2Bytes,
        "boolean" => Conversion::Boolean,
        _ => return None,
    };
    Some((function, caps.get(2)?.as_str()))
}

#[derive(Debug, Clone, Copy)]
enum Conversion {
    Percent2Ratio,
    Megahertz2Hertz,
    Mebibytes2Bytes,
    Boolean,
}

fn apply_conversion(function: Conversion, input: &str) -> String {
    let input = input.trim();
    if input.is_empty() {
        return String::new();
    }

    if let Conversion::Boolean = function {
        let truthy = matches!(
            input.to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "ok" | "on"
        );
        return if truthy { "1" } else { "0" }.to_string();
    }

    let Ok(value) = input.parse::<f64>() else {
        debug!(input, "non-numeric conversion input, value dropped");
        return String::new();
    };
    let converted = match function {
        Conversion::Percent2Ratio => value * 0.01,
        Conversion::Megahertz2Hertz => value * 1_000_000.0,
        Conversion::Mebibytes2Bytes => value * 1_048_576.0,
        Conversion::Boolean => unreachable!(),
    };
    format_number(converted)
}

/// Integral results print without a fractional part so `50 MiB` maps to
/// `52428800`, not `52428800.0`.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

/// Resolve a mapping's `source` field to its table.
///
/// A `${source::...}` reference reads the connector namespace; anything else
/// parses as an inline delimited literal.
pub async fn resolve_mapping_table(
    store: &TelemetryStore,
    connector_id: &str,
    operand: &str,
) -> SourceTable {
    if let Some(key) = as_source_ref(operand) {
        let namespace = store.namespace(connector_id).await;
        match namespace.table(key).await {
            Some(table) => table,
            None => {
                debug!(
                    connector_id,
                    reference = key,
                    "Mapping source table not present, using empty table"
                );
                SourceTable::new()
            }
        }
    } else {
        SourceTable::from_inline(operand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    // ===== column references =====

    #[test]
    fn test_column_reference() {
        let row = row(&["disk-0", "ready", "80"]);
        assert_eq!(interpret_value("$1", &row), "disk-0");
        assert_eq!(interpret_value("$3", &row), "80");
    }

    #[test]
    fn test_out_of_range_column_is_empty() {
        let row = row(&["only"]);
        assert_eq!(interpret_value("$5", &row), "");
        assert_eq!(interpret_value("$0", &row), "");
    }

    #[test]
    fn test_embedded_column_reference() {
        let row = row(&["0", "nvme"]);
        assert_eq!(interpret_value("$2-bay-$1", &row), "nvme-bay-0");
    }

    #[test]
    fn test_literal_passthrough() {
        assert_eq!(interpret_value("physical_disk", &row(&["a"])), "physical_disk");
    }

    // ===== conversion helpers =====

    #[test]
    fn test_percent2ratio() {
        let row = row(&["50"]);
        assert_eq!(interpret_value("percent2ratio($1)", &row), "0.5");
        assert_eq!(interpret_value("percent2ratio(100)", &row), "1");
    }

    #[test]
    fn test_megahertz2hertz() {
        let row = row(&["2500"]);
        assert_eq!(interpret_value("megahertz2hertz($1)", &row), "2500000000");
    }

    #[test]
    fn test_mebibytes2bytes() {
        let row = row(&["50"]);
        assert_eq!(interpret_value("mebibytes2bytes($1)", &row), "52428800");
    }

    #[test]
    fn test_boolean_truthiness() {
        let row = row(&["TRUE", "off"]);
        assert_eq!(interpret_value("boolean($1)", &row), "1");
        assert_eq!(interpret_value("boolean($2)", &row), "0");
        assert_eq!(interpret_value("boolean(yes)", &row), "1");
    }

    #[test]
    fn test_conversion_names_case_insensitive() {
        let row = row(&["1024"]);
        assert_eq!(interpret_value("MebiBytes2Bytes($1)", &row), "1073741824");
    }

    #[test]
    fn test_non_numeric_conversion_input_drops_value() {
        let row = row(&["n/a"]);
        assert_eq!(interpret_value("percent2ratio($1)", &row), "");
        assert_eq!(interpret_value("megahertz2hertz()", &row), "");
    }

    // ===== mapping interpretation =====

    #[test]
    fn test_interpreter_resolves_attributes_and_metrics() {
        let mapping = Mapping {
            source: "${source::monitors.disk.discovery.sources.list}".to_string(),
            attributes: [
                ("id".to_string(), "$1".to_string()),
                ("vendor".to_string(), "acme".to_string()),
            ]
            .into(),
            metrics: [("hw.disk.size".to_string(), "mebibytes2bytes($2)".to_string())].into(),
        };
        let row = row(&["disk-0", "512"]);
        let interpreter = MappingInterpreter::new(&mapping, &row);

        let attributes = interpreter.attributes();
        assert_eq!(attributes["id"], "disk-0");
        assert_eq!(attributes["vendor"], "acme");

        let metrics = interpreter.metrics();
        assert_eq!(metrics["hw.disk.size"], "536870912");
    }

    // ===== mapping table resolution =====

    #[tokio::test]
    async fn test_resolve_inline_literal() {
        let store = TelemetryStore::new(crate::config::HostConfig::new("server-01"));
        let table = resolve_mapping_table(&store, "c1", "a;b;\nc;d;").await;
        assert_eq!(table.rows.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_reference_reads_namespace() {
        let store = TelemetryStore::new(crate::config::HostConfig::new("server-01"));
        let namespace = store.namespace("c1").await;
        namespace
            .insert_table(
                "monitors.disk.discovery.sources.list",
                SourceTable::from_rows(vec![row(&["disk-0"])]),
            )
            .await;

        let table = resolve_mapping_table(
            &store,
            "c1",
            "${source::monitors.disk.discovery.sources.list}",
        )
        .await;
        assert_eq!(table.rows, vec![row(&["disk-0"])]);

        let missing =
            resolve_mapping_table(&store, "c1", "${source::monitors.disk.collect.sources.x}").await;
        assert!(missing.is_empty());
    }
}
