//! Compute pipeline: ordered tabular transformations over a [`SourceTable`].
//!
//! Steps run strictly in declared order. A step whose precondition fails (out
//! of range column, empty table, malformed operand) is skipped and logged at
//! debug level, leaving the table unchanged for that step; the pipeline never
//! aborts. Arithmetic and substring operands accept per-row column references
//! written `$N`.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};
use serde_json_path::JsonPath;
use tracing::debug;

use crate::connector::{Compute, ConversionType};
use crate::strategy::table::{DEFAULT_COLUMN_SEPARATOR, SourceTable};

fn column_reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*\$(\d+)\s*$").expect("column reference pattern"))
}

/// 1-based column index when `value` is a `$N` reference.
fn column_reference(value: &str) -> Option<usize> {
    column_reference_pattern()
        .captures(value)
        .and_then(|caps| caps[1].parse().ok())
}

/// Operand of a concat, substring or arithmetic step.
enum Operand {
    Column(usize),
    Literal(String),
}

impl Operand {
    fn parse(value: &str) -> Self {
        match column_reference(value) {
            Some(column) => Operand::Column(column),
            None => Operand::Literal(value.to_string()),
        }
    }

    /// Per-row value; `None` when a referenced column is absent from the row.
    fn resolve<'a>(&'a self, row: &'a [String]) -> Option<&'a str> {
        match self {
            Operand::Column(column) => row.get(column - 1).map(String::as_str),
            Operand::Literal(text) => Some(text),
        }
    }
}

/// Apply a compute chain to a table, in order.
///
/// `source_key` only labels log lines.
pub fn apply_computes(mut table: SourceTable, computes: &[Compute], source_key: &str) -> SourceTable {
    for (position, compute) in computes.iter().enumerate() {
        match apply_step(&table, compute) {
            Ok(next) => table = next,
            Err(reason) => {
                debug!(
                    source = source_key,
                    step = compute.name(),
                    position = position + 1,
                    reason,
                    "Compute step skipped"
                );
            }
        }
    }
    table
}

/// Apply one step, producing the transformed table or a skip reason.
fn apply_step(table: &SourceTable, compute: &Compute) -> Result<SourceTable, String> {
    match compute {
        Compute::LeftConcat { column, value } => concat(table, *column, value, true),
        Compute::RightConcat { column, value } => concat(table, *column, value, false),
        Compute::Substring {
            column,
            start,
            length,
        } => substring(table, *column, start, length),
        Compute::Replace {
            column,
            search,
            replace_by,
        } => replace(table, *column, search, replace_by),
        Compute::KeepColumns { column_numbers } => keep_columns(table, column_numbers),
        Compute::KeepOnlyMatchingLines {
            column,
            regexp,
            value_list,
        } => matching_lines(table, *column, regexp.as_deref(), value_list.as_deref(), true),
        Compute::ExcludeMatchingLines {
            column,
            regexp,
            value_list,
        } => matching_lines(table, *column, regexp.as_deref(), value_list.as_deref(), false),
        Compute::Add { column, value } => arithmetic(table, *column, value, |a, b| Some(a + b)),
        Compute::Subtract { column, value } => arithmetic(table, *column, value, |a, b| Some(a - b)),
        Compute::Multiply { column, value } => arithmetic(table, *column, value, |a, b| Some(a * b)),
        Compute::Divide { column, value } => {
            arithmetic(table, *column, value, |a, b| (b != 0.0).then(|| a / b))
        }
        Compute::DuplicateColumn { column } => duplicate_column(table, *column),
        Compute::Translate {
            column,
            translation_table,
        } => translate(table, *column, translation_table),
        Compute::Convert { column, conversion } => convert(table, *column, *conversion),
        Compute::Json2Csv {
            entry_key,
            properties,
            separator,
        } => json_to_csv(table, entry_key, properties, *separator),
        Compute::ExtractPropertyFromWbemPath { column, property } => {
            extract_wbem_property(table, *column, property)
        }
    }
}

/// Bounds-check a 1-based column index against the first row's width.
fn check_column(table: &SourceTable, column: usize) -> Result<(), String> {
    let width = table.column_count();
    if column == 0 || column > width {
        return Err(format!("column {column} out of range for width {width}"));
    }
    Ok(())
}

// =============================================================================
// Concatenation
// =============================================================================

fn concat(table: &SourceTable, column: usize, value: &str, left: bool) -> Result<SourceTable, String> {
    check_column(table, column)?;
    let operand = Operand::parse(value);

    let mut next = table.clone();
    for row in &mut next.rows {
        let Some(resolved) = operand.resolve(row).map(str::to_string) else {
            continue;
        };
        let Some(cell) = row.get_mut(column - 1) else {
            continue;
        };
        if left {
            *cell = format!("{resolved}{cell}");
        } else {
            *cell = format!("{cell}{resolved}");
        }
    }

    // A literal carrying the column separator legitimately creates new
    // columns, so the whole table is re-tokenized.
    if let Operand::Literal(text) = &operand {
        if text.contains(DEFAULT_COLUMN_SEPARATOR) {
            next.rows = retokenize(&next.rows);
        }
    }
    Ok(next)
}

fn retokenize(rows: &[Vec<String>]) -> Vec<Vec<String>> {
    let csv = SourceTable::rows_to_csv(rows, DEFAULT_COLUMN_SEPARATOR, false);
    SourceTable::csv_to_rows(&csv, DEFAULT_COLUMN_SEPARATOR)
}

// =============================================================================
// Substring / replace
// =============================================================================

fn substring(
    table: &SourceTable,
    column: usize,
    start: &str,
    length: &str,
) -> Result<SourceTable, String> {
    check_column(table, column)?;
    let start = parse_numeric_operand(start)?;
    let length = parse_numeric_operand(length)?;

    let mut next = table.clone();
    for row in &mut next.rows {
        let Some(start) = resolve_usize(&start, row) else {
            continue;
        };
        let Some(length) = resolve_usize(&length, row) else {
            continue;
        };
        if start == 0 {
            continue;
        }
        if let Some(cell) = row.get_mut(column - 1) {
            *cell = cell.chars().skip(start - 1).take(length).collect();
        }
    }
    Ok(next)
}

fn resolve_usize(operand: &Operand, row: &[String]) -> Option<usize> {
    operand.resolve(row).and_then(|v| v.trim().parse().ok())
}

fn replace(
    table: &SourceTable,
    column: usize,
    search: &str,
    replace_by: &str,
) -> Result<SourceTable, String> {
    check_column(table, column)?;
    if search.is_empty() {
        return Err("empty search string".to_string());
    }
    let operand = Operand::parse(replace_by);

    let mut next = table.clone();
    for row in &mut next.rows {
        let Some(replacement) = operand.resolve(row).map(str::to_string) else {
            continue;
        };
        if let Some(cell) = row.get_mut(column - 1) {
            *cell = cell.replace(search, &replacement);
        }
    }

    if let Operand::Literal(text) = &operand {
        if text.contains(DEFAULT_COLUMN_SEPARATOR) {
            next.rows = retokenize(&next.rows);
        }
    }
    Ok(next)
}

// =============================================================================
// Column / row selection
// =============================================================================

fn keep_columns(table: &SourceTable, column_numbers: &[usize]) -> Result<SourceTable, String> {
    if column_numbers.is_empty() {
        return Err("no columns listed".to_string());
    }
    if column_numbers.contains(&0) {
        return Err("column numbers are 1-based".to_string());
    }
    if table.rows.is_empty() {
        return Err("empty table".to_string());
    }

    let mut next = table.clone();
    next.rows = table
        .rows
        .iter()
        .map(|row| {
            column_numbers
                .iter()
                .filter_map(|n| row.get(n - 1).cloned())
                .collect()
        })
        .collect();
    if !next.headers.is_empty() {
        next.headers = column_numbers
            .iter()
            .filter_map(|n| table.headers.get(n - 1).cloned())
            .collect();
    }
    Ok(next)
}

fn matching_lines(
    table: &SourceTable,
    column: usize,
    regexp: Option<&str>,
    value_list: Option<&str>,
    keep: bool,
) -> Result<SourceTable, String> {
    check_column(table, column)?;

    let matches: Box<dyn Fn(&str) -> bool> = if let Some(regexp) = regexp.filter(|r| !r.is_empty())
    {
        let pattern = RegexBuilder::new(regexp)
            .case_insensitive(true)
            .build()
            .map_err(|e| format!("invalid regexp: {e}"))?;
        Box::new(move |cell: &str| pattern.is_match(cell))
    } else if let Some(values) = value_list.filter(|v| !v.is_empty()) {
        let values: Vec<String> = values.split(',').map(|v| v.trim().to_lowercase()).collect();
        Box::new(move |cell: &str| values.contains(&cell.trim().to_lowercase()))
    } else {
        return Err("neither regexp nor value_list given".to_string());
    };

    let mut next = table.clone();
    next.rows = table
        .rows
        .iter()
        .filter(|row| {
            let matched = row.get(column - 1).is_some_and(|cell| matches(cell));
            matched == keep
        })
        .cloned()
        .collect();
    Ok(next)
}

// =============================================================================
// Arithmetic
// =============================================================================

fn parse_numeric_operand(value: &str) -> Result<Operand, String> {
    let operand = Operand::parse(value);
    if let Operand::Literal(text) = &operand {
        text.trim()
            .parse::<f64>()
            .map_err(|_| format!("operand '{text}' is neither numeric nor a column reference"))?;
    }
    Ok(operand)
}

fn arithmetic(
    table: &SourceTable,
    column: usize,
    value: &str,
    op: impl Fn(f64, f64) -> Option<f64>,
) -> Result<SourceTable, String> {
    check_column(table, column)?;
    let operand = parse_numeric_operand(value)?;

    let mut next = table.clone();
    for row in &mut next.rows {
        let Some(right) = operand.resolve(row).and_then(|v| v.trim().parse::<f64>().ok()) else {
            continue;
        };
        let Some(cell) = row.get_mut(column - 1) else {
            continue;
        };
        let Ok(left) = cell.trim().parse::<f64>() else {
            continue;
        };
        if let Some(result) = op(left, right) {
            *cell = result.to_string();
        }
    }
    Ok(next)
}

// =============================================================================
// Structure changes
// =============================================================================

fn duplicate_column(table: &SourceTable, column: usize) -> Result<SourceTable, String> {
    check_column(table, column)?;

    let mut next = table.clone();
    for row in &mut next.rows {
        if column <= row.len() {
            let cell = row[column - 1].clone();
            row.insert(column, cell);
        }
    }
    if column <= next.headers.len() {
        let header = next.headers[column - 1].clone();
        next.headers.insert(column, header);
    }
    Ok(next)
}

// =============================================================================
// Value mapping
// =============================================================================

fn translate(
    table: &SourceTable,
    column: usize,
    translations: &BTreeMap<String, String>,
) -> Result<SourceTable, String> {
    check_column(table, column)?;
    if translations.is_empty() {
        return Err("empty translation table".to_string());
    }

    let lookup: BTreeMap<String, &String> = translations
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v))
        .collect();
    let fallback = lookup.get("default");

    let mut next = table.clone();
    for row in &mut next.rows {
        if let Some(cell) = row.get_mut(column - 1) {
            if let Some(translated) = lookup.get(&cell.to_lowercase()).or(fallback) {
                *cell = (**translated).clone();
            }
        }
    }
    Ok(next)
}

fn convert(
    table: &SourceTable,
    column: usize,
    conversion: ConversionType,
) -> Result<SourceTable, String> {
    check_column(table, column)?;

    let mut next = table.clone();
    for row in &mut next.rows {
        if let Some(cell) = row.get_mut(column - 1) {
            let converted = match conversion {
                ConversionType::Hex2Dec => hex_to_dec(cell),
                ConversionType::Array2SimpleStatus => array_to_simple_status(cell),
            };
            if let Some(value) = converted {
                *cell = value;
            }
        }
    }
    Ok(next)
}

fn hex_to_dec(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(digits, 16).ok().map(|v| v.to_string())
}

/// Worst status among pipe-separated entries; ok < degraded < failed.
fn array_to_simple_status(cell: &str) -> Option<String> {
    cell.split('|')
        .filter_map(|entry| match entry.trim().to_lowercase().as_str() {
            "ok" => Some(0),
            "degraded" => Some(1),
            "failed" => Some(2),
            _ => None,
        })
        .max()
        .map(|worst| {
            match worst {
                0 => "ok",
                1 => "degraded",
                _ => "failed",
            }
            .to_string()
        })
}

// =============================================================================
// Structured payloads
// =============================================================================

/// Flatten a JSON payload into rows: one row per node the `entry_key`
/// JSONPath selects, cells = the node's normalized path then one per
/// property path.
fn json_to_csv(
    table: &SourceTable,
    entry_key: &str,
    properties: &[String],
    separator: char,
) -> Result<SourceTable, String> {
    let text = table
        .raw_text
        .as_deref()
        .ok_or_else(|| "no raw payload to flatten".to_string())?;
    let root: serde_json::Value =
        serde_json::from_str(text).map_err(|e| format!("invalid json payload: {e}"))?;
    let path = entry_key
        .parse::<JsonPath>()
        .map_err(|e| format!("invalid entry key '{entry_key}': {e}"))?;

    let rows: Vec<Vec<String>> = path
        .query_located(&root)
        .iter()
        .map(|entry| json_row(&entry.location().to_string(), entry.node(), properties))
        .collect();
    if rows.is_empty() {
        debug!(entry_key, "JSON entry key matched nothing");
    }

    let raw_text = SourceTable::rows_to_csv(&rows, separator, true);
    Ok(SourceTable {
        rows,
        headers: Vec::new(),
        raw_text: Some(raw_text),
    })
}

fn json_row(path: &str, node: &serde_json::Value, properties: &[String]) -> Vec<String> {
    let mut row = Vec::with_capacity(properties.len() + 1);
    row.push(path.to_string());
    for property in properties {
        let value = node.pointer(&normalize_pointer(property));
        row.push(value.map(json_cell).unwrap_or_default());
    }
    row
}

fn json_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn normalize_pointer(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Replace WBEM object paths with one property's value.
///
/// A path looks like `root/emc:EMC_DiskDrive.DeviceID="D1",Tag="abc"`; the
/// property name matches case-insensitively and quotes are stripped.
fn extract_wbem_property(
    table: &SourceTable,
    column: usize,
    property: &str,
) -> Result<SourceTable, String> {
    check_column(table, column)?;
    if property.trim().is_empty() {
        return Err("empty property name".to_string());
    }

    let mut next = table.clone();
    for row in &mut next.rows {
        if let Some(cell) = row.get_mut(column - 1) {
            if let Some(value) = wbem_path_property(cell, property) {
                *cell = value;
            }
        }
    }
    Ok(next)
}

fn wbem_path_property(path: &str, property: &str) -> Option<String> {
    for segment in path.split(',') {
        let (key, value) = segment.split_once('=')?;
        // The first segment may carry a class prefix: Class.Property=...
        let key = key.rsplit('.').next().unwrap_or(key).trim();
        if key.eq_ignore_ascii_case(property.trim()) {
            return Some(value.trim().trim_matches('"').to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(data: &[&[&str]]) -> SourceTable {
        SourceTable::from_rows(
            data.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    fn cells(table: &SourceTable) -> Vec<Vec<&str>> {
        table
            .rows
            .iter()
            .map(|r| r.iter().map(String::as_str).collect())
            .collect()
    }

    // ===== concatenation =====

    #[test]
    fn test_left_concat_literal() {
        let out = apply_computes(
            table(&[&["disk0", "40"]]),
            &[Compute::LeftConcat {
                column: 1,
                value: "dev-".to_string(),
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["dev-disk0", "40"]]);
    }

    #[test]
    fn test_left_concat_with_delimiter_reshapes_table() {
        let out = apply_computes(
            table(&[&["x"]]),
            &[Compute::LeftConcat {
                column: 1,
                value: "A;".to_string(),
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["A", "x"]]);
    }

    #[test]
    fn test_right_concat_column_reference() {
        let out = apply_computes(
            table(&[&["bay", "4"], &["slot", "7"]]),
            &[Compute::RightConcat {
                column: 1,
                value: "$2".to_string(),
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["bay4", "4"], vec!["slot7", "7"]]);
    }

    // ===== substring / replace =====

    #[test]
    fn test_substring_literal_operands() {
        let out = apply_computes(
            table(&[&["WDC-12345"]]),
            &[Compute::Substring {
                column: 1,
                start: "5".to_string(),
                length: "3".to_string(),
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["123"]]);
    }

    #[test]
    fn test_substring_length_from_column() {
        let out = apply_computes(
            table(&[&["abcdef", "2"], &["abcdef", "4"]]),
            &[Compute::Substring {
                column: 1,
                start: "1".to_string(),
                length: "$2".to_string(),
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["ab", "2"], vec!["abcd", "4"]]);
    }

    #[test]
    fn test_replace_literal() {
        let out = apply_computes(
            table(&[&["a-b-c"]]),
            &[Compute::Replace {
                column: 1,
                search: "-".to_string(),
                replace_by: "_".to_string(),
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["a_b_c"]]);
    }

    #[test]
    fn test_replace_with_delimiter_reshapes_table() {
        let out = apply_computes(
            table(&[&["a|b"]]),
            &[Compute::Replace {
                column: 1,
                search: "|".to_string(),
                replace_by: ";".to_string(),
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["a", "b"]]);
    }

    // ===== selection =====

    #[test]
    fn test_keep_columns_selects_and_reorders() {
        let out = apply_computes(
            table(&[&["a", "b", "c"], &["d", "e", "f"]]),
            &[Compute::KeepColumns {
                column_numbers: vec![3, 1],
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["c", "a"], vec!["f", "d"]]);
    }

    #[test]
    fn test_keep_only_matching_lines_regexp_is_case_insensitive() {
        let out = apply_computes(
            table(&[&["OK", "1"], &["failed", "2"], &["ok", "3"]]),
            &[Compute::KeepOnlyMatchingLines {
                column: 1,
                regexp: Some("^ok$".to_string()),
                value_list: None,
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["OK", "1"], vec!["ok", "3"]]);
    }

    #[test]
    fn test_exclude_matching_lines_by_value_list() {
        let out = apply_computes(
            table(&[&["cpu"], &["fan"], &["disk"]]),
            &[Compute::ExcludeMatchingLines {
                column: 1,
                regexp: None,
                value_list: Some("fan, psu".to_string()),
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["cpu"], vec!["disk"]]);
    }

    // ===== arithmetic =====

    #[test]
    fn test_multiply_by_literal() {
        let out = apply_computes(
            table(&[&["1.5"], &["2"]]),
            &[Compute::Multiply {
                column: 1,
                value: "1000".to_string(),
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["1500"], vec!["2000"]]);
    }

    #[test]
    fn test_divide_by_column_reference() {
        let out = apply_computes(
            table(&[&["100", "4"]]),
            &[Compute::Divide {
                column: 1,
                value: "$2".to_string(),
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["25", "4"]]);
    }

    #[test]
    fn test_divide_by_zero_leaves_row_unchanged() {
        let out = apply_computes(
            table(&[&["100", "0"], &["90", "3"]]),
            &[Compute::Divide {
                column: 1,
                value: "$2".to_string(),
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["100", "0"], vec!["30", "3"]]);
    }

    #[test]
    fn test_add_skips_non_numeric_rows() {
        let out = apply_computes(
            table(&[&["n/a"], &["5"]]),
            &[Compute::Add {
                column: 1,
                value: "10".to_string(),
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["n/a"], vec!["15"]]);
    }

    // ===== structure =====

    #[test]
    fn test_duplicate_column_inserts_after_original() {
        let out = apply_computes(
            table(&[&["a", "b"]]),
            &[Compute::DuplicateColumn { column: 1 }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["a", "a", "b"]]);
    }

    // ===== value mapping =====

    #[test]
    fn test_translate_case_insensitive_with_default() {
        let translations = BTreeMap::from([
            ("ok".to_string(), "0".to_string()),
            ("default".to_string(), "2".to_string()),
        ]);
        let out = apply_computes(
            table(&[&["OK"], &["mystery"]]),
            &[Compute::Translate {
                column: 1,
                translation_table: translations,
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["0"], vec!["2"]]);
    }

    #[test]
    fn test_convert_hex2dec() {
        let out = apply_computes(
            table(&[&["0x1A"], &["ff"], &["junk"]]),
            &[Compute::Convert {
                column: 1,
                conversion: ConversionType::Hex2Dec,
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["26"], vec!["255"], vec!["junk"]]);
    }

    #[test]
    fn test_convert_array_to_simple_status_keeps_worst() {
        let out = apply_computes(
            table(&[&["ok|OK|degraded"], &["ok"], &["ok|failed"]]),
            &[Compute::Convert {
                column: 1,
                conversion: ConversionType::Array2SimpleStatus,
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["degraded"], vec!["ok"], vec!["failed"]]);
    }

    // ===== structured payloads =====

    #[test]
    fn test_json2csv_flattens_matched_nodes() {
        let payload = r#"{"disks":[{"name":"sda","size":512},{"name":"sdb","size":1024}]}"#;
        let out = apply_computes(
            SourceTable::from_raw(payload),
            &[Compute::Json2Csv {
                entry_key: "$.disks[*]".to_string(),
                properties: vec!["name".to_string(), "size".to_string()],
                separator: ';',
            }],
            "t",
        );
        assert_eq!(
            cells(&out),
            vec![
                vec!["$['disks'][0]", "sda", "512"],
                vec!["$['disks'][1]", "sdb", "1024"],
            ]
        );
    }

    #[test]
    fn test_json2csv_unmatched_entry_key_yields_empty_table() {
        let out = apply_computes(
            SourceTable::from_raw(r#"{"a":1}"#),
            &[Compute::Json2Csv {
                entry_key: "$.missing[*]".to_string(),
                properties: vec![],
                separator: ';',
            }],
            "t",
        );
        assert!(out.rows.is_empty());
    }

    #[test]
    fn test_extract_property_from_wbem_path() {
        let out = apply_computes(
            table(&[&[r#"root/emc:EMC_Disk.CreationClassName="EMC_Disk",DeviceID="D7""#]]),
            &[Compute::ExtractPropertyFromWbemPath {
                column: 1,
                property: "deviceid".to_string(),
            }],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["D7"]]);
    }

    // ===== skip semantics =====

    #[test]
    fn test_out_of_range_column_is_a_no_op() {
        let input = table(&[&["a", "b"]]);
        let out = apply_computes(
            input.clone(),
            &[Compute::LeftConcat {
                column: 9,
                value: "x".to_string(),
            }],
            "t",
        );
        assert_eq!(out, input);
    }

    #[test]
    fn test_skipped_step_does_not_abort_the_pipeline() {
        let out = apply_computes(
            table(&[&["a"]]),
            &[
                Compute::Divide {
                    column: 5,
                    value: "2".to_string(),
                },
                Compute::RightConcat {
                    column: 1,
                    value: "!".to_string(),
                },
            ],
            "t",
        );
        assert_eq!(cells(&out), vec![vec!["a!"]]);
    }

    #[test]
    fn test_empty_table_skips_row_operations() {
        let out = apply_computes(
            SourceTable::new(),
            &[Compute::DuplicateColumn { column: 1 }],
            "t",
        );
        assert!(out.rows.is_empty());
    }
}
