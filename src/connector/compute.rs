//! Compute step definitions: ordered tabular transformations.
//!
//! Execution semantics live in [`crate::strategy::compute`]; this module only
//! models the closed variant set and its serialized form. Column indices are
//! 1-based everywhere, matching the connector document format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

fn default_json_separator() -> char {
    ';'
}

/// Value conversion applied by [`Compute::Convert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ConversionType {
    /// Hexadecimal cell value (with or without `0x`) to decimal.
    Hex2Dec,
    /// Pipe-joined status array to its worst single status.
    Array2SimpleStatus,
}

/// Closed set of tabular transformation steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Compute {
    /// Prepend a value to one column. The value may be a literal, a
    /// `Column(n)` reference, or an embedded table reference.
    LeftConcat { column: usize, value: String },

    /// Append a value to one column.
    RightConcat { column: usize, value: String },

    /// Keep `length` characters of one column starting at 1-based `start`.
    /// Both operands accept `Column(n)` references.
    Substring {
        column: usize,
        start: String,
        length: String,
    },

    /// Substring replacement within one column.
    Replace {
        column: usize,
        search: String,
        replace_by: String,
    },

    /// Keep only the listed 1-based columns, in the listed order.
    KeepColumns { column_numbers: Vec<usize> },

    /// Keep rows whose column matches the regexp or one of the listed values.
    KeepOnlyMatchingLines {
        column: usize,
        #[serde(default)]
        regexp: Option<String>,
        #[serde(default)]
        value_list: Option<String>,
    },

    /// Drop rows whose column matches the regexp or one of the listed values.
    ExcludeMatchingLines {
        column: usize,
        #[serde(default)]
        regexp: Option<String>,
        #[serde(default)]
        value_list: Option<String>,
    },

    /// Add an operand to a numeric column.
    Add { column: usize, value: String },

    /// Subtract an operand from a numeric column.
    Subtract { column: usize, value: String },

    /// Multiply a numeric column by an operand.
    Multiply { column: usize, value: String },

    /// Divide a numeric column by an operand. Division by zero skips the row.
    Divide { column: usize, value: String },

    /// Insert a duplicate of one column immediately after it.
    DuplicateColumn { column: usize },

    /// Map cell values through a translation table. Lookup is
    /// case-insensitive; a `default` entry catches unmatched values.
    Translate {
        column: usize,
        translation_table: BTreeMap<String, String>,
    },

    /// Convert cell values in place.
    Convert {
        column: usize,
        conversion: ConversionType,
    },

    /// Flatten a JSON payload into rows: one row per element under
    /// `entry_key`, one column per property path (preceded by the entry key).
    #[serde(rename = "json2csv")]
    Json2Csv {
        entry_key: String,
        #[serde(default)]
        properties: Vec<String>,
        #[serde(default = "default_json_separator")]
        separator: char,
    },

    /// Extract one `key=value` property from WBEM object paths.
    ExtractPropertyFromWbemPath { column: usize, property: String },
}

impl Compute {
    /// Step name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Compute::LeftConcat { .. } => "left_concat",
            Compute::RightConcat { .. } => "right_concat",
            Compute::Substring { .. } => "substring",
            Compute::Replace { .. } => "replace",
            Compute::KeepColumns { .. } => "keep_columns",
            Compute::KeepOnlyMatchingLines { .. } => "keep_only_matching_lines",
            Compute::ExcludeMatchingLines { .. } => "exclude_matching_lines",
            Compute::Add { .. } => "add",
            Compute::Subtract { .. } => "subtract",
            Compute::Multiply { .. } => "multiply",
            Compute::Divide { .. } => "divide",
            Compute::DuplicateColumn { .. } => "duplicate_column",
            Compute::Translate { .. } => "translate",
            Compute::Convert { .. } => "convert",
            Compute::Json2Csv { .. } => "json2csv",
            Compute::ExtractPropertyFromWbemPath { .. } => "extract_property_from_wbem_path",
        }
    }
}
