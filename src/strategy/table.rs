//! Tabular intermediate representation shared by every pipeline stage.
//!
//! Every source execution produces a [`SourceTable`]; every compute step
//! transforms one. The table keeps two convertible views: a list of rows and
//! a delimited text serialization. Converting rows to text and back is
//! lossless as long as no cell contains the column separator.

use serde::{Deserialize, Serialize};

/// Default column separator for the delimited serialization.
pub const DEFAULT_COLUMN_SEPARATOR: char = ';';

/// Replacement used for separator characters embedded in cell values when a
/// serialization is asked to keep the column count stable.
pub const ALTERNATE_COLUMN_SEPARATOR: char = ',';

/// Tabular result of one source execution.
///
/// `rows` is always present once the table is built (it may be empty);
/// `raw_text` holds the unparsed payload for sources whose protocol returns
/// plain text rather than rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTable {
    /// Ordered rows of ordered string cells.
    #[serde(default)]
    pub rows: Vec<Vec<String>>,

    /// Optional column headers, in column order.
    #[serde(default)]
    pub headers: Vec<String>,

    /// Raw textual payload, when the producing protocol returned text.
    #[serde(default)]
    pub raw_text: Option<String>,
}

impl SourceTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from already-parsed rows.
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self {
            rows,
            headers: Vec::new(),
            raw_text: None,
        }
    }

    /// Build a table by parsing delimited text with the given separator.
    ///
    /// The original text is retained as `raw_text`.
    pub fn from_csv(text: impl Into<String>, separator: char) -> Self {
        let text = text.into();
        let rows = Self::csv_to_rows(&text, separator);
        Self {
            rows,
            headers: Vec::new(),
            raw_text: Some(text),
        }
    }

    /// Build a table from an inline literal using the default separator.
    ///
    /// Connector fields that accept a table reference also accept a literal
    /// delimited value (`"a;b;"`); this is how those literals materialize.
    pub fn from_inline(literal: &str) -> Self {
        Self {
            rows: Self::csv_to_rows(literal, DEFAULT_COLUMN_SEPARATOR),
            headers: Vec::new(),
            raw_text: None,
        }
    }

    /// Wrap an unparsed textual payload, leaving the row view empty.
    ///
    /// Compute steps such as `json2csv` or a script source turn the text into
    /// rows later in the pipeline.
    pub fn from_raw(text: impl Into<String>) -> Self {
        Self {
            rows: Vec::new(),
            headers: Vec::new(),
            raw_text: Some(text.into()),
        }
    }

    /// Set headers, builder-style.
    pub fn with_headers(mut self, headers: Vec<String>) -> Self {
        self.headers = headers;
        self
    }

    /// True when the table carries no data in either view.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.raw_text.as_deref().is_none_or(|t| t.trim().is_empty())
    }

    /// Width of the first row; zero for an empty table.
    ///
    /// Column-indexed operations bound-check against this width.
    pub fn column_count(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// Serialize rows to delimited text.
    ///
    /// Each line ends with a trailing separator; lines join with `\n`. When
    /// `replace_separator` is set, separator characters inside cell values are
    /// substituted with [`ALTERNATE_COLUMN_SEPARATOR`] so the column count
    /// survives a re-parse.
    pub fn to_csv(&self, separator: char, replace_separator: bool) -> String {
        Self::rows_to_csv(&self.rows, separator, replace_separator)
    }

    /// Serialize arbitrary rows to delimited text (see [`SourceTable::to_csv`]).
    pub fn rows_to_csv(rows: &[Vec<String>], separator: char, replace_separator: bool) -> String {
        rows.iter()
            .map(|row| {
                let mut line = String::new();
                for cell in row {
                    if replace_separator {
                        line.push_str(
                            &cell.replace(separator, &ALTERNATE_COLUMN_SEPARATOR.to_string()),
                        );
                    } else {
                        line.push_str(cell);
                    }
                    line.push(separator);
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parse delimited text into rows. Blank lines are dropped.
    pub fn csv_to_rows(text: &str, separator: char) -> Vec<Vec<String>> {
        text.split('\n')
            .filter(|line| !line.is_empty())
            .map(|line| Self::line_to_cells(line, separator))
            .collect()
    }

    /// Split one delimited line into its cells.
    ///
    /// A line may or may not carry the trailing separator; both forms parse to
    /// the same cells, so serialize-then-parse is the identity on rows.
    pub fn line_to_cells(line: &str, separator: char) -> Vec<String> {
        if line.is_empty() {
            return Vec::new();
        }
        let mut cells: Vec<String> = line.split(separator).map(str::to_string).collect();
        if line.ends_with(separator) {
            // The trailing separator produces one empty trailing chunk.
            cells.pop();
        }
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    // ===== serialization =====

    #[test]
    fn test_rows_to_csv_trailing_separator() {
        let table = SourceTable::from_rows(rows(&[&["a", "b"], &["c", "d"]]));
        assert_eq!(table.to_csv(';', false), "a;b;\nc;d;");
    }

    #[test]
    fn test_rows_to_csv_replaces_embedded_separator() {
        let table = SourceTable::from_rows(rows(&[&["a;x", "b"]]));
        assert_eq!(table.to_csv(';', true), "a,x;b;");
    }

    #[test]
    fn test_rows_to_csv_keeps_embedded_separator_when_asked() {
        let table = SourceTable::from_rows(rows(&[&["a;x", "b"]]));
        assert_eq!(table.to_csv(';', false), "a;x;b;");
    }

    // ===== parsing =====

    #[test]
    fn test_line_to_cells_with_trailing_separator() {
        assert_eq!(SourceTable::line_to_cells("a;b;", ';'), vec!["a", "b"]);
    }

    #[test]
    fn test_line_to_cells_without_trailing_separator() {
        assert_eq!(SourceTable::line_to_cells("a;b", ';'), vec!["a", "b"]);
    }

    #[test]
    fn test_line_to_cells_preserves_empty_cells() {
        assert_eq!(SourceTable::line_to_cells("a;;c;", ';'), vec!["a", "", "c"]);
    }

    #[test]
    fn test_line_to_cells_empty_line() {
        assert!(SourceTable::line_to_cells("", ';').is_empty());
    }

    #[test]
    fn test_csv_to_rows_skips_blank_lines() {
        let parsed = SourceTable::csv_to_rows("a;b;\n\nc;d;", ';');
        assert_eq!(parsed, rows(&[&["a", "b"], &["c", "d"]]));
    }

    // ===== round trip =====

    #[test]
    fn test_round_trip_is_lossless_without_separator_in_cells() {
        let original = rows(&[&["a", "b", ""], &["", "d", "e"], &["x", "y", "z"]]);
        let csv = SourceTable::rows_to_csv(&original, ';', false);
        assert_eq!(SourceTable::csv_to_rows(&csv, ';'), original);
    }

    #[test]
    fn test_round_trip_single_cell() {
        let original = rows(&[&["only"]]);
        let csv = SourceTable::rows_to_csv(&original, ';', false);
        assert_eq!(SourceTable::csv_to_rows(&csv, ';'), original);
    }

    // ===== construction =====

    #[test]
    fn test_from_csv_retains_raw_text() {
        let table = SourceTable::from_csv("a;b;", ';');
        assert_eq!(table.raw_text.as_deref(), Some("a;b;"));
        assert_eq!(table.rows, rows(&[&["a", "b"]]));
    }

    #[test]
    fn test_from_inline_multi_line() {
        let table = SourceTable::from_inline("a;b;\nc;d;");
        assert_eq!(table.rows, rows(&[&["a", "b"], &["c", "d"]]));
        assert!(table.raw_text.is_none());
    }

    #[test]
    fn test_is_empty() {
        assert!(SourceTable::new().is_empty());
        assert!(SourceTable::from_csv("  \n ", ';').is_empty());
        assert!(!SourceTable::from_rows(rows(&[&["x"]])).is_empty());
        assert!(!SourceTable::from_csv("raw", ';').is_empty());
    }

    #[test]
    fn test_column_count_uses_first_row() {
        let table = SourceTable::from_rows(rows(&[&["a", "b", "c"], &["d"]]));
        assert_eq!(table.column_count(), 3);
        assert_eq!(SourceTable::new().column_count(), 0);
    }
}
