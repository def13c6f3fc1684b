//! Source definitions: one data-acquisition step per source.
//!
//! A [`Source`] couples a unique name with one [`SourceKind`] variant and the
//! ordered compute steps applied to its result. Protocol-backed kinds are
//! dispatched through the extension registry; engine-internal kinds (static
//! text, copy, join, union) execute without any protocol client.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use super::compute::Compute;

fn default_true() -> bool {
    true
}

/// HTTP request method used by HTTP sources and criteria.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
}

/// Which part of an HTTP response becomes the source result.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ResultContent {
    #[default]
    Body,
    Header,
    HttpStatus,
    All,
}

/// One data-acquisition step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Name unique within the enclosing job; the last segment of the source's
    /// reference key.
    pub name: String,

    /// Ordered transformation steps applied to the raw result.
    #[serde(default)]
    pub computes: Vec<Compute>,

    /// When set, the protocol call runs under the per-connector guard.
    #[serde(default)]
    pub force_serialization: bool,

    #[serde(flatten)]
    pub kind: SourceKind,
}

impl Source {
    /// Create a source with no computes, builder-style additions via
    /// [`Source::with_computes`] and [`Source::with_force_serialization`].
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            computes: Vec::new(),
            force_serialization: false,
            kind,
        }
    }

    /// Set the compute chain.
    pub fn with_computes(mut self, computes: Vec<Compute>) -> Self {
        self.computes = computes;
        self
    }

    /// Mark the source as non-reentrant.
    pub fn with_force_serialization(mut self, force: bool) -> Self {
        self.force_serialization = force;
        self
    }
}

/// Closed set of source subtypes.
///
/// Variants carry only the fields relevant to that subtype; fields shared by
/// every source live on [`Source`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    /// Single SNMP OID fetch.
    SnmpGet { oid: String },

    /// SNMP table walk, optionally restricted to selected columns.
    SnmpTable {
        oid: String,
        #[serde(default)]
        select_columns: Vec<String>,
    },

    /// SNMP get-next probe.
    SnmpGetNext { oid: String },

    /// WMI/WinRM query against a namespace.
    Wmi {
        query: String,
        #[serde(default = "default_wmi_namespace")]
        namespace: String,
    },

    /// HTTP request; the selected response content becomes the result.
    Http {
        path: String,
        #[serde(default)]
        method: HttpMethod,
        #[serde(default)]
        header: Option<String>,
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        result_content: ResultContent,
    },

    /// OS command execution.
    CommandLine {
        command_line: String,
        #[serde(default = "default_true")]
        execute_locally: bool,
        #[serde(default)]
        exclude_regex: Option<String>,
        #[serde(default)]
        keep_only_regex: Option<String>,
        #[serde(default)]
        separators: Option<String>,
        #[serde(default)]
        select_columns: Vec<usize>,
    },

    /// JMX MBean attribute read.
    Jmx {
        object_name: String,
        #[serde(default)]
        attributes: Vec<String>,
        #[serde(default)]
        key_properties: Vec<String>,
    },

    /// SQL query through a configured database protocol.
    Sql { query: String },

    /// Script transform over a referenced table; interpretation is a protocol
    /// extension concern, never the engine's.
    Awk {
        script: String,
        #[serde(default)]
        input: Option<String>,
        #[serde(default)]
        keep_only_regex: Option<String>,
        #[serde(default)]
        separators: Option<String>,
        #[serde(default)]
        select_columns: Vec<usize>,
    },

    /// Literal value wrapped as a table.
    Static { value: String },

    /// Copy of another source's table (reference or inline literal).
    Copy { from: String },

    /// Join two tables on 1-based key columns. Left rows without a right
    /// match take `default_right_line` when present, else are dropped.
    TableJoin {
        left_table: String,
        right_table: String,
        left_key_column: usize,
        right_key_column: usize,
        #[serde(default)]
        default_right_line: Option<String>,
    },

    /// Concatenation of tables in declared order.
    TableUnion { tables: Vec<String> },
}

fn default_wmi_namespace() -> String {
    "root\\cimv2".to_string()
}

impl SourceKind {
    /// Capability identifier for registry dispatch.
    pub fn source_type(&self) -> SourceType {
        match self {
            SourceKind::SnmpGet { .. } => SourceType::SnmpGet,
            SourceKind::SnmpTable { .. } => SourceType::SnmpTable,
            SourceKind::SnmpGetNext { .. } => SourceType::SnmpGetNext,
            SourceKind::Wmi { .. } => SourceType::Wmi,
            SourceKind::Http { .. } => SourceType::Http,
            SourceKind::CommandLine { .. } => SourceType::CommandLine,
            SourceKind::Jmx { .. } => SourceType::Jmx,
            SourceKind::Sql { .. } => SourceType::Sql,
            SourceKind::Awk { .. } => SourceType::Awk,
            SourceKind::Static { .. } => SourceType::Static,
            SourceKind::Copy { .. } => SourceType::Copy,
            SourceKind::TableJoin { .. } => SourceType::TableJoin,
            SourceKind::TableUnion { .. } => SourceType::TableUnion,
        }
    }

    /// True for kinds the engine executes itself, without protocol dispatch.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            SourceKind::Static { .. }
                | SourceKind::Copy { .. }
                | SourceKind::TableJoin { .. }
                | SourceKind::TableUnion { .. }
        )
    }
}

/// Source subtype names, used as capability-set members by extensions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SourceType {
    SnmpGet,
    SnmpTable,
    SnmpGetNext,
    Wmi,
    Http,
    CommandLine,
    Jmx,
    Sql,
    Awk,
    Static,
    Copy,
    TableJoin,
    TableUnion,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    // ===== deserialization =====

    #[test]
    fn test_source_from_yaml_tagged_kind() {
        let yaml = r#"
name: disk_ids
type: snmp_table
oid: 1.3.6.1.4.1.674.10893.1.20.130.4
select_columns: ["ID", "1", "7"]
"#;
        let source: Source = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(source.name, "disk_ids");
        assert!(!source.force_serialization);
        match &source.kind {
            SourceKind::SnmpTable {
                oid,
                select_columns,
            } => {
                assert_eq!(oid, "1.3.6.1.4.1.674.10893.1.20.130.4");
                assert_eq!(select_columns, &["ID", "1", "7"]);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_source_defaults() {
        let yaml = r#"
name: model
type: static
value: PowerEdge
"#;
        let source: Source = serde_yaml::from_str(yaml).unwrap();
        assert!(source.computes.is_empty());
        assert!(!source.force_serialization);
        assert_eq!(
            source.kind,
            SourceKind::Static {
                value: "PowerEdge".to_string()
            }
        );
    }

    #[test]
    fn test_command_line_defaults_to_local() {
        let yaml = r#"
name: lsscsi
type: command_line
command_line: lsscsi -g
"#;
        let source: Source = serde_yaml::from_str(yaml).unwrap();
        match source.kind {
            SourceKind::CommandLine {
                execute_locally, ..
            } => assert!(execute_locally),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn test_wmi_namespace_default() {
        let yaml = r#"
name: cpus
type: wmi
query: SELECT DeviceID FROM Win32_Processor
"#;
        let source: Source = serde_yaml::from_str(yaml).unwrap();
        match source.kind {
            SourceKind::Wmi { namespace, .. } => assert_eq!(namespace, "root\\cimv2"),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    // ===== capability mapping =====

    #[test]
    fn test_source_type_mapping() {
        let kind = SourceKind::SnmpGet {
            oid: "1.2.3".to_string(),
        };
        assert_eq!(kind.source_type(), SourceType::SnmpGet);
        assert_eq!(kind.source_type().to_string(), "snmp_get");
    }

    #[test]
    fn test_internal_kinds() {
        assert!(
            SourceKind::Static {
                value: String::new()
            }
            .is_internal()
        );
        assert!(
            SourceKind::Copy {
                from: String::new()
            }
            .is_internal()
        );
        assert!(
            !SourceKind::SnmpGet {
                oid: String::new()
            }
            .is_internal()
        );
    }

    #[test]
    fn test_source_type_from_str() {
        assert_eq!(
            SourceType::from_str("snmp_table").unwrap(),
            SourceType::SnmpTable
        );
        assert_eq!(SourceType::from_str("HTTP").unwrap(), SourceType::Http);
        assert!(SourceType::from_str("bogus").is_err());
    }

    #[test]
    fn test_http_method_parsing() {
        assert_eq!(HttpMethod::from_str("get").unwrap(), HttpMethod::Get);
        assert_eq!(HttpMethod::from_str("POST").unwrap(), HttpMethod::Post);
        assert_eq!(HttpMethod::default(), HttpMethod::Get);
    }
}
