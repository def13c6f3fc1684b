//! Detection criterion definitions.
//!
//! A connector is considered applicable to a host only when every one of its
//! criteria evaluates to success. Evaluation lives in
//! [`crate::strategy::detection`]; this module models the closed variant set.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::config::DeviceKind;

use super::source::HttpMethod;

fn default_true() -> bool {
    true
}

fn default_wmi_namespace() -> String {
    "root\\cimv2".to_string()
}

fn default_wbem_namespace() -> String {
    "root/cimv2".to_string()
}

/// One detection predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// When set, the protocol call runs under the per-connector guard.
    #[serde(default)]
    pub force_serialization: bool,

    #[serde(flatten)]
    pub kind: CriterionKind,
}

impl Criterion {
    pub fn new(kind: CriterionKind) -> Self {
        Self {
            force_serialization: false,
            kind,
        }
    }

    /// Mark the criterion as non-reentrant.
    pub fn with_force_serialization(mut self, force: bool) -> Self {
        self.force_serialization = force;
        self
    }
}

/// Closed set of criterion subtypes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CriterionKind {
    /// Match the host's device kind against keep/exclude sets.
    DeviceType {
        #[serde(default)]
        keep: BTreeSet<DeviceKind>,
        #[serde(default)]
        exclude: BTreeSet<DeviceKind>,
    },

    /// Require a minimum engine version.
    ProductRequirements {
        #[serde(default)]
        engine_version: Option<String>,
    },

    /// HTTP probe; succeeds when the response matches `expected_result`.
    Http {
        path: String,
        #[serde(default)]
        method: HttpMethod,
        #[serde(default)]
        header: Option<String>,
        #[serde(default)]
        body: Option<String>,
        #[serde(default)]
        expected_result: Option<String>,
        #[serde(default)]
        error_message: Option<String>,
    },

    /// SNMP get probe on one OID.
    SnmpGet {
        oid: String,
        #[serde(default)]
        expected_result: Option<String>,
    },

    /// SNMP get-next probe under one OID.
    SnmpGetNext {
        oid: String,
        #[serde(default)]
        expected_result: Option<String>,
    },

    /// WMI query probe.
    Wmi {
        query: String,
        #[serde(default = "default_wmi_namespace")]
        namespace: String,
        #[serde(default)]
        expected_result: Option<String>,
    },

    /// WBEM query probe.
    Wbem {
        query: String,
        #[serde(default = "default_wbem_namespace")]
        namespace: String,
        #[serde(default)]
        expected_result: Option<String>,
    },

    /// IPMI reachability probe.
    Ipmi,

    /// Running-process match.
    Process { command_line: String },

    /// OS command probe; succeeds when the output matches `expected_result`.
    CommandLine {
        command_line: String,
        #[serde(default)]
        expected_result: Option<String>,
        #[serde(default = "default_true")]
        execute_locally: bool,
        #[serde(default)]
        error_message: Option<String>,
    },
}

impl CriterionKind {
    /// Capability identifier for registry dispatch.
    pub fn criterion_type(&self) -> CriterionType {
        match self {
            CriterionKind::DeviceType { .. } => CriterionType::DeviceType,
            CriterionKind::ProductRequirements { .. } => CriterionType::ProductRequirements,
            CriterionKind::Http { .. } => CriterionType::Http,
            CriterionKind::SnmpGet { .. } => CriterionType::SnmpGet,
            CriterionKind::SnmpGetNext { .. } => CriterionType::SnmpGetNext,
            CriterionKind::Wmi { .. } => CriterionType::Wmi,
            CriterionKind::Wbem { .. } => CriterionType::Wbem,
            CriterionKind::Ipmi => CriterionType::Ipmi,
            CriterionKind::Process { .. } => CriterionType::Process,
            CriterionKind::CommandLine { .. } => CriterionType::CommandLine,
        }
    }

    /// True for kinds the engine evaluates itself, without protocol dispatch.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            CriterionKind::DeviceType { .. } | CriterionKind::ProductRequirements { .. }
        )
    }
}

/// Criterion subtype names, used as capability-set members by extensions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, AsRefStr,
)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CriterionType {
    DeviceType,
    ProductRequirements,
    Http,
    SnmpGet,
    SnmpGetNext,
    Wmi,
    Wbem,
    Ipmi,
    Process,
    CommandLine,
}
