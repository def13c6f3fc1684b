//! In-memory telemetry store shared by all strategies.
//!
//! The store owns every piece of cross-strategy state: the monitor map, the
//! per-connector namespaces (source tables, detection status, serialization
//! guard) and the current strategy timestamp. Nothing engine-wide lives in
//! globals; dropping the store drops all of it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::config::HostConfig;
use crate::extension::ProtocolConfig;
use crate::strategy::SourceTable;
use crate::telemetry::monitor::{
    CONNECTOR_ID_ATTRIBUTE, HOST_MONITOR_TYPE, Monitor, build_monitor_id,
};

/// Per-connector working state.
///
/// Source tables produced by one connector are only visible to that
/// connector's own jobs; the guard serializes its force-serialized operations.
#[derive(Debug, Default)]
pub struct ConnectorNamespace {
    tables: RwLock<HashMap<String, SourceTable>>,
    status_ok: RwLock<bool>,
    guard: Mutex<()>,
}

impl ConnectorNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a source result under its full reference key.
    pub async fn insert_table(&self, key: impl Into<String>, table: SourceTable) {
        self.tables.write().await.insert(key.into(), table);
    }

    /// Fetch a copy of a source result by full reference key.
    pub async fn table(&self, key: &str) -> Option<SourceTable> {
        self.tables.read().await.get(key).cloned()
    }

    pub async fn table_count(&self) -> usize {
        self.tables.read().await.len()
    }

    /// Drop all stored source results. Surrounding and job sources are
    /// recomputed every cycle; stale tables must not leak across cycles.
    pub async fn clear_tables(&self) {
        self.tables.write().await.clear();
    }

    /// Record the detection outcome for this connector.
    pub async fn set_status_ok(&self, ok: bool) {
        *self.status_ok.write().await = ok;
    }

    /// True when detection selected this connector.
    pub async fn status_ok(&self) -> bool {
        *self.status_ok.read().await
    }

    /// The mutex serializing force-serialized operations of this connector.
    pub fn guard(&self) -> &Mutex<()> {
        &self.guard
    }
}

/// Serializable view of the store, for snapshot export.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy_time: Option<DateTime<Utc>>,
    pub monitors: BTreeMap<String, BTreeMap<String, Monitor>>,
}

/// Shared state for one monitored host.
pub struct TelemetryStore {
    host: HostConfig,
    protocol_configs: HashMap<String, Arc<dyn ProtocolConfig>>,
    monitors: RwLock<BTreeMap<String, BTreeMap<String, Monitor>>>,
    namespaces: RwLock<HashMap<String, Arc<ConnectorNamespace>>>,
    strategy_time: RwLock<Option<DateTime<Utc>>>,
}

impl TelemetryStore {
    /// Create a store for a host, seeding its root host monitor.
    pub fn new(host: HostConfig) -> Self {
        let now = Utc::now();
        let host_id = build_monitor_id("host", HOST_MONITOR_TYPE, &[&host.hostname]);

        let mut attributes = BTreeMap::new();
        attributes.insert("id".to_string(), host.hostname.clone());
        attributes.insert("host.name".to_string(), host.hostname.clone());
        attributes.insert("host.type".to_string(), host.device_kind.to_string());
        attributes.insert("agent.host.name".to_string(), host.hostname.clone());

        let host_monitor =
            Monitor::new(host_id.clone(), HOST_MONITOR_TYPE, now).with_attributes(attributes);

        let mut monitors: BTreeMap<String, BTreeMap<String, Monitor>> = BTreeMap::new();
        monitors
            .entry(HOST_MONITOR_TYPE.to_string())
            .or_default()
            .insert(host_id, host_monitor);

        Self {
            host,
            protocol_configs: HashMap::new(),
            monitors: RwLock::new(monitors),
            namespaces: RwLock::new(HashMap::new()),
            strategy_time: RwLock::new(None),
        }
    }

    /// Attach the parsed protocol configurations, builder-style.
    pub fn with_protocol_configs(
        mut self,
        configs: HashMap<String, Arc<dyn ProtocolConfig>>,
    ) -> Self {
        self.protocol_configs = configs;
        self
    }

    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    pub fn hostname(&self) -> &str {
        &self.host.hostname
    }

    // ===== protocol configurations =====

    /// Configuration registered under a protocol key, if any.
    pub fn protocol_config(&self, protocol_key: &str) -> Option<Arc<dyn ProtocolConfig>> {
        self.protocol_configs.get(protocol_key).cloned()
    }

    /// All registered protocol keys, sorted.
    pub fn protocol_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.protocol_configs.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// First configuration whose protocol matches, preferring an exact key
    /// match. Section keys may carry an instance suffix (`http-backup`), so a
    /// scan over the parsed configurations is the fallback.
    pub fn find_protocol_config(&self, protocol: &str) -> Option<Arc<dyn ProtocolConfig>> {
        if let Some(config) = self.protocol_configs.get(protocol) {
            return Some(Arc::clone(config));
        }
        let mut matching: Vec<_> = self
            .protocol_configs
            .iter()
            .filter(|(_, config)| config.protocol() == protocol)
            .collect();
        matching.sort_by(|a, b| a.0.cmp(b.0));
        matching.first().map(|(_, config)| Arc::clone(config))
    }

    // ===== strategy time =====

    /// Record the timestamp shared by every job of the running strategy.
    pub async fn set_strategy_time(&self, time: DateTime<Utc>) {
        *self.strategy_time.write().await = Some(time);
    }

    pub async fn strategy_time(&self) -> Option<DateTime<Utc>> {
        *self.strategy_time.read().await
    }

    // ===== namespaces =====

    /// The namespace of a connector, created on first use.
    pub async fn namespace(&self, connector_id: &str) -> Arc<ConnectorNamespace> {
        if let Some(ns) = self.namespaces.read().await.get(connector_id) {
            return Arc::clone(ns);
        }
        let mut namespaces = self.namespaces.write().await;
        Arc::clone(
            namespaces
                .entry(connector_id.to_string())
                .or_insert_with(|| Arc::new(ConnectorNamespace::new())),
        )
    }

    // ===== monitors =====

    /// Create a monitor or merge attributes into an existing one.
    pub async fn upsert_monitor(
        &self,
        monitor_type: &str,
        id: &str,
        attributes: BTreeMap<String, String>,
        discovery_time: DateTime<Utc>,
    ) {
        let mut monitors = self.monitors.write().await;
        let by_id = monitors.entry(monitor_type.to_string()).or_default();
        match by_id.get_mut(id) {
            Some(existing) => existing.refresh_attributes(attributes, discovery_time),
            None => {
                debug!(monitor_type, monitor_id = id, "Monitor created");
                let monitor = Monitor::new(id, monitor_type, discovery_time)
                    .with_attributes(attributes);
                by_id.insert(id.to_string(), monitor);
            }
        }
    }

    /// Run a closure against one monitor, under the write lock.
    pub async fn with_monitor_mut<R>(
        &self,
        monitor_type: &str,
        id: &str,
        f: impl FnOnce(&mut Monitor) -> R,
    ) -> Option<R> {
        let mut monitors = self.monitors.write().await;
        monitors.get_mut(monitor_type)?.get_mut(id).map(f)
    }

    /// Copy of one monitor.
    pub async fn monitor(&self, monitor_type: &str, id: &str) -> Option<Monitor> {
        self.monitors.read().await.get(monitor_type)?.get(id).cloned()
    }

    /// Copies of all monitors of a type, in id order.
    pub async fn monitors_of_type(&self, monitor_type: &str) -> Vec<Monitor> {
        self.monitors
            .read()
            .await
            .get(monitor_type)
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Monitors of a type discovered by one specific connector.
    pub async fn monitors_of_connector(
        &self,
        monitor_type: &str,
        connector_id: &str,
    ) -> Vec<Monitor> {
        self.monitors
            .read()
            .await
            .get(monitor_type)
            .map(|by_id| {
                by_id
                    .values()
                    .filter(|m| {
                        m.attribute(CONNECTOR_ID_ATTRIBUTE)
                            .is_some_and(|c| c == connector_id)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All monitor types currently present, sorted.
    pub async fn monitor_types(&self) -> Vec<String> {
        self.monitors.read().await.keys().cloned().collect()
    }

    pub async fn monitor_count(&self) -> usize {
        self.monitors.read().await.values().map(BTreeMap::len).sum()
    }

    /// Copy of the root host monitor.
    pub async fn host_monitor(&self) -> Option<Monitor> {
        self.monitors
            .read()
            .await
            .get(HOST_MONITOR_TYPE)
            .and_then(|by_id| by_id.values().next().cloned())
    }

    /// `(type, id)` of every monitor with no metric refreshed at the given
    /// strategy timestamp.
    pub async fn missing_monitors(&self, strategy_time: DateTime<Utc>) -> Vec<(String, String)> {
        self.monitors
            .read()
            .await
            .iter()
            .flat_map(|(monitor_type, by_id)| {
                by_id
                    .values()
                    .filter(|m| m.is_missing(strategy_time))
                    .map(|m| (monitor_type.clone(), m.id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Serializable copy of the whole store.
    pub async fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            hostname: self.host.hostname.clone(),
            strategy_time: self.strategy_time().await,
            monitors: self.monitors.read().await.clone(),
        }
    }
}

impl std::fmt::Debug for TelemetryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryStore")
            .field("hostname", &self.host.hostname)
            .field(
                "monitor_count",
                &self
                    .monitors
                    .try_read()
                    .map(|m| m.values().map(BTreeMap::len).sum::<usize>())
                    .unwrap_or(0),
            )
            .finish_non_exhaustive()
    }
}
