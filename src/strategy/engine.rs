//! Cycle orchestration across connectors.
//!
//! The [`Engine`] owns the loaded connectors and drives one detection pass
//! followed by discovery, then repeated collect cycles. Every cycle stamps a
//! single strategy time on the store so staleness can be judged per cycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::connector::{Connector, ConnectorStore, JobName, MonitorJobs};
use crate::extension::{ExtensionRegistry, ProtocolError};
use crate::telemetry::{HOST_MONITOR_TYPE, TelemetrySnapshot, TelemetryStore};

use crate::strategy::collect::CollectExecutor;
use crate::strategy::detection::DetectionExecutor;
use crate::strategy::discovery::DiscoveryExecutor;
use crate::strategy::surrounding::SurroundingExecutor;

/// Monitor types whose jobs must run first, in this order, because later
/// instances attach to them. Types not listed here run after, concurrently.
pub const JOB_PRIORITY_ORDER: [&str; 6] = [
    "connector",
    "host",
    "enclosure",
    "blade",
    "disk_controller",
    "cpu",
];

/// Errors raised while assembling or driving the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Sources of one job reference each other cyclically.
    #[error("source dependency cycle among: {}", keys.join(", "))]
    DependencyCycle { keys: Vec<String> },

    /// A protocol section names a protocol no registered extension serves.
    #[error("no extension handles protocol section '{protocol}'")]
    MissingConfiguration { protocol: String },

    /// Configuration loading or validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A protocol extension rejected its configuration section.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Parse the protocol sections of an engine configuration and seed the
/// telemetry store for one host run.
///
/// # Errors
/// [`EngineError::MissingConfiguration`] when a section key matches no
/// registered extension; [`EngineError::Protocol`] when an extension rejects
/// its section.
pub fn build_store(
    config: &EngineConfig,
    registry: &ExtensionRegistry,
) -> Result<Arc<TelemetryStore>, EngineError> {
    let mut protocol_configs = HashMap::new();
    for (key, raw) in &config.protocols {
        let Some(extension) = registry.extension_for_protocol(key) else {
            return Err(EngineError::MissingConfiguration {
                protocol: key.clone(),
            });
        };
        let parsed = extension.build_configuration(key, raw)?;
        debug!(section = %key, protocol = extension.protocol(), "Protocol section parsed");
        protocol_configs.insert(key.clone(), parsed);
    }
    if protocol_configs.is_empty() {
        warn!("No protocol sections configured; only internal sources and criteria can run");
    }
    Ok(Arc::new(
        TelemetryStore::new(config.host.clone()).with_protocol_configs(protocol_configs),
    ))
}

/// Split a connector's monitor jobs into the fixed-priority set (sorted by
/// [`JOB_PRIORITY_ORDER`] rank) and the remainder in declaration order.
pub(crate) fn partition_monitor_jobs(
    connector: &Connector,
) -> (Vec<&MonitorJobs>, Vec<&MonitorJobs>) {
    let rank = |monitor_type: &str| JOB_PRIORITY_ORDER.iter().position(|t| *t == monitor_type);

    let mut prioritized: Vec<&MonitorJobs> = Vec::new();
    let mut rest: Vec<&MonitorJobs> = Vec::new();
    for jobs in &connector.monitors {
        if rank(&jobs.monitor_type).is_some() {
            prioritized.push(jobs);
        } else {
            rest.push(jobs);
        }
    }
    prioritized.sort_by_key(|jobs| rank(&jobs.monitor_type));
    (prioritized, rest)
}

/// Record a job's wall-clock duration on the host monitor, in seconds.
///
/// Only written when the host has self monitoring enabled; the key carries
/// the job type, monitor type and connector as metric attributes.
pub(crate) async fn record_job_duration(
    store: &TelemetryStore,
    job_type: &str,
    monitor_type: &str,
    connector_id: &str,
    started: Instant,
    collect_time: DateTime<Utc>,
) {
    if !store.host().self_monitoring {
        return;
    }
    let Some(host) = store.host_monitor().await else {
        return;
    };
    let key = format!(
        "argus.job.duration{{job.type=\"{job_type}\", monitor.type=\"{monitor_type}\", connector_id=\"{connector_id}\"}}"
    );
    let seconds = started.elapsed().as_secs_f64();
    store
        .with_monitor_mut(HOST_MONITOR_TYPE, &host.id, |monitor| {
            monitor.update_number_metric(&key, seconds, Some("s".to_string()), collect_time);
        })
        .await;
}

/// Probe every configured protocol and publish `<section>.up` on the host
/// monitor: 1.0 when reachable, 0.0 when not. An extension without a probe
/// result leaves the metric untouched.
pub(crate) async fn check_protocol_health(
    store: &TelemetryStore,
    registry: &ExtensionRegistry,
    collect_time: DateTime<Utc>,
) {
    let Some(host) = store.host_monitor().await else {
        return;
    };
    for key in store.protocol_keys() {
        let Some(config) = store.protocol_config(&key) else {
            continue;
        };
        let Some(extension) = registry.extension_for_protocol(&key) else {
            continue;
        };
        match extension.check_protocol(config.as_ref(), store).await {
            Some(up) => {
                debug!(section = %key, up, "Protocol health checked");
                store
                    .with_monitor_mut(HOST_MONITOR_TYPE, &host.id, |monitor| {
                        monitor.update_number_metric(
                            &format!("{key}.up"),
                            if up { 1.0 } else { 0.0 },
                            None,
                            collect_time,
                        );
                    })
                    .await;
            }
            None => debug!(section = %key, "Protocol has no health probe, up metric skipped"),
        }
    }
}

/// Top-level driver over one host's connectors.
pub struct Engine {
    store: Arc<TelemetryStore>,
    registry: Arc<ExtensionRegistry>,
    connectors: Vec<Arc<Connector>>,
    detected: Vec<Arc<Connector>>,
}

impl Engine {
    pub fn new(
        store: Arc<TelemetryStore>,
        registry: Arc<ExtensionRegistry>,
        connectors: &ConnectorStore,
    ) -> Self {
        Self {
            store,
            registry,
            connectors: connectors.iter().cloned().collect(),
            detected: Vec::new(),
        }
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    /// Ids of the connectors that passed detection, in detection order.
    pub fn detected_ids(&self) -> Vec<&str> {
        self.detected
            .iter()
            .map(|c| c.connector_id.as_str())
            .collect()
    }

    /// Run detection over every loaded connector, then one discovery cycle on
    /// the connectors that matched.
    pub async fn detect_and_discover(&mut self) {
        let strategy_time = Utc::now();
        self.store.set_strategy_time(strategy_time).await;
        info!(
            host = self.store.hostname(),
            connectors = self.connectors.len(),
            "Starting detection"
        );

        check_protocol_health(&self.store, &self.registry, strategy_time).await;

        let detection =
            DetectionExecutor::new(Arc::clone(&self.store), Arc::clone(&self.registry));
        self.detected = detection.run(&self.connectors, strategy_time).await;

        for connector in &self.detected {
            self.run_connector_cycle(connector, JobName::Discovery, strategy_time)
                .await;
        }
        info!(
            host = self.store.hostname(),
            detected = self.detected.len(),
            monitors = self.store.monitor_count().await,
            "Discovery finished"
        );
    }

    /// Run one collect cycle over the detected connectors.
    ///
    /// Each connector's detection criteria are re-tested first; a connector
    /// that no longer responds is skipped for the cycle but stays detected,
    /// so a transient outage does not permanently drop it.
    pub async fn collect(&self) {
        let strategy_time = Utc::now();
        self.store.set_strategy_time(strategy_time).await;

        check_protocol_health(&self.store, &self.registry, strategy_time).await;

        let detection =
            DetectionExecutor::new(Arc::clone(&self.store), Arc::clone(&self.registry));
        for connector in &self.detected {
            let revalidation = detection.detect_connector(connector, strategy_time).await;
            if !revalidation.succeeded() {
                error!(
                    connector_id = %connector.connector_id,
                    "Detection criteria no longer pass, collect skipped for this connector"
                );
                continue;
            }
            self.run_connector_cycle(connector, JobName::Collect, strategy_time)
                .await;
        }

        let missing = self.store.missing_monitors(strategy_time).await;
        if !missing.is_empty() {
            debug!(
                stale = missing.len(),
                "Monitors not refreshed by this cycle"
            );
        }
        info!(
            host = self.store.hostname(),
            monitors = self.store.monitor_count().await,
            "Collect cycle finished"
        );
    }

    /// Serializable copy of the current telemetry.
    pub async fn snapshot(&self) -> TelemetrySnapshot {
        self.store.snapshot().await
    }

    /// One connector's share of a cycle: the before-all bracket, the monitor
    /// jobs for `job`, the simple jobs, then the after-all bracket.
    async fn run_connector_cycle(
        &self,
        connector: &Arc<Connector>,
        job: JobName,
        strategy_time: DateTime<Utc>,
    ) {
        let surrounding = SurroundingExecutor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            connector.connector_id.as_str(),
        );
        surrounding.run_before_all(connector).await;

        match job {
            JobName::Discovery | JobName::Simple => {
                DiscoveryExecutor::new(Arc::clone(&self.store), Arc::clone(&self.registry))
                    .run_connector(connector, JobName::Discovery, strategy_time)
                    .await;
            }
            JobName::Collect => {
                CollectExecutor::new(Arc::clone(&self.store), Arc::clone(&self.registry))
                    .run_connector(connector, strategy_time)
                    .await;
            }
        }

        // Simple jobs refresh their monitors on every cycle kind.
        DiscoveryExecutor::new(Arc::clone(&self.store), Arc::clone(&self.registry))
            .run_connector(connector, JobName::Simple, strategy_time)
            .await;

        surrounding.run_after_all(connector).await;
    }
}
