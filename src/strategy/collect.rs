//! Collect: refresh metrics on previously discovered monitors.
//!
//! All-at-once jobs run their sources once and match each result row to a
//! monitor through the declared key attributes. Per-monitor jobs re-run the
//! sources for every monitor with its attributes substituted, reading metrics
//! off the first result row.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::connector::{
    CollectJob, CollectMode, Connector, Job, JobName, MonitorJobs, Source, job_source_key,
};
use crate::extension::ExtensionRegistry;
use crate::telemetry::{Monitor, TelemetryStore};

use crate::strategy::engine::{EngineError, partition_monitor_jobs, record_job_duration};
use crate::strategy::mapping::{MappingInterpreter, resolve_mapping_table};
use crate::strategy::order::apply_execution_order;
use crate::strategy::source::SourceExecutor;

/// Runs the collect jobs of one connector over its discovered monitors.
#[derive(Clone)]
pub struct CollectExecutor {
    store: Arc<TelemetryStore>,
    registry: Arc<ExtensionRegistry>,
}

impl CollectExecutor {
    pub fn new(store: Arc<TelemetryStore>, registry: Arc<ExtensionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Run the collect job of every monitor type the connector declares,
    /// with the same priority ordering and concurrency as discovery.
    pub async fn run_connector(&self, connector: &Arc<Connector>, strategy_time: DateTime<Utc>) {
        let (prioritized, rest) = partition_monitor_jobs(connector);
        for jobs in prioritized {
            self.process_monitor_job(connector, jobs, strategy_time)
                .await;
        }

        if self.store.host().sequential {
            for jobs in rest {
                self.process_monitor_job(connector, jobs, strategy_time)
                    .await;
            }
            return;
        }

        let mut handles = Vec::with_capacity(rest.len());
        for jobs in rest {
            let executor = self.clone();
            let connector = Arc::clone(connector);
            let monitor_type = jobs.monitor_type.clone();
            handles.push(tokio::spawn(async move {
                if let Some(jobs) = connector.monitor_jobs(&monitor_type) {
                    executor
                        .process_monitor_job(&connector, jobs, strategy_time)
                        .await;
                }
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(
                    connector_id = %connector.connector_id,
                    error = %e,
                    "Monitor job task aborted"
                );
            }
        }
    }

    /// One monitor type's collect job, bounded by the host job timeout.
    async fn process_monitor_job(
        &self,
        connector: &Arc<Connector>,
        jobs: &MonitorJobs,
        strategy_time: DateTime<Utc>,
    ) {
        let Some(collect) = jobs.collect.as_ref() else {
            return;
        };
        if !self.store.host().is_monitor_included(&jobs.monitor_type) {
            debug!(
                monitor_type = %jobs.monitor_type,
                "Monitor type filtered out by host configuration, job skipped"
            );
            return;
        }

        let monitors = self
            .store
            .monitors_of_connector(&jobs.monitor_type, &connector.connector_id)
            .await;
        if monitors.is_empty() {
            debug!(
                connector_id = %connector.connector_id,
                monitor_type = %jobs.monitor_type,
                "No discovered monitors, collect job skipped"
            );
            return;
        }

        let started = Instant::now();
        let timeout = self.store.host().job_timeout;
        let outcome = match collect.mode {
            CollectMode::AllAtOnce => {
                tokio::time::timeout(
                    timeout,
                    self.collect_all_at_once(connector, jobs, collect, &monitors, strategy_time),
                )
                .await
            }
            CollectMode::PerMonitor => {
                tokio::time::timeout(
                    timeout,
                    self.collect_per_monitor(connector, jobs, collect, &monitors, strategy_time),
                )
                .await
            }
        };
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                connector_id = %connector.connector_id,
                monitor_type = %jobs.monitor_type,
                error = %e,
                "Collect job abandoned"
            ),
            Err(_) => warn!(
                connector_id = %connector.connector_id,
                monitor_type = %jobs.monitor_type,
                timeout = ?timeout,
                "Collect job timed out, partial results kept"
            ),
        }
        record_job_duration(
            &self.store,
            JobName::Collect.as_ref(),
            &jobs.monitor_type,
            &connector.connector_id,
            started,
            strategy_time,
        )
        .await;
    }

    /// Run the sources once; attach each mapping row to the monitor whose key
    /// attributes all match the row's mapped values.
    async fn collect_all_at_once(
        &self,
        connector: &Arc<Connector>,
        jobs: &MonitorJobs,
        collect: &CollectJob,
        monitors: &[Monitor],
        strategy_time: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let connector_id = connector.connector_id.as_str();
        let executor = SourceExecutor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            connector_id,
        );
        executor
            .execute_job(&keyed_sources(&jobs.monitor_type, &collect.job))
            .await?;

        let table =
            resolve_mapping_table(&self.store, connector_id, &collect.job.mapping.source).await;
        let mut collected = 0usize;
        for row in &table.rows {
            let interpreter = MappingInterpreter::new(&collect.job.mapping, row);
            let attributes = interpreter.attributes();
            let Some(monitor) = find_monitor(monitors, &jobs.keys, &attributes) else {
                debug!(
                    connector_id,
                    monitor_type = %jobs.monitor_type,
                    "Row matches no discovered monitor, skipped"
                );
                continue;
            };

            let metrics = interpreter.metrics();
            self.store
                .with_monitor_mut(&jobs.monitor_type, &monitor.id, |m| {
                    for (key, value) in &metrics {
                        m.collect_metric(key, value, &connector.metrics, strategy_time);
                    }
                })
                .await;
            collected += 1;
        }
        info!(
            connector_id,
            monitor_type = %jobs.monitor_type,
            rows = table.rows.len(),
            monitors = collected,
            "Collect job refreshed monitors"
        );
        Ok(())
    }

    /// Re-run the sources once per monitor with its attributes substituted;
    /// only the first result row is read.
    async fn collect_per_monitor(
        &self,
        connector: &Arc<Connector>,
        jobs: &MonitorJobs,
        collect: &CollectJob,
        monitors: &[Monitor],
        strategy_time: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let connector_id = connector.connector_id.as_str();
        let keyed = keyed_sources(&jobs.monitor_type, &collect.job);

        for monitor in monitors {
            let executor = SourceExecutor::new(
                Arc::clone(&self.store),
                Arc::clone(&self.registry),
                connector_id,
            )
            .with_attributes(monitor.attributes.clone());
            executor.execute_job(&keyed).await?;

            let table =
                resolve_mapping_table(&self.store, connector_id, &collect.job.mapping.source)
                    .await;
            let Some(row) = table.rows.first() else {
                debug!(
                    connector_id,
                    monitor_id = %monitor.id,
                    "Per-monitor collect produced no rows"
                );
                continue;
            };

            let metrics = MappingInterpreter::new(&collect.job.mapping, row).metrics();
            self.store
                .with_monitor_mut(&jobs.monitor_type, &monitor.id, |m| {
                    for (key, value) in &metrics {
                        m.collect_metric(key, value, &connector.metrics, strategy_time);
                    }
                })
                .await;
        }
        info!(
            connector_id,
            monitor_type = %jobs.monitor_type,
            monitors = monitors.len(),
            "Per-monitor collect finished"
        );
        Ok(())
    }
}

/// Key the job's sources under their collect reference keys, in execution
/// order.
fn keyed_sources(monitor_type: &str, job: &Job) -> Vec<(String, Source)> {
    apply_execution_order(&job.sources, &job.execution_order)
        .into_iter()
        .map(|source| {
            (
                job_source_key(monitor_type, JobName::Collect, &source.name),
                source.clone(),
            )
        })
        .collect()
}

/// Find the monitor whose key attributes all equal the row's mapped values.
///
/// Every declared key must be present and non-empty on both sides; a partial
/// match never counts.
fn find_monitor<'a>(
    monitors: &'a [Monitor],
    keys: &[String],
    attributes: &BTreeMap<String, String>,
) -> Option<&'a Monitor> {
    monitors.iter().find(|monitor| {
        keys.iter().all(|key| {
            match (monitor.attributes.get(key), attributes.get(key)) {
                (Some(have), Some(want)) => !want.is_empty() && have == want,
                _ => false,
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::strategy::discovery::DiscoveryExecutor;
    use crate::telemetry::{CONNECTOR_ID_ATTRIBUTE, build_monitor_id};

    fn store() -> Arc<TelemetryStore> {
        Arc::new(TelemetryStore::new(HostConfig::new("host-1")))
    }

    fn registry() -> Arc<ExtensionRegistry> {
        Arc::new(ExtensionRegistry::builtin())
    }

    async fn seed_monitor(store: &TelemetryStore, monitor_type: &str, connector_id: &str, id: &str) {
        let monitor_id = build_monitor_id(connector_id, monitor_type, &[id]);
        let mut attributes = BTreeMap::new();
        attributes.insert("id".to_string(), id.to_string());
        attributes.insert(
            CONNECTOR_ID_ATTRIBUTE.to_string(),
            connector_id.to_string(),
        );
        store
            .upsert_monitor(monitor_type, &monitor_id, attributes, Utc::now())
            .await;
    }

    // ===== all-at-once =====

    #[tokio::test]
    async fn test_all_at_once_matches_rows_by_key_attributes() {
        let yaml = r#"
connector_id: disk-lib
monitors:
  - monitor_type: disk
    keys: [id]
    collect:
      sources:
        - name: status
          type: static
          value: |-
            disk-1;52
            disk-0;37
            ghost;99
      mapping:
        source: "${source::monitors.disk.collect.sources.status}"
        attributes:
          id: $1
        metrics:
          disk.temperature: $2
"#;
        let connector = Arc::new(serde_yaml::from_str::<Connector>(yaml).unwrap());
        let store = store();
        seed_monitor(&store, "disk", "disk-lib", "disk-0").await;
        seed_monitor(&store, "disk", "disk-lib", "disk-1").await;

        CollectExecutor::new(Arc::clone(&store), registry())
            .run_connector(&connector, Utc::now())
            .await;

        let disk0 = store
            .monitor("disk", &build_monitor_id("disk-lib", "disk", &["disk-0"]))
            .await
            .unwrap();
        let disk1 = store
            .monitor("disk", &build_monitor_id("disk-lib", "disk", &["disk-1"]))
            .await
            .unwrap();
        assert_eq!(disk0.number_value("disk.temperature"), Some(37.0));
        assert_eq!(disk1.number_value("disk.temperature"), Some(52.0));
        // The ghost row matched nothing and created nothing.
        assert_eq!(store.monitors_of_type("disk").await.len(), 2);
    }

    #[tokio::test]
    async fn test_collect_without_discovered_monitors_is_skipped() {
        let yaml = r#"
connector_id: disk-lib
monitors:
  - monitor_type: disk
    keys: [id]
    collect:
      sources:
        - name: status
          type: static
          value: "disk-0;37;"
      mapping:
        source: "${source::monitors.disk.collect.sources.status}"
        attributes:
          id: $1
        metrics:
          disk.temperature: $2
"#;
        let connector = Arc::new(serde_yaml::from_str::<Connector>(yaml).unwrap());
        let store = store();

        CollectExecutor::new(Arc::clone(&store), registry())
            .run_connector(&connector, Utc::now())
            .await;

        assert!(store.monitors_of_type("disk").await.is_empty());
        // The sources never ran.
        assert_eq!(store.namespace("disk-lib").await.table_count().await, 0);
    }

    // ===== per-monitor =====

    #[tokio::test]
    async fn test_per_monitor_substitutes_attributes() {
        let yaml = r#"
connector_id: sensor-lib
monitors:
  - monitor_type: temperature
    keys: [id]
    collect:
      mode: per_monitor
      sources:
        - name: probe
          type: static
          value: "${attribute::id};42;"
      mapping:
        source: "${source::monitors.temperature.collect.sources.probe}"
        metrics:
          temperature.reading: $2
"#;
        let connector = Arc::new(serde_yaml::from_str::<Connector>(yaml).unwrap());
        let store = store();
        seed_monitor(&store, "temperature", "sensor-lib", "cpu-zone").await;
        seed_monitor(&store, "temperature", "sensor-lib", "ambient").await;

        CollectExecutor::new(Arc::clone(&store), registry())
            .run_connector(&connector, Utc::now())
            .await;

        for id in ["cpu-zone", "ambient"] {
            let monitor = store
                .monitor(
                    "temperature",
                    &build_monitor_id("sensor-lib", "temperature", &[id]),
                )
                .await
                .unwrap();
            assert_eq!(monitor.number_value("temperature.reading"), Some(42.0));
        }
    }

    // ===== monitor matching =====

    #[test]
    fn test_find_monitor_requires_every_key() {
        let mut attributes = BTreeMap::new();
        attributes.insert("id".to_string(), "0".to_string());
        attributes.insert("slot".to_string(), "a".to_string());
        let monitor = Monitor::new("m1", "blade", Utc::now()).with_attributes(attributes);
        let monitors = vec![monitor];
        let keys = vec!["id".to_string(), "slot".to_string()];

        let mut row = BTreeMap::new();
        row.insert("id".to_string(), "0".to_string());
        row.insert("slot".to_string(), "a".to_string());
        assert!(find_monitor(&monitors, &keys, &row).is_some());

        row.insert("slot".to_string(), "b".to_string());
        assert!(find_monitor(&monitors, &keys, &row).is_none());

        row.insert("slot".to_string(), String::new());
        assert!(find_monitor(&monitors, &keys, &row).is_none());
    }

    // ===== simple jobs keep running during collect =====

    #[tokio::test]
    async fn test_discovery_executor_serves_simple_during_collect_cycles() {
        let yaml = r#"
connector_id: c1
monitors:
  - monitor_type: service
    keys: [id]
    simple:
      sources:
        - name: list
          type: static
          value: "web;1;"
      mapping:
        source: "${source::monitors.service.simple.sources.list}"
        attributes:
          id: $1
        metrics:
          service.up: $2
"#;
        let connector = Arc::new(serde_yaml::from_str::<Connector>(yaml).unwrap());
        let store = store();

        DiscoveryExecutor::new(Arc::clone(&store), registry())
            .run_connector(&connector, JobName::Simple, Utc::now())
            .await;

        let monitor = store
            .monitor("service", &build_monitor_id("c1", "service", &["web"]))
            .await
            .unwrap();
        assert_eq!(monitor.number_value("service.up"), Some(1.0));
    }
}
