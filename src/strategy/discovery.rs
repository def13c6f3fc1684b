//! Discovery: run acquisition jobs and map result-table rows onto monitors.
//!
//! One executor serves both discovery and simple jobs; a simple job is a
//! discovery-shaped job that re-runs on every cycle, collect included.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::connector::{Connector, Job, JobName, MonitorJobs, Source, job_source_key};
use crate::extension::ExtensionRegistry;
use crate::telemetry::{CONNECTOR_ID_ATTRIBUTE, TelemetryStore, build_monitor_id};

use crate::strategy::engine::{EngineError, partition_monitor_jobs, record_job_duration};
use crate::strategy::mapping::{MappingInterpreter, resolve_mapping_table};
use crate::strategy::order::apply_execution_order;
use crate::strategy::source::SourceExecutor;

/// Runs the discovery-shaped jobs of one connector.
#[derive(Clone)]
pub struct DiscoveryExecutor {
    store: Arc<TelemetryStore>,
    registry: Arc<ExtensionRegistry>,
}

impl DiscoveryExecutor {
    pub fn new(store: Arc<TelemetryStore>, registry: Arc<ExtensionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Run the `job`-kind job of every monitor type the connector declares.
    ///
    /// Fixed-priority monitor types run first and sequentially, since later
    /// instances attach to them; the remaining types run concurrently unless
    /// the host is configured sequential.
    pub async fn run_connector(
        &self,
        connector: &Arc<Connector>,
        job: JobName,
        strategy_time: DateTime<Utc>,
    ) {
        let (prioritized, rest) = partition_monitor_jobs(connector);
        for jobs in prioritized {
            self.process_monitor_job(connector, jobs, job, strategy_time)
                .await;
        }

        if self.store.host().sequential {
            for jobs in rest {
                self.process_monitor_job(connector, jobs, job, strategy_time)
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
                        .process_monitor_job(&connector, jobs, job, strategy_time)
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

    /// One monitor type's job, bounded by the host job timeout.
    ///
    /// A timed-out job keeps whatever sources and monitors it already
    /// produced; the next cycle starts over from the connector definition.
    async fn process_monitor_job(
        &self,
        connector: &Arc<Connector>,
        jobs: &MonitorJobs,
        job: JobName,
        strategy_time: DateTime<Utc>,
    ) {
        let definition = match job {
            JobName::Simple => jobs.simple.as_ref(),
            _ => jobs.discovery.as_ref(),
        };
        let Some(definition) = definition else {
            return;
        };

        if !self.store.host().is_monitor_included(&jobs.monitor_type) {
            debug!(
                monitor_type = %jobs.monitor_type,
                "Monitor type filtered out by host configuration, job skipped"
            );
            return;
        }

        let started = Instant::now();
        let timeout = self.store.host().job_timeout;
        match tokio::time::timeout(
            timeout,
            self.run_job(connector, jobs, job, definition, strategy_time),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(
                connector_id = %connector.connector_id,
                monitor_type = %jobs.monitor_type,
                error = %e,
                "Job abandoned"
            ),
            Err(_) => warn!(
                connector_id = %connector.connector_id,
                monitor_type = %jobs.monitor_type,
                timeout = ?timeout,
                "Job timed out, partial results kept"
            ),
        }
        record_job_duration(
            &self.store,
            job.as_ref(),
            &jobs.monitor_type,
            &connector.connector_id,
            started,
            strategy_time,
        )
        .await;
    }

    /// Execute the job's sources, then create or refresh one monitor per
    /// mapping-table row.
    async fn run_job(
        &self,
        connector: &Arc<Connector>,
        jobs: &MonitorJobs,
        job: JobName,
        definition: &Job,
        strategy_time: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let connector_id = connector.connector_id.as_str();
        let executor = SourceExecutor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            connector_id,
        );

        let keyed: Vec<(String, Source)> =
            apply_execution_order(&definition.sources, &definition.execution_order)
                .into_iter()
                .map(|source| {
                    (
                        job_source_key(&jobs.monitor_type, job, &source.name),
                        source.clone(),
                    )
                })
                .collect();
        executor.execute_job(&keyed).await?;

        let table =
            resolve_mapping_table(&self.store, connector_id, &definition.mapping.source).await;
        if table.rows.is_empty() {
            debug!(
                connector_id,
                monitor_type = %jobs.monitor_type,
                "Mapping table empty, nothing to map"
            );
            return Ok(());
        }

        let mut mapped = 0usize;
        for row in &table.rows {
            let interpreter = MappingInterpreter::new(&definition.mapping, row);
            let mut attributes = interpreter.attributes();

            // Instance identity comes from the declared key attributes; a row
            // that cannot produce them all is unusable.
            let key_values: Vec<String> = jobs
                .keys
                .iter()
                .map(|key| attributes.get(key).cloned().unwrap_or_default())
                .collect();
            if key_values.iter().any(String::is_empty) {
                debug!(
                    connector_id,
                    monitor_type = %jobs.monitor_type,
                    keys = ?jobs.keys,
                    "Row does not fill every key attribute, skipped"
                );
                continue;
            }
            let key_refs: Vec<&str> = key_values.iter().map(String::as_str).collect();
            let monitor_id = build_monitor_id(connector_id, &jobs.monitor_type, &key_refs);

            attributes.insert(
                CONNECTOR_ID_ATTRIBUTE.to_string(),
                connector_id.to_string(),
            );
            self.store
                .upsert_monitor(&jobs.monitor_type, &monitor_id, attributes, strategy_time)
                .await;

            let metrics = interpreter.metrics();
            if !metrics.is_empty() {
                self.store
                    .with_monitor_mut(&jobs.monitor_type, &monitor_id, |monitor| {
                        for (key, value) in &metrics {
                            monitor.collect_metric(key, value, &connector.metrics, strategy_time);
                        }
                    })
                    .await;
            }
            mapped += 1;
        }
        info!(
            connector_id,
            monitor_type = %jobs.monitor_type,
            job = %job,
            rows = table.rows.len(),
            monitors = mapped,
            "Job mapped rows onto monitors"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::telemetry::Metric;

    fn store() -> Arc<TelemetryStore> {
        Arc::new(TelemetryStore::new(HostConfig::new("host-1")))
    }

    fn executor(store: &Arc<TelemetryStore>) -> DiscoveryExecutor {
        DiscoveryExecutor::new(Arc::clone(store), Arc::new(ExtensionRegistry::builtin()))
    }

    fn disk_connector() -> Arc<Connector> {
        let yaml = r#"
connector_id: disk-lib
metrics:
  disk.size:
    unit: By
monitors:
  - monitor_type: disk
    keys: [id]
    discovery:
      sources:
        - name: list
          type: static
          value: |-
            disk-0;WDC;3840
            disk-1;Seagate;7680
      mapping:
        source: "${source::monitors.disk.discovery.sources.list}"
        attributes:
          id: $1
          vendor: $2
          name: drive-$1
        metrics:
          disk.size: mebibytes2bytes($3)
"#;
        Arc::new(serde_yaml::from_str::<Connector>(yaml).unwrap())
    }

    // ===== discovery jobs =====

    #[tokio::test]
    async fn test_discovery_maps_rows_onto_monitors() {
        let store = store();
        let connector = disk_connector();
        executor(&store)
            .run_connector(&connector, JobName::Discovery, Utc::now())
            .await;

        let disks = store.monitors_of_type("disk").await;
        assert_eq!(disks.len(), 2);

        let id = build_monitor_id("disk-lib", "disk", &["disk-0"]);
        let disk = store.monitor("disk", &id).await.unwrap();
        assert_eq!(disk.attributes.get("vendor").map(String::as_str), Some("WDC"));
        assert_eq!(
            disk.attributes.get("name").map(String::as_str),
            Some("drive-disk-0")
        );
        assert_eq!(
            disk.attributes.get(CONNECTOR_ID_ATTRIBUTE).map(String::as_str),
            Some("disk-lib")
        );
    }

    #[tokio::test]
    async fn test_discovery_collects_mapped_metrics() {
        let store = store();
        executor(&store)
            .run_connector(&disk_connector(), JobName::Discovery, Utc::now())
            .await;

        let id = build_monitor_id("disk-lib", "disk", &["disk-1"]);
        let disk = store.monitor("disk", &id).await.unwrap();
        match disk.metrics.get("disk.size") {
            Some(Metric::Number(metric)) => {
                assert_eq!(metric.value, 7680.0 * 1_048_576.0);
                assert_eq!(metric.unit.as_deref(), Some("By"));
            }
            other => panic!("expected disk.size number metric, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rows_without_key_values_are_skipped() {
        let yaml = r#"
connector_id: c1
monitors:
  - monitor_type: fan
    keys: [id]
    discovery:
      sources:
        - name: list
          type: static
          value: |-
            fan-0;1200
            ;900
      mapping:
        source: "${source::monitors.fan.discovery.sources.list}"
        attributes:
          id: $1
"#;
        let connector = Arc::new(serde_yaml::from_str::<Connector>(yaml).unwrap());
        let store = store();
        executor(&store)
            .run_connector(&connector, JobName::Discovery, Utc::now())
            .await;

        assert_eq!(store.monitors_of_type("fan").await.len(), 1);
    }

    #[tokio::test]
    async fn test_rediscovery_refreshes_attributes_not_duplicates() {
        let store = store();
        let connector = disk_connector();
        let executor = executor(&store);

        executor
            .run_connector(&connector, JobName::Discovery, Utc::now())
            .await;
        executor
            .run_connector(&connector, JobName::Discovery, Utc::now())
            .await;

        assert_eq!(store.monitors_of_type("disk").await.len(), 2);
    }

    // ===== simple jobs =====

    #[tokio::test]
    async fn test_simple_job_only_runs_under_simple_kind() {
        let yaml = r#"
connector_id: c1
monitors:
  - monitor_type: service
    keys: [id]
    simple:
      sources:
        - name: list
          type: static
          value: "web;running;"
      mapping:
        source: "${source::monitors.service.simple.sources.list}"
        attributes:
          id: $1
          state: $2
"#;
        let connector = Arc::new(serde_yaml::from_str::<Connector>(yaml).unwrap());
        let store = store();
        let executor = executor(&store);

        executor
            .run_connector(&connector, JobName::Discovery, Utc::now())
            .await;
        assert!(store.monitors_of_type("service").await.is_empty());

        executor
            .run_connector(&connector, JobName::Simple, Utc::now())
            .await;
        assert_eq!(store.monitors_of_type("service").await.len(), 1);
    }

    // ===== host monitor filter =====

    #[tokio::test]
    async fn test_excluded_monitor_type_is_skipped() {
        let mut host = HostConfig::new("host-1");
        host.excluded_monitors.insert("disk".to_string());
        let store = Arc::new(TelemetryStore::new(host));

        executor(&store)
            .run_connector(&disk_connector(), JobName::Discovery, Utc::now())
            .await;

        assert!(store.monitors_of_type("disk").await.is_empty());
    }
}
