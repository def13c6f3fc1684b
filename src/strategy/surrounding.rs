//! Surrounding sources: the pre, before-all and after-all phases.
//!
//! Connectors may declare sources that run outside the monitor-type loop:
//! `pre` sources execute ahead of detection so criteria can reference their
//! tables, `before_all` sources open each cycle's job run, and `after_all`
//! sources close it. Each phase is an ordinary dependency-ordered source job;
//! its tables land in the connector namespace under `<phase>.<name>` keys.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::connector::{Connector, Source, SurroundingPhase, surrounding_source_key};
use crate::extension::ExtensionRegistry;
use crate::strategy::source::SourceExecutor;
use crate::telemetry::TelemetryStore;

/// Runs one connector's surrounding source phases.
#[derive(Debug, Clone)]
pub struct SurroundingExecutor {
    executor: SourceExecutor,
    connector_id: String,
}

impl SurroundingExecutor {
    /// Create a surrounding executor for one connector.
    pub fn new(
        store: Arc<TelemetryStore>,
        registry: Arc<ExtensionRegistry>,
        connector_id: impl Into<String>,
    ) -> Self {
        let connector_id = connector_id.into();
        Self {
            executor: SourceExecutor::new(store, registry, connector_id.clone()),
            connector_id,
        }
    }

    /// Run the connector's `pre` sources.
    pub async fn run_pre(&self, connector: &Connector) {
        self.run_phase(SurroundingPhase::Pre, &connector.pre).await;
    }

    /// Run the connector's `before_all` sources.
    pub async fn run_before_all(&self, connector: &Connector) {
        self.run_phase(SurroundingPhase::BeforeAll, &connector.before_all)
            .await;
    }

    /// Run the connector's `after_all` sources.
    pub async fn run_after_all(&self, connector: &Connector) {
        self.run_phase(SurroundingPhase::AfterAll, &connector.after_all)
            .await;
    }

    async fn run_phase(&self, phase: SurroundingPhase, sources: &[Source]) {
        if sources.is_empty() {
            return;
        }
        debug!(
            connector_id = %self.connector_id,
            phase = %phase,
            sources = sources.len(),
            "Running surrounding sources"
        );

        let keyed: Vec<(String, Source)> = sources
            .iter()
            .map(|source| (surrounding_source_key(phase, &source.name), source.clone()))
            .collect();
        if let Err(e) = self.executor.execute_job(&keyed).await {
            warn!(
                connector_id = %self.connector_id,
                phase = %phase,
                error = %e,
                "Surrounding phase abandoned"
            );
        }
    }
}
