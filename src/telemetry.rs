//! In-memory telemetry model: monitors, metrics and the shared store.
//!
//! Everything the strategies read or write between cycles lives here. The
//! [`TelemetryStore`] is the single shared-state object of the engine; the
//! rest of this module is plain data.

mod metric;
mod monitor;
mod store;

pub use metric::{
    Metric, NumberMetric, StateSetMetric, estimate_energy_from_power, parse_metric_name,
};
pub use monitor::{
    CONNECTOR_ID_ATTRIBUTE, CONNECTOR_MONITOR_TYPE, HOST_MONITOR_TYPE, Monitor, build_monitor_id,
};
pub use store::{ConnectorNamespace, TelemetrySnapshot, TelemetryStore};
