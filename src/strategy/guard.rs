//! Per-connector serialization guard.
//!
//! Sources and criteria flagged `force_serialization` must not run
//! concurrently with each other against the same connector. The guard wraps
//! such an operation in the connector namespace's mutual-exclusion lock with
//! a bounded wait covering both acquisition and the operation itself; when
//! the bound elapses the caller-supplied default is returned instead of
//! blocking the whole cycle.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::telemetry::ConnectorNamespace;

/// Run `body` under the namespace's serialization lock.
///
/// Returns the body's output, or `default` when the lock plus body did not
/// finish within `wait`. Cancelling the body releases the lock, so a timed-out
/// holder never wedges later acquisitions.
pub async fn run_serialized<T, F>(
    namespace: &ConnectorNamespace,
    connector_id: &str,
    operation: &str,
    wait: Duration,
    default: T,
    body: F,
) -> T
where
    F: Future<Output = T>,
{
    let guarded = async {
        let _lock = namespace.guard().lock().await;
        body.await
    };

    match tokio::time::timeout(wait, guarded).await {
        Ok(value) => value,
        Err(_) => {
            warn!(
                connector_id,
                operation,
                wait = %humantime::format_duration(wait),
                "Serialized operation timed out, using default result"
            );
            default
        }
    }
}
