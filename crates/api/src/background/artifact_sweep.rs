//! Periodic eviction of expired processed videos.
//!
//! Runs [`ArtifactStore::sweep_expired`] in a loop: after a successful
//! cycle it waits the poll interval, after a failed one the shorter
//! backoff. Failures are logged and never end the loop. Cancellation is
//! observed between cycles, never in the middle of one.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use vidsight_core::store::ArtifactStore;

/// Run the artifact sweep loop until `cancel` is triggered.
pub async fn run(
    store: Arc<ArtifactStore>,
    interval: Duration,
    backoff: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        root = %store.root().display(),
        ttl_secs = store.ttl().as_secs(),
        interval_secs = interval.as_secs(),
        backoff_secs = backoff.as_secs(),
        "Artifact sweep started"
    );

    while !cancel.is_cancelled() {
        let pause = match store.sweep_expired().await {
            Ok(report) => {
                if report.deleted.is_empty() {
                    tracing::debug!(scanned = report.scanned, "Artifact sweep: nothing expired");
                } else {
                    tracing::info!(
                        scanned = report.scanned,
                        deleted = report.deleted.len(),
                        failed = report.failed,
                        "Artifact sweep: removed expired artifacts"
                    );
                }
                interval
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    retry_secs = backoff.as_secs(),
                    "Artifact sweep failed, retrying after backoff"
                );
                backoff
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    tracing::info!("Artifact sweep stopping");
}
