//! Background replay-record cleanup task.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::redb_store::RedbStore;

/// Default cleanup interval in seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

/// Spawn a task that periodically evicts expired replay records.
///
/// Returns a `JoinHandle` that can be used to abort the task.
pub fn spawn_replay_cleanup(
    store: Arc<RedbStore>,
    cleanup_interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(cleanup_interval_secs.max(1)));

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let sweep = Arc::clone(&store);
            let result = tokio::task::spawn_blocking(move || {
                let evicted = sweep.evict_expired_assertions()?;
                Ok::<_, anyhow::Error>((evicted, sweep.assertion_count()?))
            })
            .await;

            match result {
                Ok(Ok((0, remaining))) => {
                    debug!(tracked_assertions = remaining, "Replay cleanup: nothing expired")
                }
                Ok(Ok((count, remaining))) => {
                    info!(evicted = count, tracked_assertions = remaining, "Replay cleanup completed")
                }
                Ok(Err(e)) => warn!(error = %e, "Replay cleanup failed"),
                Err(e) => warn!(error = %e, "Replay cleanup task panicked"),
            }
        }
    })
}
