//! Periodic pruning of expired entries

use crate::cache::BlobCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Default interval between prune runs: two hours
pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(2 * 60 * 60);

/// Spawn the pruning loop.
///
/// Each run is awaited before the next tick is taken, so runs never overlap.
/// A failed run is logged and the loop keeps going. The task ends when
/// `shutdown` is cancelled.
///
/// # Panics
///
/// Panics if `every` is zero.
pub fn spawn_pruner(
    cache: Arc<BlobCache>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    assert!(!every.is_zero(), "prune interval must be non-zero");

    tokio::spawn(async move {
        info!(interval_secs = every.as_secs(), "Cache pruner started");

        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match cache.prune().await {
                Ok(pruned) => debug!(pruned, "Scheduled prune finished"),
                Err(e) => error!(error = %e, "Scheduled prune failed"),
            }
        }

        info!("Cache pruner stopped");
    })
}
