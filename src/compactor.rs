use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a property's WAL once enough appends piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    run_compactor_every(engine, threshold, CHECK_INTERVAL).await
}

async fn run_compactor_every(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// `true` when a compaction ran and succeeded.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}
