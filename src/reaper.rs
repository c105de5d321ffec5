//! Background maintenance loops: revoked-token sweeping and WAL compaction.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::auth::{RevokedTokens, now_secs};
use crate::engine::Engine;

/// Periodically drop revoked tokens whose natural expiry has passed —
/// an expired token fails verification on its own, so the store only
/// has to remember live ones.
pub async fn run_token_sweeper(revoked: Arc<RevokedTokens>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let dropped = revoked.sweep(now_secs());
        if dropped > 0 {
            info!("swept {dropped} expired revoked tokens");
        }
    }
}

/// Rewrite the WAL from live state once enough appends have accumulated.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("compacted WAL"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
