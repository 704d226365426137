// src/lib.rs
// Public library surface for integration tests (and the binary).

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod pool;
pub mod source;
pub mod telemetry;

// Channel queries: cutoff-aware walk + multi-channel orchestration
pub mod query;

// Background enrichment jobs and the library store
pub mod enrich;

pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::EngineConfig;
pub use crate::enrich::JobManager;
pub use crate::query::QueryEngine;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Periodically drop expired cache entries so long-running processes do not
/// accumulate dead keys. Stops when `shutdown` is cancelled.
pub fn spawn_cache_janitor(
    queries: Arc<QueryEngine>,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let (items, results) = queries.purge_expired();
                    if items + results > 0 {
                        tracing::debug!(target: "query", items, results, "purged expired cache entries");
                    }
                }
            }
        }
    })
}
