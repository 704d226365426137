// src/telemetry.rs
//! Metric series names and one-time registration so the series show up on
//! `/metrics` before their first increment.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub const ITEM_FETCH_TOTAL: &str = "digest_item_fetch_total";
pub const ITEM_FETCH_ERRORS_TOTAL: &str = "digest_item_fetch_errors_total";
pub const ITEM_CACHE_HITS_TOTAL: &str = "digest_item_cache_hits_total";
pub const QUERY_CACHE_HITS_TOTAL: &str = "digest_query_cache_hits_total";
pub const CHANNEL_FAILURES_TOTAL: &str = "digest_channel_failures_total";
pub const CHANNEL_WALK_MS: &str = "digest_channel_walk_ms";
pub const ENRICH_ITEMS_TOTAL: &str = "digest_enrich_items_total";
pub const ENRICH_FAILURES_TOTAL: &str = "digest_enrich_failures_total";
pub const ENRICH_RATE_LIMITED_TOTAL: &str = "digest_enrich_rate_limited_total";
pub const ENRICH_CHECKPOINTS_TOTAL: &str = "digest_enrich_checkpoints_total";
pub const ENRICH_CHECKPOINT_FAILURES_TOTAL: &str = "digest_enrich_checkpoint_failures_total";
pub const ENRICH_RUNNING_JOBS: &str = "digest_enrich_running_jobs";

pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(ITEM_FETCH_TOTAL, "Item metadata fetches sent upstream.");
        describe_counter!(ITEM_FETCH_ERRORS_TOTAL, "Item metadata fetches that failed.");
        describe_counter!(
            ITEM_CACHE_HITS_TOTAL,
            "Item metadata served from the item cache."
        );
        describe_counter!(
            QUERY_CACHE_HITS_TOTAL,
            "Per-channel results served from the query cache."
        );
        describe_counter!(CHANNEL_FAILURES_TOTAL, "Channels that failed within a query.");
        describe_histogram!(CHANNEL_WALK_MS, "Time spent walking one channel, in milliseconds.");
        describe_counter!(ENRICH_ITEMS_TOTAL, "Items enriched by background jobs.");
        describe_counter!(ENRICH_FAILURES_TOTAL, "Enrichment fetches that failed.");
        describe_counter!(
            ENRICH_RATE_LIMITED_TOTAL,
            "Enrichment jobs halted by upstream rate limiting."
        );
        describe_counter!(ENRICH_CHECKPOINTS_TOTAL, "Library checkpoints written.");
        describe_counter!(
            ENRICH_CHECKPOINT_FAILURES_TOTAL,
            "Library checkpoints the store rejected."
        );
        describe_gauge!(ENRICH_RUNNING_JOBS, "Enrichment jobs currently running.");
    });
}
