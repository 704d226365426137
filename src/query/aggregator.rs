// src/query/aggregator.rs
//! Cutoff-aware walk over one channel.
//!
//! Identifiers arrive newest first and are submitted to a bounded in-flight
//! set. Completions come back in any order, so a past-cutoff completion only
//! stops *submission*; everything already in flight is still awaited and its
//! fresh results kept. Nothing in flight is ever cancelled by the cutoff.
//!
//! Every resolved item check is settled before the next identifier is submitted.
//!
//! Overshoot: when the stop is observed at most `inflight_limit` items beyond
//! the last fresh one have been submitted (the first past-cutoff item plus up
//! to `inflight_limit - 1` siblings). For a channel whose first K items are
//! fresh that is at most K + `inflight_limit` upstream fetches.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use metrics::counter;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::cache::TtlCache;
use crate::error::FetchError;
use crate::model::{rank_by_popularity, ChannelQuery, ItemSummary};
use crate::pool::InFlight;
use crate::source::ItemSource;
use crate::telemetry::{ITEM_CACHE_HITS_TOTAL, ITEM_FETCH_ERRORS_TOTAL, ITEM_FETCH_TOTAL};

/// Shared item-metadata cache, keyed by item identifier.
pub type ItemCache = TtlCache<String, ItemSummary>;

/// Outcome of checking a single item.
#[derive(Debug)]
enum ItemCheck {
    Fresh { item: ItemSummary, cached: bool },
    PastCutoff { cached: bool },
    Failed,
}

/// What one channel walk produced.
#[derive(Debug, Clone, Default)]
pub struct ChannelWalk {
    /// Ranked, capped to the query's `top_n`.
    pub items: Vec<ItemSummary>,
    /// Items submitted to the in-flight set.
    pub submitted: usize,
    pub cache_hits: usize,
    pub failures: usize,
    pub stopped_at_cutoff: bool,
    pub cancelled: bool,
}

#[derive(Clone)]
pub struct CutoffAggregator {
    source: Arc<dyn ItemSource>,
    items: Arc<ItemCache>,
    inflight_limit: usize,
    item_ttl: Duration,
}

impl CutoffAggregator {
    pub fn new(
        source: Arc<dyn ItemSource>,
        items: Arc<ItemCache>,
        inflight_limit: usize,
        item_ttl: Duration,
    ) -> Self {
        Self {
            source,
            items,
            inflight_limit: inflight_limit.max(1),
            item_ttl,
        }
    }

    pub fn item_cache(&self) -> &Arc<ItemCache> {
        &self.items
    }

    pub fn inflight_limit(&self) -> usize {
        self.inflight_limit
    }

    /// Walk `query.channel_id` until the cutoff is observed, the sequence
    /// ends, or `cancel` fires. Only opening the sequence can fail; per-item
    /// failures are swallowed.
    pub async fn walk(
        &self,
        query: &ChannelQuery,
        cancel: &CancellationToken,
    ) -> Result<ChannelWalk, FetchError> {
        let mut ids = self.source.recent_item_ids(&query.channel_id).await?;
        let mut inflight: InFlight<ItemCheck> = InFlight::new(self.inflight_limit);
        let mut walk = ChannelWalk::default();
        let mut exhausted = false;

        loop {
            // Settle everything that already resolved, so a finished
            // past-cutoff check gates the refill below.
            while let Some(joined) = inflight.try_next() {
                walk.settle(joined, &query.channel_id, inflight.len());
            }

            while !walk.stopped_at_cutoff && !walk.cancelled && !exhausted && inflight.has_room() {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        walk.cancelled = true;
                        break;
                    }
                    next = ids.next() => next,
                };
                match next {
                    Some(Ok(id)) => inflight.submit(check_item(
                        Arc::clone(&self.source),
                        Arc::clone(&self.items),
                        self.item_ttl,
                        id,
                        query.cutoff,
                    )),
                    Some(Err(e)) => {
                        tracing::warn!(
                            target: "query",
                            channel = %query.channel_id,
                            error = %e,
                            "identifier sequence failed; treating as exhausted"
                        );
                        exhausted = true;
                    }
                    None => exhausted = true,
                }
            }

            let Some(joined) = inflight.next().await else {
                break;
            };
            walk.settle(joined, &query.channel_id, inflight.len());
        }

        walk.submitted = inflight.submitted();
        rank_by_popularity(&mut walk.items, query.top_n);
        tracing::debug!(
            target: "query",
            channel = %query.channel_id,
            kept = walk.items.len(),
            submitted = walk.submitted,
            cache_hits = walk.cache_hits,
            failures = walk.failures,
            "channel walk finished"
        );
        Ok(walk)
    }
}

impl ChannelWalk {
    fn settle(&mut self, joined: Result<ItemCheck, JoinError>, channel_id: &str, in_flight: usize) {
        match joined {
            Ok(ItemCheck::Fresh { item, cached }) => {
                if cached {
                    self.cache_hits += 1;
                }
                self.items.push(item);
            }
            Ok(ItemCheck::PastCutoff { cached }) => {
                if cached {
                    self.cache_hits += 1;
                }
                if !self.stopped_at_cutoff {
                    tracing::debug!(
                        target: "query",
                        channel = %channel_id,
                        in_flight,
                        "cutoff reached; draining in-flight fetches"
                    );
                }
                self.stopped_at_cutoff = true;
            }
            Ok(ItemCheck::Failed) => self.failures += 1,
            Err(e) => {
                self.failures += 1;
                tracing::warn!(target: "query", channel = %channel_id, error = %e, "item task aborted");
            }
        }
    }
}

fn classify(item: ItemSummary, cutoff: DateTime<Utc>, cached: bool) -> ItemCheck {
    if item.published_at < cutoff {
        ItemCheck::PastCutoff { cached }
    } else {
        ItemCheck::Fresh { item, cached }
    }
}

async fn check_item(
    source: Arc<dyn ItemSource>,
    cache: Arc<ItemCache>,
    ttl: Duration,
    id: String,
    cutoff: DateTime<Utc>,
) -> ItemCheck {
    if let Some(item) = cache.get(&id) {
        counter!(ITEM_CACHE_HITS_TOTAL).increment(1);
        return classify(item, cutoff, true);
    }

    counter!(ITEM_FETCH_TOTAL).increment(1);
    match source.fetch_item(&id).await {
        Ok(item) => {
            cache.set(id, item.clone(), ttl);
            classify(item, cutoff, false)
        }
        Err(e) => {
            counter!(ITEM_FETCH_ERRORS_TOTAL).increment(1);
            tracing::warn!(target: "query", item = %id, error = %e, "item fetch failed");
            ItemCheck::Failed
        }
    }
}
