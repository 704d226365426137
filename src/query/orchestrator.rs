// src/query/orchestrator.rs
//! Multi-channel query: walks several channels under an outer concurrency
//! bound, isolates per-channel failures, and re-ranks the union globally.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};
use futures::FutureExt;
use metrics::{counter, histogram};
use serde::Deserialize;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use super::aggregator::{CutoffAggregator, ItemCache};
use crate::cache::TtlCache;
use crate::config::QueryConfig;
use crate::error::EngineError;
use crate::model::{rank_by_popularity, AggregateResult, ChannelQuery, ItemSummary, PerChannelStatus};
use crate::source::ItemSource;
use crate::telemetry::{
    ensure_metrics_described, CHANNEL_FAILURES_TOTAL, CHANNEL_WALK_MS, QUERY_CACHE_HITS_TOTAL,
};

pub const CANCELED_MESSAGE: &str = "canceled";

/// Every parameter that changes a per-channel result is part of the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub channel_id: String,
    pub cutoff_day: NaiveDate,
    pub top_n: usize,
    pub lookback_days: u32,
}

impl From<&ChannelQuery> for QueryKey {
    fn from(q: &ChannelQuery) -> Self {
        Self {
            channel_id: q.channel_id.clone(),
            cutoff_day: q.cutoff_day(),
            top_n: q.top_n,
            lookback_days: q.lookback_days,
        }
    }
}

pub type QueryCache = TtlCache<QueryKey, Vec<ItemSummary>>;

/// Query entry point payload.
#[derive(Debug, Clone, Deserialize)]
pub struct TopVideosRequest {
    pub channels: Vec<String>,
    #[serde(default)]
    pub top_n: Option<usize>,
    #[serde(default)]
    pub lookback_days: Option<u32>,
}

#[derive(Debug)]
enum ChannelOutcome {
    Done { items: Vec<ItemSummary>, cached: bool },
    Failed(String),
}

pub struct QueryEngine {
    aggregator: CutoffAggregator,
    results: Arc<QueryCache>,
    cfg: QueryConfig,
}

impl QueryEngine {
    pub fn new(source: Arc<dyn ItemSource>, cfg: &QueryConfig) -> Self {
        let cfg = cfg.clone().clamped();
        let items: Arc<ItemCache> = Arc::new(TtlCache::new());
        let aggregator = CutoffAggregator::new(
            source,
            items,
            cfg.item_inflight_limit,
            cfg.item_cache_ttl(),
        );
        Self {
            aggregator,
            results: Arc::new(TtlCache::new()),
            cfg,
        }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.cfg
    }

    /// Validate a request into per-channel queries plus the global top-N.
    pub fn plan(
        &self,
        req: &TopVideosRequest,
        now: DateTime<Utc>,
    ) -> Result<(Vec<ChannelQuery>, usize), EngineError> {
        let mut seen = HashSet::new();
        let channels = req
            .channels
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .filter(|c| seen.insert(c.to_string()))
            .collect::<Vec<_>>();
        if channels.is_empty() {
            return Err(EngineError::InvalidRequest(
                "at least one channel is required".to_string(),
            ));
        }

        let top_n = req
            .top_n
            .unwrap_or(10)
            .clamp(1, self.cfg.max_top_n.max(1));
        let lookback_days = req
            .lookback_days
            .unwrap_or(self.cfg.default_lookback_days)
            .max(1);

        let queries = channels
            .into_iter()
            .map(|c| ChannelQuery::new(c, top_n, lookback_days, now))
            .collect();
        Ok((queries, top_n))
    }

    pub async fn top_videos(
        &self,
        req: &TopVideosRequest,
        cancel: &CancellationToken,
    ) -> Result<AggregateResult, EngineError> {
        let (queries, top_n) = self.plan(req, Utc::now())?;
        Ok(self.run(queries, top_n, cancel).await)
    }

    /// Run every channel query and merge. Never fails: channel problems end
    /// up in the per-channel statuses and the `partial` flag.
    pub async fn run(
        &self,
        queries: Vec<ChannelQuery>,
        top_n: usize,
        cancel: &CancellationToken,
    ) -> AggregateResult {
        ensure_metrics_described();

        let total = queries.len();
        let channel_ids = queries.iter().map(|q| q.channel_id.clone()).collect::<Vec<_>>();
        let mut statuses: Vec<Option<PerChannelStatus>> = vec![None; total];
        let mut merged: Vec<ItemSummary> = Vec::new();

        let mut pending = queries.into_iter().enumerate();
        let mut running: JoinSet<(usize, ChannelOutcome)> = JoinSet::new();
        let walk_cancel = cancel.child_token();

        loop {
            while running.len() < self.cfg.channel_concurrency && !cancel.is_cancelled() {
                let Some((idx, query)) = pending.next() else {
                    break;
                };
                let task = run_channel(
                    self.aggregator.clone(),
                    Arc::clone(&self.results),
                    self.cfg.query_cache_ttl(),
                    self.cfg.channel_timeout(),
                    query,
                    walk_cancel.clone(),
                );
                running.spawn(async move {
                    let outcome = AssertUnwindSafe(task)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| ChannelOutcome::Failed("channel task panicked".into()));
                    (idx, outcome)
                });
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // Channels that already finished keep their results.
                    while let Some(joined) = running.try_join_next() {
                        settle(joined, &channel_ids, &mut statuses, &mut merged);
                    }
                    tracing::info!(
                        target: "query",
                        abandoned = running.len(),
                        "query canceled; abandoning in-flight channels"
                    );
                    running.abort_all();
                    break;
                }
                joined = running.join_next() => match joined {
                    Some(joined) => settle(joined, &channel_ids, &mut statuses, &mut merged),
                    None => break,
                },
            }
        }

        let channels = statuses
            .into_iter()
            .zip(channel_ids.iter())
            .map(|(st, id)| st.unwrap_or_else(|| PerChannelStatus::failed(id, CANCELED_MESSAGE)))
            .collect::<Vec<_>>();

        let mut seen = HashSet::new();
        merged.retain(|i| seen.insert(i.id.clone()));
        rank_by_popularity(&mut merged, top_n);

        let result = AggregateResult::assemble(merged, channels);
        tracing::info!(
            target: "query",
            channels = total,
            videos = result.videos.len(),
            partial = result.partial,
            "query finished"
        );
        result
    }

    /// Drop expired entries from both caches; returns (items, results) removed.
    pub fn purge_expired(&self) -> (usize, usize) {
        (
            self.aggregator.item_cache().purge_expired(),
            self.results.purge_expired(),
        )
    }
}

fn settle(
    joined: Result<(usize, ChannelOutcome), JoinError>,
    channel_ids: &[String],
    statuses: &mut [Option<PerChannelStatus>],
    merged: &mut Vec<ItemSummary>,
) {
    let (idx, outcome) = match joined {
        Ok(done) => done,
        Err(e) => {
            tracing::warn!(target: "query", error = %e, "channel task aborted");
            return;
        }
    };
    let channel_id = &channel_ids[idx];
    let status = match outcome {
        ChannelOutcome::Done { items, cached } => {
            let st = PerChannelStatus::ok(channel_id, items.len(), cached);
            merged.extend(items);
            st
        }
        ChannelOutcome::Failed(msg) => {
            counter!(CHANNEL_FAILURES_TOTAL).increment(1);
            tracing::warn!(target: "query", channel = %channel_id, error = %msg, "channel failed");
            PerChannelStatus::failed(channel_id, msg)
        }
    };
    statuses[idx] = Some(status);
}

async fn run_channel(
    aggregator: CutoffAggregator,
    results: Arc<QueryCache>,
    result_ttl: Duration,
    timeout: Duration,
    query: ChannelQuery,
    cancel: CancellationToken,
) -> ChannelOutcome {
    let key = QueryKey::from(&query);
    if let Some(items) = results.get(&key) {
        counter!(QUERY_CACHE_HITS_TOTAL).increment(1);
        return ChannelOutcome::Done {
            items,
            cached: true,
        };
    }

    let t0 = Instant::now();
    let outcome = match tokio::time::timeout(timeout, aggregator.walk(&query, &cancel)).await {
        Err(_) => ChannelOutcome::Failed(format!("timed out after {}s", timeout.as_secs())),
        Ok(Err(e)) => ChannelOutcome::Failed(e.to_string()),
        Ok(Ok(walk)) if walk.cancelled => ChannelOutcome::Failed(CANCELED_MESSAGE.to_string()),
        Ok(Ok(walk)) => {
            results.set(key, walk.items.clone(), result_ttl);
            ChannelOutcome::Done {
                items: walk.items,
                cached: false,
            }
        }
    };
    histogram!(CHANNEL_WALK_MS).record(t0.elapsed().as_secs_f64() * 1_000.0);
    outcome
}
