// src/source/mock.rs
//! Programmable in-memory source for tests and local experiments.
//!
//! Counts every call so tests can assert on upstream traffic, and can be told
//! to fail channels or items, delay responses, or start rate limiting at the
//! Nth enrichment call.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};

use super::{IdStream, ItemSource};
use crate::error::FetchError;
use crate::model::{Enrichment, ItemSummary};

#[derive(Default)]
pub struct MockSource {
    channels: HashMap<String, Vec<ItemSummary>>,
    failing_channels: HashSet<String>,
    failing_items: HashSet<String>,
    fetch_delay: Duration,
    item_delays: HashMap<String, Duration>,
    enrich_delay: Duration,
    rate_limit_from_call: Option<usize>,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    enrich_calls: AtomicUsize,
    ids_pulled: Arc<AtomicUsize>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel; `items` must already be newest first.
    pub fn with_channel(mut self, channel_id: &str, items: Vec<ItemSummary>) -> Self {
        self.channels.insert(channel_id.to_string(), items);
        self
    }

    pub fn with_failing_channel(mut self, channel_id: &str) -> Self {
        self.failing_channels.insert(channel_id.to_string());
        self
    }

    pub fn with_failing_item(mut self, item_id: &str) -> Self {
        self.failing_items.insert(item_id.to_string());
        self
    }

    pub fn with_fetch_delay(mut self, d: Duration) -> Self {
        self.fetch_delay = d;
        self
    }

    /// Extra latency for one item's metadata fetch, to force out-of-order
    /// completion.
    pub fn with_item_delay(mut self, item_id: &str, d: Duration) -> Self {
        self.item_delays.insert(item_id.to_string(), d);
        self
    }

    pub fn with_enrich_delay(mut self, d: Duration) -> Self {
        self.enrich_delay = d;
        self
    }

    /// Enrichment call number `n` (1-based) and every later one answer
    /// `RateLimited`.
    pub fn rate_limit_from_call(mut self, n: usize) -> Self {
        self.rate_limit_from_call = Some(n);
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn enrich_calls(&self) -> usize {
        self.enrich_calls.load(Ordering::SeqCst)
    }

    /// Identifiers pulled from all opened sequences.
    pub fn ids_pulled(&self) -> usize {
        self.ids_pulled.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ItemSource for MockSource {
    async fn recent_item_ids(&self, channel_id: &str) -> Result<IdStream, FetchError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_channels.contains(channel_id) {
            return Err(FetchError::Transient(format!("channel {channel_id} unavailable")));
        }
        let ids = self
            .channels
            .get(channel_id)
            .ok_or_else(|| FetchError::NotFound(channel_id.to_string()))?
            .iter()
            .map(|i| i.id.clone())
            .collect::<Vec<_>>();
        let pulled = Arc::clone(&self.ids_pulled);
        Ok(stream::iter(ids)
            .map(move |id| {
                pulled.fetch_add(1, Ordering::SeqCst);
                Ok(id)
            })
            .boxed())
    }

    async fn fetch_item(&self, item_id: &str) -> Result<ItemSummary, FetchError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }
        if let Some(d) = self.item_delays.get(item_id) {
            tokio::time::sleep(*d).await;
        }
        if self.failing_items.contains(item_id) {
            return Err(FetchError::Transient(format!("item {item_id} failed")));
        }
        self.channels
            .values()
            .flat_map(|v| v.iter())
            .find(|i| i.id == item_id)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(item_id.to_string()))
    }

    async fn fetch_enrichment(&self, item_id: &str) -> Result<Enrichment, FetchError> {
        let call = self.enrich_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.enrich_delay.is_zero() {
            tokio::time::sleep(self.enrich_delay).await;
        }
        if self.rate_limit_from_call.is_some_and(|n| call >= n) {
            return Err(FetchError::RateLimited);
        }
        if self.failing_items.contains(item_id) {
            return Err(FetchError::Transient(format!("item {item_id} failed")));
        }
        Ok(Enrichment {
            views: 1_000 + item_id.len() as u64,
            likes: Some(10),
            comments: Some(1),
            duration_secs: Some(300),
            tags: vec!["mock".to_string()],
            fetched_at: Utc::now(),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Build a newest-first channel: `fresh` items within the last few hours,
/// followed by `stale` items a year old. Views grow with the index so every
/// item has a distinct popularity.
pub fn synthetic_channel(
    channel_id: &str,
    now: DateTime<Utc>,
    fresh: usize,
    stale: usize,
) -> Vec<ItemSummary> {
    let mut out = Vec::with_capacity(fresh + stale);
    for i in 0..fresh + stale {
        let published_at = if i < fresh {
            now - ChronoDuration::hours(i as i64 + 1)
        } else {
            now - ChronoDuration::days(365) - ChronoDuration::hours(i as i64)
        };
        out.push(ItemSummary {
            id: format!("{channel_id}-v{i}"),
            title: format!("{channel_id} video {i}"),
            channel_id: channel_id.to_string(),
            channel_title: channel_id.to_uppercase(),
            views: 100 * (i as u64 + 1),
            published_at,
            thumbnail: None,
        });
    }
    out
}
