// src/source/mod.rs
//! Upstream item source contract and the bundled implementations.

pub mod fixture;
pub mod mock;

use futures::stream::BoxStream;

use crate::error::FetchError;
use crate::model::{Enrichment, ItemSummary};

/// Lazy, recency-descending sequence of item identifiers for one channel.
/// Consumers may drop it at any point without draining it.
pub type IdStream = BoxStream<'static, Result<String, FetchError>>;

#[async_trait::async_trait]
pub trait ItemSource: Send + Sync {
    /// Open the channel's identifier sequence, newest first.
    async fn recent_item_ids(&self, channel_id: &str) -> Result<IdStream, FetchError>;

    async fn fetch_item(&self, item_id: &str) -> Result<ItemSummary, FetchError>;

    /// Detail payload used by enrichment jobs.
    async fn fetch_enrichment(&self, item_id: &str) -> Result<Enrichment, FetchError>;

    fn name(&self) -> &'static str;
}
