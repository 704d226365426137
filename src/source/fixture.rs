// src/source/fixture.rs
//! Item source backed by a JSON fixture file. Used by the binary for local
//! runs and demos; channels are served newest first regardless of file order.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Deserialize;

use super::{IdStream, ItemSource};
use crate::error::FetchError;
use crate::model::{Enrichment, ItemSummary};

#[derive(Debug, Deserialize)]
struct FixtureFile {
    channels: Vec<FixtureChannel>,
}

#[derive(Debug, Deserialize)]
struct FixtureChannel {
    id: String,
    title: String,
    #[serde(default)]
    videos: Vec<FixtureVideo>,
}

#[derive(Debug, Deserialize)]
struct FixtureVideo {
    id: String,
    title: String,
    views: u64,
    published_at: DateTime<Utc>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    likes: Option<u64>,
    #[serde(default)]
    comments: Option<u64>,
    #[serde(default)]
    duration_secs: Option<u32>,
    #[serde(default)]
    tags: Vec<String>,
}

pub struct FixtureSource {
    channels: HashMap<String, Vec<String>>,
    items: HashMap<String, (ItemSummary, FixtureVideo)>,
}

impl FixtureSource {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixture from {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("parsing fixture {}", path.display()))
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let file: FixtureFile = serde_json::from_str(s)?;
        let mut channels = HashMap::new();
        let mut items = HashMap::new();

        for ch in file.channels {
            let mut videos = ch.videos;
            videos.sort_by(|a, b| b.published_at.cmp(&a.published_at));
            let ids = videos.iter().map(|v| v.id.clone()).collect::<Vec<_>>();
            for v in videos {
                let summary = ItemSummary {
                    id: v.id.clone(),
                    title: v.title.clone(),
                    channel_id: ch.id.clone(),
                    channel_title: ch.title.clone(),
                    views: v.views,
                    published_at: v.published_at,
                    thumbnail: v.thumbnail.clone(),
                };
                items.insert(v.id.clone(), (summary, v));
            }
            channels.insert(ch.id, ids);
        }

        tracing::info!(
            target: "source",
            channels = channels.len(),
            items = items.len(),
            "fixture source loaded"
        );
        Ok(Self { channels, items })
    }

    /// An empty source; every channel is unknown.
    pub fn empty() -> Self {
        Self {
            channels: HashMap::new(),
            items: HashMap::new(),
        }
    }
}

#[async_trait::async_trait]
impl ItemSource for FixtureSource {
    async fn recent_item_ids(&self, channel_id: &str) -> Result<IdStream, FetchError> {
        let ids = self
            .channels
            .get(channel_id)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(channel_id.to_string()))?;
        Ok(stream::iter(ids.into_iter().map(Ok)).boxed())
    }

    async fn fetch_item(&self, item_id: &str) -> Result<ItemSummary, FetchError> {
        self.items
            .get(item_id)
            .map(|(s, _)| s.clone())
            .ok_or_else(|| FetchError::NotFound(item_id.to_string()))
    }

    async fn fetch_enrichment(&self, item_id: &str) -> Result<Enrichment, FetchError> {
        let (summary, v) = self
            .items
            .get(item_id)
            .ok_or_else(|| FetchError::NotFound(item_id.to_string()))?;
        Ok(Enrichment {
            views: summary.views,
            likes: v.likes,
            comments: v.comments,
            duration_secs: v.duration_secs,
            tags: v.tags.clone(),
            fetched_at: Utc::now(),
        })
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
