// src/model.rs
//! Value types shared by the query engine, the job manager and the API.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Metadata for a single video as produced by the item source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemSummary {
    pub id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_title: String,
    /// Popularity score (view count).
    pub views: u64,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

/// Detail payload fetched for a stored video during an enrichment pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Enrichment {
    pub views: u64,
    #[serde(default)]
    pub likes: Option<u64>,
    #[serde(default)]
    pub comments: Option<u64>,
    #[serde(default)]
    pub duration_secs: Option<u32>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

/// One channel's share of a query. The cutoff is fixed at construction so
/// every fetch of the walk is judged against the same instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelQuery {
    pub channel_id: String,
    pub top_n: usize,
    pub lookback_days: u32,
    pub cutoff: DateTime<Utc>,
}

impl ChannelQuery {
    pub fn new(channel_id: impl Into<String>, top_n: usize, lookback_days: u32, now: DateTime<Utc>) -> Self {
        Self {
            channel_id: channel_id.into(),
            top_n,
            lookback_days,
            cutoff: now - Duration::days(i64::from(lookback_days)),
        }
    }

    /// Cutoff bucketed to the day, used in the query cache key.
    pub fn cutoff_day(&self) -> NaiveDate {
        self.cutoff.date_naive()
    }

    pub fn is_past_cutoff(&self, published_at: DateTime<Utc>) -> bool {
        published_at < self.cutoff
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PerChannelStatus {
    pub channel_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub count: usize,
    /// Served from the query cache without walking the channel.
    #[serde(default)]
    pub cached: bool,
}

impl PerChannelStatus {
    pub fn ok(channel_id: &str, count: usize, cached: bool) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            success: true,
            message: None,
            count,
            cached,
        }
    }

    pub fn failed(channel_id: &str, message: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            success: false,
            message: Some(message.into()),
            count: 0,
            cached: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateResult {
    pub videos: Vec<ItemSummary>,
    pub generated_at: DateTime<Utc>,
    pub partial: bool,
    pub channels: Vec<PerChannelStatus>,
}

impl AggregateResult {
    /// Build a result from per-channel outputs; `partial` follows the statuses.
    pub fn assemble(videos: Vec<ItemSummary>, channels: Vec<PerChannelStatus>) -> Self {
        let partial = channels.iter().any(|c| !c.success);
        Self {
            videos,
            generated_at: Utc::now(),
            partial,
            channels,
        }
    }
}

/// Sort by popularity (desc) and keep the first `top_n`.
///
/// Ties fall back to newer first, then identifier, so identical inputs always
/// rank identically.
pub fn rank_by_popularity(items: &mut Vec<ItemSummary>, top_n: usize) {
    items.sort_by(|a, b| {
        b.views
            .cmp(&a.views)
            .then_with(|| b.published_at.cmp(&a.published_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    items.truncate(top_n);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(id: &str, views: u64, day: u32) -> ItemSummary {
        ItemSummary {
            id: id.into(),
            title: format!("title {id}"),
            channel_id: "c".into(),
            channel_title: "C".into(),
            views,
            published_at: Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap(),
            thumbnail: None,
        }
    }

    #[test]
    fn ranking_is_descending_truncated_and_deterministic() {
        let mut v = vec![
            item("a", 10, 1),
            item("b", 30, 2),
            item("c", 30, 3),
            item("d", 5, 4),
            item("e", 30, 3),
        ];
        rank_by_popularity(&mut v, 4);
        let ids: Vec<_> = v.iter().map(|i| i.id.as_str()).collect();
        // ties: newer first, then id
        assert_eq!(ids, vec!["c", "e", "b", "a"]);
    }

    #[test]
    fn cutoff_is_now_minus_days() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let q = ChannelQuery::new("chan", 5, 7, now);
        assert_eq!(q.cutoff, Utc.with_ymd_and_hms(2026, 3, 3, 12, 0, 0).unwrap());
        assert!(q.is_past_cutoff(Utc.with_ymd_and_hms(2026, 3, 3, 11, 59, 59).unwrap()));
        assert!(!q.is_past_cutoff(q.cutoff));
        assert_eq!(q.cutoff_day(), NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
    }

    #[test]
    fn partial_flag_follows_statuses() {
        let ok = AggregateResult::assemble(vec![], vec![PerChannelStatus::ok("a", 0, false)]);
        assert!(!ok.partial);
        let bad = AggregateResult::assemble(
            vec![],
            vec![
                PerChannelStatus::ok("a", 0, false),
                PerChannelStatus::failed("b", "boom"),
            ],
        );
        assert!(bad.partial);
    }
}
