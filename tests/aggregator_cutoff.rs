// tests/aggregator_cutoff.rs
//
// Cutoff walk over a single channel against the programmable mock source.
//
// Covered:
// - exact fresh set returned, fetch count bounded by K + in-flight limit
// - out-of-order completion never loses fresh items
// - item cache short-circuits the network on a second walk
// - per-item failures are swallowed
// - ranking and top-N cap
// - settled stale results gate the next submission
// - oversized TTLs

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use channel_digest::model::{ChannelQuery, ItemSummary};
use channel_digest::query::{CutoffAggregator, ItemCache};
use channel_digest::source::mock::{synthetic_channel, MockSource};

fn aggregator(source: Arc<MockSource>, limit: usize) -> CutoffAggregator {
    CutoffAggregator::new(
        source,
        Arc::new(ItemCache::new()),
        limit,
        Duration::from_secs(3600),
    )
}

fn ids(items: &[ItemSummary]) -> HashSet<String> {
    items.iter().map(|i| i.id.clone()).collect()
}

#[tokio::test]
async fn returns_exactly_the_fresh_items_with_bounded_overshoot() {
    let now = Utc::now();
    let (fresh, stale, limit) = (5usize, 30usize, 3usize);
    let items = synthetic_channel("chan", now, fresh, stale);
    let expected = ids(&items[..fresh]);
    let source = Arc::new(MockSource::new().with_channel("chan", items));

    let agg = aggregator(Arc::clone(&source), limit);
    let query = ChannelQuery::new("chan", 50, 7, now);
    let walk = agg.walk(&query, &CancellationToken::new()).await.unwrap();

    assert_eq!(ids(&walk.items), expected, "exactly the fresh items");
    assert!(walk.stopped_at_cutoff);
    assert!(
        source.fetch_calls() <= fresh + limit,
        "fetched {} items, bound is {}",
        source.fetch_calls(),
        fresh + limit
    );
    assert!(source.ids_pulled() <= fresh + limit);
    assert_eq!(walk.submitted, source.fetch_calls());
}

#[tokio::test]
async fn slow_fresh_item_is_still_collected_after_stop() {
    let now = Utc::now();
    let items = synthetic_channel("chan", now, 4, 20);
    let expected = ids(&items[..4]);
    // the newest item resolves long after the stale ones
    let source = Arc::new(
        MockSource::new()
            .with_channel("chan", items)
            .with_item_delay("chan-v0", Duration::from_millis(150)),
    );

    let agg = aggregator(Arc::clone(&source), 3);
    let walk = agg
        .walk(&ChannelQuery::new("chan", 50, 7, now), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ids(&walk.items), expected);
    assert!(walk.stopped_at_cutoff);
    assert!(source.fetch_calls() <= 4 + 3);
}

#[tokio::test]
async fn second_walk_is_served_from_item_cache() {
    let now = Utc::now();
    let source = Arc::new(
        MockSource::new().with_channel("chan", synthetic_channel("chan", now, 3, 10)),
    );
    let agg = aggregator(Arc::clone(&source), 2);
    let query = ChannelQuery::new("chan", 10, 7, now);

    let first = agg.walk(&query, &CancellationToken::new()).await.unwrap();
    let fetched = source.fetch_calls();
    let second = agg.walk(&query, &CancellationToken::new()).await.unwrap();

    assert_eq!(source.fetch_calls(), fetched, "no new upstream fetches");
    assert_eq!(first.items, second.items);
    assert!(second.cache_hits >= 3);
    assert_eq!(source.list_calls(), 2);
}

#[tokio::test]
async fn failing_item_is_swallowed_and_walk_continues() {
    let now = Utc::now();
    let source = Arc::new(
        MockSource::new()
            .with_channel("chan", synthetic_channel("chan", now, 6, 5))
            .with_failing_item("chan-v2"),
    );
    let agg = aggregator(Arc::clone(&source), 2);
    let walk = agg
        .walk(&ChannelQuery::new("chan", 10, 7, now), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(walk.failures, 1);
    assert_eq!(walk.items.len(), 5);
    assert!(!ids(&walk.items).contains("chan-v2"));
    assert!(walk.stopped_at_cutoff);
}

#[tokio::test]
async fn exhausted_channel_without_stale_items() {
    let now = Utc::now();
    let source = Arc::new(
        MockSource::new().with_channel("chan", synthetic_channel("chan", now, 4, 0)),
    );
    let agg = aggregator(Arc::clone(&source), 6);
    let walk = agg
        .walk(&ChannelQuery::new("chan", 10, 7, now), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(walk.items.len(), 4);
    assert!(!walk.stopped_at_cutoff);
    assert_eq!(source.fetch_calls(), 4);
}

#[tokio::test]
async fn results_are_ranked_and_capped() {
    let now = Utc::now();
    let source = Arc::new(
        MockSource::new().with_channel("chan", synthetic_channel("chan", now, 8, 2)),
    );
    let agg = aggregator(Arc::clone(&source), 3);
    let walk = agg
        .walk(&ChannelQuery::new("chan", 3, 7, now), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(walk.items.len(), 3);
    assert!(walk.items.windows(2).all(|w| w[0].views >= w[1].views));
    // views grow with index: the three oldest fresh items win
    let got: Vec<_> = walk.items.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(got, vec!["chan-v7", "chan-v6", "chan-v5"]);
}

#[tokio::test]
async fn unknown_channel_fails_the_walk() {
    let agg = aggregator(Arc::new(MockSource::new()), 3);
    let res = agg
        .walk(&ChannelQuery::new("nope", 3, 7, Utc::now()), &CancellationToken::new())
        .await;
    assert!(res.is_err());
}

#[tokio::test]
async fn cancelled_walk_stops_submitting_but_drains() {
    let now = Utc::now();
    let source = Arc::new(
        MockSource::new()
            .with_channel("chan", synthetic_channel("chan", now, 50, 0))
            .with_fetch_delay(Duration::from_millis(20)),
    );
    let agg = aggregator(Arc::clone(&source), 2);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let walk = agg
        .walk(&ChannelQuery::new("chan", 100, 7, now), &cancel)
        .await
        .unwrap();
    assert!(walk.cancelled);
    assert!(source.fetch_calls() < 50);
    // in-flight work was awaited, not dropped
    assert_eq!(walk.items.len() + walk.failures, walk.submitted);
}

#[tokio::test]
async fn finished_stale_result_stops_refill_immediately() {
    let now = Utc::now();
    let items = synthetic_channel("chan", now, 2, 10);
    let expected = ids(&items[..2]);
    // v1 (fresh) and v2 (stale) resolve together while v0 is still pending
    let source = Arc::new(
        MockSource::new()
            .with_channel("chan", items)
            .with_item_delay("chan-v0", Duration::from_millis(100)),
    );

    let agg = aggregator(Arc::clone(&source), 3);
    let walk = agg
        .walk(&ChannelQuery::new("chan", 10, 7, now), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ids(&walk.items), expected);
    assert!(walk.stopped_at_cutoff);
    assert_eq!(source.fetch_calls(), 3, "no identifier submitted after the stale result");
}

#[tokio::test]
async fn unbounded_item_ttl_keeps_every_fresh_item() {
    let now = Utc::now();
    let source = Arc::new(
        MockSource::new().with_channel("chan", synthetic_channel("chan", now, 4, 3)),
    );
    let agg = CutoffAggregator::new(
        source.clone(),
        Arc::new(ItemCache::new()),
        3,
        Duration::from_secs(u64::MAX),
    );
    let query = ChannelQuery::new("chan", 10, 7, now);

    let first = agg.walk(&query, &CancellationToken::new()).await.unwrap();
    assert_eq!(first.items.len(), 4);
    assert_eq!(first.failures, 0);

    let fetched = source.fetch_calls();
    let second = agg.walk(&query, &CancellationToken::new()).await.unwrap();
    assert_eq!(second.items, first.items);
    assert_eq!(source.fetch_calls(), fetched, "entries were cached");
}
