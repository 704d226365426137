// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /api/top-videos (200 + body shape, 400 on empty channel list)
// - POST/GET /api/collections/{id}/enrich (202, 200, 404)

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::json;
use serde_json::Value as Json;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt as _; // for `oneshot`

use channel_digest::config::{EnrichmentConfig, QueryConfig};
use channel_digest::enrich::store::{Collection, Library, MemoryStore, StoredChannel, StoredVideo};
use channel_digest::source::mock::{synthetic_channel, MockSource};
use channel_digest::{router, AppState, JobManager, QueryEngine};

const BODY_LIMIT: usize = 1024 * 1024;

fn library() -> Library {
    let videos = (0..3)
        .map(|i| StoredVideo {
            id: format!("lib-v{i}"),
            title: format!("video {i}"),
            views: 1,
            published_at: None,
            duration_secs: None,
            short: false,
            enrichment: None,
        })
        .collect();
    Library {
        collections: vec![Collection {
            id: "favs".to_string(),
            name: "Favourites".to_string(),
            channels: vec![StoredChannel {
                id: "lib".to_string(),
                title: "Lib".to_string(),
                videos,
            }],
        }],
    }
}

/// Build the same Router the binary uses, over in-memory collaborators.
async fn test_app() -> (Router, Arc<JobManager>) {
    let now = Utc::now();
    let source = Arc::new(
        MockSource::new()
            .with_channel("alpha", synthetic_channel("alpha", now, 3, 4))
            .with_channel("beta", synthetic_channel("beta", now, 2, 4))
            .with_enrich_delay(Duration::from_millis(100)),
    );
    let queries = Arc::new(QueryEngine::new(source.clone(), &QueryConfig::default()));
    let enrich_cfg = EnrichmentConfig {
        concurrency: 1,
        request_delay_ms: 0,
        ..EnrichmentConfig::default()
    };
    let jobs = Arc::new(
        JobManager::load(
            source,
            Arc::new(MemoryStore::new(library())),
            enrich_cfg,
            CancellationToken::new(),
        )
        .await
        .expect("load jobs"),
    );
    let app = router(AppState {
        queries,
        jobs: Arc::clone(&jobs),
    });
    (app, jobs)
}

async fn body_json(resp: axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

fn post_json(uri: &str, payload: Json) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST")
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let (app, _) = test_app().await;

    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");

    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    assert_eq!(String::from_utf8(bytes).expect("utf8").trim(), "OK");
}

#[tokio::test]
async fn api_top_videos_returns_ranked_digest() {
    let (app, _) = test_app().await;

    let req = post_json(
        "/api/top-videos",
        json!({ "channels": ["alpha", "beta", "ghost"], "top_n": 4, "lookback_days": 7 }),
    );
    let resp = app.oneshot(req).await.expect("oneshot /api/top-videos");
    assert_eq!(resp.status(), StatusCode::OK);

    let v = body_json(resp).await;
    let videos = v["videos"].as_array().expect("videos array");
    assert_eq!(videos.len(), 4);
    assert_eq!(videos[0]["id"], "alpha-v2");
    assert_eq!(v["partial"], true, "unknown channel makes the result partial");
    let channels = v["channels"].as_array().expect("channels array");
    assert_eq!(channels.len(), 3);
    assert_eq!(channels[0]["success"], true);
    assert_eq!(channels[2]["success"], false);
    assert!(v["generated_at"].is_string());
}

#[tokio::test]
async fn api_top_videos_rejects_empty_channel_list() {
    let (app, _) = test_app().await;

    let req = post_json("/api/top-videos", json!({ "channels": [" "] }));
    let resp = app.oneshot(req).await.expect("oneshot");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v = body_json(resp).await;
    assert!(v["error"].as_str().unwrap_or_default().contains("channel"));
}

#[tokio::test]
async fn api_enrich_unknown_collection_is_404() {
    let (app, _) = test_app().await;

    let req = post_json("/api/collections/nope/enrich", json!({}));
    let resp = app.clone().oneshot(req).await.expect("oneshot POST");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = Request::builder()
        .uri("/api/collections/nope/enrich")
        .body(Body::empty())
        .expect("build GET");
    let resp = app.oneshot(req).await.expect("oneshot GET");
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn api_enrich_start_then_status() {
    let (app, jobs) = test_app().await;

    let status_req = || {
        Request::builder()
            .uri("/api/collections/favs/enrich")
            .body(Body::empty())
            .expect("build GET")
    };

    let idle = body_json(app.clone().oneshot(status_req()).await.expect("idle")).await;
    assert_eq!(idle["status"], "idle");

    let resp = app
        .clone()
        .oneshot(post_json("/api/collections/favs/enrich", json!({})))
        .await
        .expect("start");
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let started = body_json(resp).await;
    assert_eq!(started["started"], true);
    assert_eq!(started["job"]["status"], "running");
    assert_eq!(started["job"]["total"], 3);

    let resp = app
        .clone()
        .oneshot(post_json("/api/collections/favs/enrich", json!({})))
        .await
        .expect("second start");
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["started"], false);

    jobs.wait_until_finished("favs").await.expect("job exists");
    let done = body_json(app.oneshot(status_req()).await.expect("status")).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["enriched"], 3);
}
