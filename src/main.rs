//! Channel Digest: binary entrypoint
//! Boots the Axum HTTP server: config, item source, library store, query
//! engine, enrichment jobs and metrics.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use channel_digest::enrich::store::JsonFileStore;
use channel_digest::metrics::Metrics;
use channel_digest::source::fixture::FixtureSource;
use channel_digest::source::ItemSource;
use channel_digest::{router, spawn_cache_janitor, AppState, EngineConfig, JobManager, QueryEngine};

/// `RUST_LOG` drives the filter; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("channel_digest=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if let Err(e) = res {
        eprintln!("tracing already initialized: {e}");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = EngineConfig::load_default().context("loading engine config")?;

    let source: Arc<dyn ItemSource> = if cfg.paths.fixture.exists() {
        Arc::new(FixtureSource::from_path(&cfg.paths.fixture)?)
    } else {
        tracing::warn!(
            path = %cfg.paths.fixture.display(),
            "fixture not found; serving an empty source"
        );
        Arc::new(FixtureSource::empty())
    };
    tracing::info!(source = source.name(), "item source ready");
    let store = Arc::new(JsonFileStore::new(cfg.paths.library.clone()));
    let shutdown = CancellationToken::new();

    let queries = Arc::new(QueryEngine::new(Arc::clone(&source), &cfg.query));
    let jobs = Arc::new(
        JobManager::load(source, store, cfg.enrichment.clone(), shutdown.clone())
            .await
            .context("loading library")?,
    );

    spawn_cache_janitor(Arc::clone(&queries), Duration::from_secs(300), shutdown);

    let metrics = Metrics::init(&cfg.query)?;
    let app = router(AppState { queries, jobs }).merge(metrics.router());

    tracing::info!(
        item_inflight_limit = cfg.query.item_inflight_limit,
        channel_concurrency = cfg.query.channel_concurrency,
        enrich_concurrency = cfg.enrichment.concurrency,
        "channel digest ready"
    );

    Ok(app.into())
}
