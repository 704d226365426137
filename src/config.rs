// src/config.rs
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::MAX_TTL;

pub const ENV_CONFIG_PATH: &str = "DIGEST_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub query: QueryConfig,
    pub enrichment: EnrichmentConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    /// Item fetches in flight per channel. The cutoff overshoot is bounded by it.
    pub item_inflight_limit: usize,
    /// Channels walked concurrently within one query.
    pub channel_concurrency: usize,
    pub item_cache_ttl_secs: u64,
    pub query_cache_ttl_secs: u64,
    pub channel_timeout_secs: u64,
    pub max_top_n: usize,
    pub default_lookback_days: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            item_inflight_limit: 6,
            channel_concurrency: 3,
            item_cache_ttl_secs: 6 * 3600,
            query_cache_ttl_secs: 600,
            channel_timeout_secs: 60,
            max_top_n: 50,
            default_lookback_days: 30,
        }
    }
}

impl QueryConfig {
    /// Raise zero limits to 1 and cap cache TTLs.
    pub fn clamped(mut self) -> Self {
        self.item_inflight_limit = self.item_inflight_limit.max(1);
        self.channel_concurrency = self.channel_concurrency.max(1);
        self.max_top_n = self.max_top_n.max(1);
        self.default_lookback_days = self.default_lookback_days.max(1);
        self.channel_timeout_secs = self.channel_timeout_secs.max(1);
        self.item_cache_ttl_secs = self.item_cache_ttl_secs.min(MAX_TTL.as_secs());
        self.query_cache_ttl_secs = self.query_cache_ttl_secs.min(MAX_TTL.as_secs());
        self
    }

    pub fn item_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.item_cache_ttl_secs)
    }

    pub fn query_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.query_cache_ttl_secs)
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub concurrency: usize,
    /// Pause each worker takes after every fetch.
    pub request_delay_ms: u64,
    pub checkpoint_interval_secs: u64,
    /// Videos at or under this length are shorts and never enriched.
    pub shorts_max_secs: u32,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            request_delay_ms: 1_500,
            checkpoint_interval_secs: 30,
            shorts_max_secs: 60,
        }
    }
}

impl EnrichmentConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathsConfig {
    pub library: PathBuf,
    pub fixture: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            library: PathBuf::from("data/library.json"),
            fixture: PathBuf::from("data/fixture.json"),
        }
    }
}

impl EngineConfig {
    /// Load from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading engine config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = if ext == "json" {
            serde_json::from_str::<EngineConfig>(&content)
                .with_context(|| format!("parsing {}", path.display()))?
        } else {
            toml::from_str::<EngineConfig>(&content)
                .with_context(|| format!("parsing {}", path.display()))?
        };
        Ok(cfg.sanitized())
    }

    /// Load config using env var + fallbacks:
    /// 1) $DIGEST_CONFIG_PATH
    /// 2) config/digest.toml
    /// 3) config/digest.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
        }
        let toml_p = PathBuf::from("config/digest.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/digest.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Ok(Self::default())
    }

    fn sanitized(mut self) -> Self {
        self.query = self.query.clamped();
        let e = &mut self.enrichment;
        e.concurrency = e.concurrency.max(1);
        e.checkpoint_interval_secs = e.checkpoint_interval_secs.max(1);
        self
    }
}
