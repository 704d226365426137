// src/enrich/store.rs
//! Persisted library snapshot and the stores that load/save it.
//!
//! Enrichment edits the loaded snapshot in place through [`WorkItemRef`]s and
//! hands whole snapshots back to the store at checkpoints.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::model::Enrichment;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Library {
    #[serde(default)]
    pub collections: Vec<Collection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Collection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub channels: Vec<StoredChannel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredChannel {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub videos: Vec<StoredVideo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredVideo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_secs: Option<u32>,
    /// Explicitly marked as short-form by the listing that produced it.
    #[serde(default)]
    pub short: bool,
    #[serde(default)]
    pub enrichment: Option<Enrichment>,
}

impl StoredVideo {
    pub fn is_enriched(&self) -> bool {
        self.enrichment.is_some()
    }

    pub fn is_short(&self, shorts_max_secs: u32) -> bool {
        self.short || self.duration_secs.is_some_and(|d| d <= shorts_max_secs)
    }
}

/// Locator of one video inside a [`Library`]: collection/channel/video indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItemRef {
    pub collection: usize,
    pub channel: usize,
    pub video: usize,
}

/// Result of the upfront backlog scan. The three groups are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BacklogScan {
    pub work: Vec<WorkItemRef>,
    pub already_enriched: usize,
    pub ineligible: usize,
}

impl Library {
    pub fn collection(&self, id: &str) -> Option<(usize, &Collection)> {
        self.collections.iter().enumerate().find(|(_, c)| c.id == id)
    }

    pub fn video(&self, r: WorkItemRef) -> Option<&StoredVideo> {
        self.collections
            .get(r.collection)?
            .channels
            .get(r.channel)?
            .videos
            .get(r.video)
    }

    fn video_mut(&mut self, r: WorkItemRef) -> Option<&mut StoredVideo> {
        self.collections
            .get_mut(r.collection)?
            .channels
            .get_mut(r.channel)?
            .videos
            .get_mut(r.video)
    }

    /// Classify every video of a collection. `None` if the collection is unknown.
    pub fn scan_backlog(&self, collection_id: &str, shorts_max_secs: u32) -> Option<BacklogScan> {
        let (ci, coll) = self.collection(collection_id)?;
        let mut scan = BacklogScan::default();
        for (chi, ch) in coll.channels.iter().enumerate() {
            for (vi, v) in ch.videos.iter().enumerate() {
                if v.is_enriched() {
                    scan.already_enriched += 1;
                } else if v.is_short(shorts_max_secs) {
                    scan.ineligible += 1;
                } else {
                    scan.work.push(WorkItemRef {
                        collection: ci,
                        channel: chi,
                        video: vi,
                    });
                }
            }
        }
        Some(scan)
    }

    /// Write an enrichment payload in place. Also refreshes the headline view
    /// count and fills in a missing duration.
    pub fn apply_enrichment(&mut self, r: WorkItemRef, e: Enrichment) -> bool {
        let Some(v) = self.video_mut(r) else {
            return false;
        };
        v.views = e.views;
        if v.duration_secs.is_none() {
            v.duration_secs = e.duration_secs;
        }
        v.enrichment = Some(e);
        true
    }
}

#[async_trait::async_trait]
pub trait LibraryStore: Send + Sync {
    async fn load(&self) -> Result<Library>;
    async fn save(&self, snapshot: &Library) -> Result<()>;
}

/// JSON file on disk, replaced atomically (temp file + rename) on save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl LibraryStore for JsonFileStore {
    async fn load(&self) -> Result<Library> {
        if !self.path.exists() {
            tracing::warn!(target: "store", path = %self.path.display(), "library file missing; starting empty");
            return Ok(Library::default());
        }
        let s = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading library {}", self.path.display()))?;
        serde_json::from_str(&s).with_context(|| format!("parsing library {}", self.path.display()))
    }

    async fn save(&self, snapshot: &Library) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let json = serde_json::to_vec_pretty(snapshot).context("serializing library")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

/// In-memory store that records how often it was saved.
#[derive(Default)]
pub struct MemoryStore {
    current: Mutex<Library>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn new(initial: Library) -> Self {
        Self {
            current: Mutex::new(initial),
            ..Self::default()
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Last saved (or initial) snapshot.
    pub fn snapshot(&self) -> Library {
        match self.current.lock() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    /// Make every following save fail.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl LibraryStore for MemoryStore {
    async fn load(&self) -> Result<Library> {
        Ok(self.snapshot())
    }

    async fn save(&self, snapshot: &Library) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store configured to fail"));
        }
        let mut g = match self.current.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        *g = snapshot.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
