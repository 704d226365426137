// src/enrich/mod.rs
//! Enrichment job manager.
//!
//! One job per collection may be running at a time. A job scans the
//! collection once, then a fixed set of paced workers claims backlog items
//! from a shared cursor, fetches their detail payload and writes it into the
//! in-memory library. Progress is checkpointed to the store on a timer and
//! once more when the job ends. The first rate-limit answer raises a shared
//! flag; workers finish the fetch they are in and claim nothing further.

pub mod store;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::EnrichmentConfig;
use crate::error::EngineError;
use crate::pool::{Cursor, StopFlag, WorkerPool};
use crate::source::ItemSource;
use crate::telemetry::{
    ensure_metrics_described, ENRICH_CHECKPOINTS_TOTAL, ENRICH_CHECKPOINT_FAILURES_TOTAL,
    ENRICH_FAILURES_TOTAL, ENRICH_ITEMS_TOTAL, ENRICH_RATE_LIMITED_TOTAL, ENRICH_RUNNING_JOBS,
};
use store::{BacklogScan, Library, LibraryStore, WorkItemRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Running,
    Completed,
    Halted,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Halted)
    }
}

/// Job descriptor as reported to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnrichmentJob {
    pub collection_id: String,
    pub status: JobStatus,
    pub total: usize,
    pub enriched: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rate_limited: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl EnrichmentJob {
    pub fn idle(collection_id: &str) -> Self {
        Self {
            collection_id: collection_id.to_string(),
            status: JobStatus::Idle,
            total: 0,
            enriched: 0,
            failed: 0,
            skipped: 0,
            rate_limited: false,
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub started: bool,
    pub job: EnrichmentJob,
}

/// Live state of one job, shared by its workers and the registry.
struct JobRun {
    collection_id: String,
    started_at: DateTime<Utc>,
    skipped: usize,
    work: Vec<WorkItemRef>,
    cursor: Cursor,
    enriched: AtomicUsize,
    failed: AtomicUsize,
    rate_limited: StopFlag,
    status: watch::Sender<JobStatus>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

impl JobRun {
    fn new(collection_id: &str, scan: BacklogScan) -> Self {
        let (status, _) = watch::channel(JobStatus::Running);
        Self {
            collection_id: collection_id.to_string(),
            started_at: Utc::now(),
            skipped: scan.already_enriched + scan.ineligible,
            cursor: Cursor::new(scan.work.len()),
            work: scan.work,
            enriched: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            rate_limited: StopFlag::new(),
            status,
            finished_at: Mutex::new(None),
        }
    }

    fn status(&self) -> JobStatus {
        *self.status.borrow()
    }

    fn progress(&self) -> usize {
        self.enriched.load(Ordering::SeqCst) + self.failed.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> EnrichmentJob {
        EnrichmentJob {
            collection_id: self.collection_id.clone(),
            status: self.status(),
            total: self.work.len(),
            enriched: self.enriched.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped,
            rate_limited: self.rate_limited.is_raised(),
            started_at: Some(self.started_at),
            finished_at: *lock(&self.finished_at),
        }
    }
}

/// Collaborators shared by every job's tasks.
#[derive(Clone)]
struct JobContext {
    source: Arc<dyn ItemSource>,
    store: Arc<dyn LibraryStore>,
    library: Arc<Mutex<Library>>,
    cfg: EnrichmentConfig,
}

pub struct JobManager {
    ctx: JobContext,
    jobs: Mutex<HashMap<String, Arc<JobRun>>>,
    shutdown: CancellationToken,
}

impl JobManager {
    /// Load the library from `store` and build a manager around it.
    /// Cancelling `shutdown` halts every running job cooperatively.
    pub async fn load(
        source: Arc<dyn ItemSource>,
        store: Arc<dyn LibraryStore>,
        cfg: EnrichmentConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, EngineError> {
        let library = store.load().await?;
        tracing::info!(
            target: "enrich",
            collections = library.collections.len(),
            "library loaded"
        );
        Ok(Self {
            ctx: JobContext {
                source,
                store,
                library: Arc::new(Mutex::new(library)),
                cfg,
            },
            jobs: Mutex::new(HashMap::new()),
            shutdown,
        })
    }

    /// Start enriching `collection_id`. If a job is already running for it,
    /// nothing starts and that job's descriptor comes back with
    /// `started = false`.
    pub fn start(&self, collection_id: &str) -> Result<StartOutcome, EngineError> {
        ensure_metrics_described();

        let run = {
            let mut jobs = lock(&self.jobs);
            if let Some(existing) = jobs.get(collection_id) {
                if existing.status() == JobStatus::Running {
                    return Ok(StartOutcome {
                        started: false,
                        job: existing.snapshot(),
                    });
                }
            }

            let scan = lock(&self.ctx.library)
                .scan_backlog(collection_id, self.ctx.cfg.shorts_max_secs)
                .ok_or_else(|| EngineError::CollectionNotFound(collection_id.to_string()))?;
            let run = Arc::new(JobRun::new(collection_id, scan));
            jobs.insert(collection_id.to_string(), Arc::clone(&run));
            run
        };

        tracing::info!(
            target: "enrich",
            collection = %collection_id,
            total = run.work.len(),
            skipped = run.skipped,
            "enrichment job started"
        );
        tokio::spawn(drive(
            self.ctx.clone(),
            Arc::clone(&run),
            self.shutdown.child_token(),
        ));

        Ok(StartOutcome {
            started: true,
            job: run.snapshot(),
        })
    }

    /// Latest job for the collection, or an idle descriptor if none ran yet.
    pub fn status(&self, collection_id: &str) -> Result<EnrichmentJob, EngineError> {
        if let Some(run) = lock(&self.jobs).get(collection_id) {
            return Ok(run.snapshot());
        }
        if lock(&self.ctx.library).collection(collection_id).is_some() {
            Ok(EnrichmentJob::idle(collection_id))
        } else {
            Err(EngineError::CollectionNotFound(collection_id.to_string()))
        }
    }

    /// Wait for the collection's current job to reach a terminal state.
    /// `None` if no job was ever started for it.
    pub async fn wait_until_finished(&self, collection_id: &str) -> Option<EnrichmentJob> {
        let run = lock(&self.jobs).get(collection_id).cloned()?;
        let mut rx = run.status.subscribe();
        let _ = rx.wait_for(|s| s.is_terminal()).await;
        Some(run.snapshot())
    }

    /// Copy of the in-memory library, including unsaved progress.
    pub fn library_snapshot(&self) -> Library {
        lock(&self.ctx.library).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

async fn drive(ctx: JobContext, run: Arc<JobRun>, cancel: CancellationToken) {
    gauge!(ENRICH_RUNNING_JOBS).increment(1.0);

    let pool = WorkerPool::new(ctx.cfg.concurrency, ctx.cfg.request_delay(), cancel.clone());
    let workers = pool.run(|idx| work_loop(idx, ctx.clone(), Arc::clone(&run), cancel.clone()));
    tokio::pin!(workers);

    let mut ticker = tokio::time::interval(ctx.cfg.checkpoint_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut saved_progress = 0;

    loop {
        tokio::select! {
            _ = &mut workers => break,
            _ = ticker.tick() => {
                let progress = run.progress();
                if progress != saved_progress {
                    checkpoint(&ctx, &run, "periodic").await;
                    saved_progress = progress;
                }
            }
        }
    }

    let status = if run.rate_limited.is_raised() || cancel.is_cancelled() {
        JobStatus::Halted
    } else {
        JobStatus::Completed
    };
    *lock(&run.finished_at) = Some(Utc::now());
    checkpoint(&ctx, &run, "final").await;
    run.status.send_replace(status);
    gauge!(ENRICH_RUNNING_JOBS).decrement(1.0);

    let job = run.snapshot();
    tracing::info!(
        target: "enrich",
        collection = %job.collection_id,
        status = ?job.status,
        enriched = job.enriched,
        failed = job.failed,
        total = job.total,
        rate_limited = job.rate_limited,
        "enrichment job finished"
    );
}

async fn work_loop(worker: usize, ctx: JobContext, run: Arc<JobRun>, cancel: CancellationToken) {
    let delay = ctx.cfg.request_delay();

    loop {
        if run.rate_limited.is_raised() || cancel.is_cancelled() {
            break;
        }
        let Some(i) = run.cursor.claim() else {
            break;
        };
        let target = run.work[i];
        let video_id = lock(&ctx.library).video(target).map(|v| v.id.clone());
        let Some(video_id) = video_id else {
            run.failed.fetch_add(1, Ordering::SeqCst);
            tracing::warn!(target: "enrich", worker, ?target, "work item no longer resolves");
            continue;
        };

        match ctx.source.fetch_enrichment(&video_id).await {
            Ok(payload) => {
                lock(&ctx.library).apply_enrichment(target, payload);
                run.enriched.fetch_add(1, Ordering::SeqCst);
                counter!(ENRICH_ITEMS_TOTAL).increment(1);
            }
            Err(e) if e.is_rate_limited() => {
                if run.rate_limited.raise() {
                    counter!(ENRICH_RATE_LIMITED_TOTAL).increment(1);
                    tracing::warn!(
                        target: "enrich",
                        collection = %run.collection_id,
                        worker,
                        video = %video_id,
                        "rate limited upstream; halting job"
                    );
                }
                break;
            }
            Err(e) => {
                run.failed.fetch_add(1, Ordering::SeqCst);
                counter!(ENRICH_FAILURES_TOTAL).increment(1);
                tracing::warn!(target: "enrich", worker, video = %video_id, error = %e, "enrichment fetch failed");
            }
        }

        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

async fn checkpoint(ctx: &JobContext, run: &JobRun, reason: &'static str) {
    let snapshot = lock(&ctx.library).clone();
    match ctx.store.save(&snapshot).await {
        Ok(()) => {
            counter!(ENRICH_CHECKPOINTS_TOTAL).increment(1);
            tracing::debug!(
                target: "enrich",
                collection = %run.collection_id,
                reason,
                progress = run.progress(),
                "checkpoint saved"
            );
        }
        Err(e) => {
            counter!(ENRICH_CHECKPOINT_FAILURES_TOTAL).increment(1);
            tracing::warn!(
                target: "enrich",
                collection = %run.collection_id,
                reason,
                error = %format!("{e:#}"),
                "checkpoint failed; will retry at next checkpoint"
            );
        }
    }
}
