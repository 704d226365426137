// src/pool.rs
//! Bounded concurrency primitives.
//!
//! Two shapes are used by the engine:
//! - [`WorkerPool`]: a fixed set of long-lived worker loops pulling indices
//!   from a shared [`Cursor`] until it is exhausted, a [`StopFlag`] is raised,
//!   or the pool's cancellation token fires.
//! - [`InFlight`]: a task set that refuses new submissions once `limit`
//!   tasks are unresolved. Completion order is whatever the runtime yields.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Monotonic claim cursor over `0..len`. Every index is handed out at most
/// once and none is skipped.
#[derive(Debug)]
pub struct Cursor {
    next: AtomicUsize,
    len: usize,
}

impl Cursor {
    pub fn new(len: usize) -> Self {
        Self {
            next: AtomicUsize::new(0),
            len,
        }
    }

    pub fn claim(&self) -> Option<usize> {
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        (i < self.len).then_some(i)
    }

    /// How many indices have been handed out so far.
    pub fn claimed(&self) -> usize {
        self.next.load(Ordering::SeqCst).min(self.len)
    }

    pub fn is_exhausted(&self) -> bool {
        self.claimed() >= self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Shared one-way flag. Once raised it stays raised.
#[derive(Debug, Default)]
pub struct StopFlag(AtomicBool);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns true for the caller that raised it first.
    pub fn raise(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Fixed-size set of worker loops with staggered start.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    concurrency: usize,
    stagger: Duration,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// `stagger` is the total spread of start times; worker `i` waits
    /// `stagger / concurrency * i` before its first claim.
    pub fn new(concurrency: usize, stagger: Duration, cancel: CancellationToken) -> Self {
        Self {
            concurrency: concurrency.max(1),
            stagger,
            cancel,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn start_delay(&self, worker_index: usize) -> Duration {
        let per_worker = self.stagger / self.concurrency as u32;
        per_worker * worker_index as u32
    }

    /// Spawn `concurrency` workers built by `make(worker_index)` and wait for
    /// all of them. A panicking worker is logged and does not take down the
    /// others. Returns the number of workers that ended abnormally.
    pub async fn run<F, Fut>(&self, make: F) -> usize
    where
        F: Fn(usize) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut set = JoinSet::new();
        for idx in 0..self.concurrency {
            let delay = self.start_delay(idx);
            let cancel = self.cancel.clone();
            let work = make(idx);
            set.spawn(async move {
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                work.await;
            });
        }

        let mut abnormal = 0;
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                abnormal += 1;
                tracing::warn!(target: "pool", error = %e, "worker ended abnormally");
            }
        }
        abnormal
    }
}

/// Task set bounded to `limit` unresolved tasks.
pub struct InFlight<T> {
    set: JoinSet<T>,
    limit: usize,
    submitted: usize,
}

impl<T: Send + 'static> InFlight<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            set: JoinSet::new(),
            limit: limit.max(1),
            submitted: 0,
        }
    }

    pub fn has_room(&self) -> bool {
        self.set.len() < self.limit
    }

    /// Submit a task. Callers check [`InFlight::has_room`] first; the bound
    /// is a submission gate, not a queue.
    pub fn submit<F>(&mut self, fut: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.submitted += 1;
        self.set.spawn(fut);
    }

    /// Next resolved task in completion order, `None` once nothing is in flight.
    pub async fn next(&mut self) -> Option<Result<T, JoinError>> {
        self.set.join_next().await
    }

    /// A task that has already resolved, without waiting.
    pub fn try_next(&mut self) -> Option<Result<T, JoinError>> {
        self.set.try_join_next()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }
}
