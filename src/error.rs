// src/error.rs
//! Error types at the engine seams.
//!
//! Fetch failures are recovered at the smallest enclosing scope (item, channel,
//! job) and only surface as status fields. `EngineError` is reserved for hard
//! precondition failures that go straight back to the caller.

use thiserror::Error;

/// Failure modes of the upstream item source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("item not found: {0}")]
    NotFound(String),
    /// Upstream throttling (HTTP 429 or equivalent). A backpressure signal,
    /// not an ordinary failure.
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("transient upstream error: {0}")]
    Transient(String),
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("store error: {0}")]
    Store(String),
}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        EngineError::Store(format!("{e:#}"))
    }
}
