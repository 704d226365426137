// src/query/mod.rs
pub mod aggregator;
pub mod orchestrator;

pub use aggregator::{ChannelWalk, CutoffAggregator, ItemCache};
pub use orchestrator::{QueryEngine, QueryKey, TopVideosRequest, CANCELED_MESSAGE};
