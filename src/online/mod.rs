//! Online ingestion: feed search, relevance ranking, page fetch and
//! extraction, deduplication into the vault, and cache eviction.

mod aggregator;
mod id;
mod rate_limit;
mod relevance;

pub use aggregator::{
    AggregatorSettings, IngestReport, OnlineAggregator, SkipReason, ARTICLE_CONTENT_TYPE,
};
pub use id::item_id;
pub use rate_limit::HostRateLimiter;
pub use relevance::{
    calculate_relevance, matches_keywords, rank_candidates, OnlineResult, MIN_KEYWORD_OVERLAP,
    MIN_RELEVANCE,
};
