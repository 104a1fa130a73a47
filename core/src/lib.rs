//! Core of a self-hosted site search engine: a polite concurrent crawler, a
//! positional inverted index with durable snapshots, a multi-signal ranking
//! engine, and the query pipeline that ties them together.
//!
//! The [`engine::SearchEngine`] facade is the only entry point binaries need;
//! the modules underneath are public so the pieces can be exercised and
//! benchmarked in isolation.

pub mod authority;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod frontier;
pub mod graph;
pub mod index;
pub mod normalize;
pub mod pipeline;
pub mod politeness;
pub mod rank;
pub mod scheduler;
pub mod stats;
pub mod storage;

pub use config::{CacheConfig, Config, CrawlConfig, FetchConfig, Language, RankingConfig, RankingWeights};
pub use engine::{Health, SearchEngine};
pub use error::{ConfigError, CrawlError, EngineError, FetchError, SearchError, StoreError};
pub use index::{DocId, Document, InvertedIndex, NewDocument, Posting, PostingList};
pub use pipeline::{QueryResult, SearchOutcome};
pub use scheduler::{CrawlPhase, CrawlStatus};
pub use stats::StatsSnapshot;
