//! Error taxonomy. Network, parse, and policy failures are recoverable and
//! stay inside the crawl loop; storage corruption and configuration errors
//! propagate out of the engine constructor.

use crate::pipeline::QueryResult;
use thiserror::Error;

/// Failure kinds for a single HTTP fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("http status {0}")]
    Http(u16),
    #[error("response body exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("invalid response: {0}")]
    Invalid(String),
}

impl FetchError {
    /// Only timeouts and connection-level failures are retried; HTTP status
    /// errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Timeout | FetchError::ConnectionRefused)
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("storage backend: {0}")]
    Backend(#[from] sled::Error),
    #[error("encoding: {0}")]
    Encoding(#[from] bincode::Error),
    /// A snapshot or record failed to decode. Fatal at startup: the engine
    /// refuses to serve from a corrupt index.
    #[error("index corrupt: {0}")]
    Corrupt(String),
}

#[derive(Error, Debug)]
pub enum SearchError {
    /// The query ran past its wall-clock budget. Carries the best-effort
    /// ranking computed before the deadline.
    #[error("query exceeded its {budget_ms}ms budget")]
    Timeout {
        partial: Vec<QueryResult>,
        budget_ms: u64,
    },
}

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("a crawl is already running")]
    AlreadyRunning,
    #[error("no valid seed URLs")]
    NoSeeds,
    #[error("http client: {0}")]
    Client(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("ranking weights sum to {0}, expected 1.0")]
    WeightSum(f64),
    #[error("{0}")]
    Invalid(&'static str),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Crawl(#[from] CrawlError),
}
