//! Runtime configuration. Built by the caller (the crawler binary assembles
//! one from CLI flags) and validated once before the engine starts; no config
//! file parsing happens here.

use crate::error::ConfigError;
use std::time::Duration;

/// Corpus language, selecting the stemmer and stop-word set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Swedish,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub language: Language,
    /// Domains the crawler may enter. Empty means any domain reachable from
    /// the seeds.
    pub allowed_domains: Vec<String>,
    pub crawl: CrawlConfig,
    pub ranking: RankingConfig,
    pub cache: CacheConfig,
    /// Wall-clock budget for a single query.
    pub query_budget: Duration,
    /// Candidate sets larger than this are pre-cut by raw term frequency
    /// before full ranking. Accuracy/latency trade-off, not a correctness
    /// rule.
    pub max_candidates: usize,
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub workers: usize,
    pub max_depth: u32,
    pub max_pages_per_domain: usize,
    /// Minimum spacing between admissions to the same domain. A robots.txt
    /// crawl-delay directive overrides it upward.
    pub per_domain_delay: Duration,
    /// Global outbound ceiling across all workers.
    pub pages_per_minute: u32,
    /// Documents older than this are re-enqueued at the next crawl.
    pub recrawl_interval: Duration,
    pub robots_refresh: Duration,
    pub user_agent: String,
    pub fetch: FetchConfig,
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct RankingConfig {
    pub weights: RankingWeights,
    pub recency_half_life_days: f64,
    /// Keyword-density signal saturates at this fraction of the document.
    pub density_cap: f64,
    pub damping: f64,
    pub max_iterations: u32,
    pub convergence_epsilon: f64,
    /// Maximum results from one domain in a returned page.
    pub per_domain_cap: usize,
    /// Top-level domain treated as local for the locale signal.
    pub preferred_tld: Option<String>,
    /// Entity terms whose presence in a title marks a page as locally
    /// relevant.
    pub local_terms: Vec<String>,
}

/// The seven signal weights. Must sum to 1.0.
#[derive(Debug, Clone, Copy)]
pub struct RankingWeights {
    pub tfidf: f64,
    pub link_authority: f64,
    pub domain_authority: f64,
    pub recency: f64,
    pub keyword_density: f64,
    pub link_structure: f64,
    pub locale: f64,
}

impl RankingWeights {
    pub fn sum(&self) -> f64 {
        self.tfidf
            + self.link_authority
            + self.domain_authority
            + self.recency
            + self.keyword_density
            + self.link_structure
            + self.locale
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            language: Language::English,
            allowed_domains: Vec::new(),
            crawl: CrawlConfig::default(),
            ranking: RankingConfig::default(),
            cache: CacheConfig::default(),
            query_budget: Duration::from_millis(800),
            max_candidates: 10_000,
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            max_depth: 4,
            max_pages_per_domain: 500,
            per_domain_delay: Duration::from_millis(1_000),
            pages_per_minute: 300,
            recrawl_interval: Duration::from_secs(24 * 3600),
            robots_refresh: Duration::from_secs(3600),
            user_agent: "sitesearch-bot/0.1 (+https://example.com/bot)".to_string(),
            fetch: FetchConfig::default(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(12),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weights: RankingWeights::default(),
            recency_half_life_days: 30.0,
            density_cap: 0.25,
            damping: 0.85,
            max_iterations: 50,
            convergence_epsilon: 1e-6,
            per_domain_cap: 3,
            preferred_tld: None,
            local_terms: Vec::new(),
        }
    }
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            tfidf: 0.25,
            link_authority: 0.20,
            domain_authority: 0.15,
            recency: 0.15,
            keyword_density: 0.10,
            link_structure: 0.10,
            locale: 0.05,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl: Duration::from_secs(3600),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sum = self.ranking.weights.sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(ConfigError::WeightSum(sum));
        }
        if self.crawl.workers == 0 {
            return Err(ConfigError::Invalid("crawl.workers must be at least 1"));
        }
        if self.crawl.pages_per_minute == 0 {
            return Err(ConfigError::Invalid("crawl.pages_per_minute must be non-zero"));
        }
        if self.crawl.fetch.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("fetch.max_body_bytes must be non-zero"));
        }
        if self.ranking.damping <= 0.0 || self.ranking.damping >= 1.0 {
            return Err(ConfigError::Invalid("ranking.damping must lie in (0, 1)"));
        }
        if self.ranking.per_domain_cap == 0 {
            return Err(ConfigError::Invalid("ranking.per_domain_cap must be at least 1"));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid("cache.capacity must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let mut cfg = Config::default();
        cfg.ranking.weights.tfidf = 0.5;
        match cfg.validate() {
            Err(ConfigError::WeightSum(_)) => {}
            other => panic!("expected WeightSum error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_workers() {
        let mut cfg = Config::default();
        cfg.crawl.workers = 0;
        assert!(cfg.validate().is_err());
    }
}
