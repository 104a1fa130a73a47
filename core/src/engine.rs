//! Engine facade: the one entry point the HTTP layer and the crawler binary
//! talk to. Owns the store, the in-memory index, the authority tables, the
//! search pipeline, and the crawl lifecycle.

use crate::authority::{AuthorityTable, LinkAuthority};
use crate::config::Config;
use crate::error::{CrawlError, EngineError, SearchError, StoreError};
use crate::fetch::{build_client, Fetcher};
use crate::frontier::{Frontier, FrontierLimits};
use crate::graph::{link_authority, LinkGraph};
use crate::index::{unix_now, DocId, InvertedIndex, NewDocument};
use crate::normalize::Normalizer;
use crate::pipeline::{SearchOutcome, SearchPipeline};
use crate::politeness::PolitenessGate;
use crate::scheduler::{Crawler, CrawlShared, CrawlStatus};
use crate::stats::{QueryStats, StatsSnapshot};
use crate::storage::Store;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use url::Url;

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub document_count: u64,
    pub term_count: u64,
    /// Unix seconds of the last completed crawl cycle, if any.
    pub last_crawl_time: Option<u64>,
    pub index_size_bytes: u64,
}

pub struct SearchEngine {
    cfg: Config,
    store: Arc<Store>,
    index: Arc<InvertedIndex>,
    normalizer: Arc<Normalizer>,
    authority: Arc<AuthorityTable>,
    link_auth: Arc<LinkAuthority>,
    pipeline: SearchPipeline,
    stats: QueryStats,
    crawl: Arc<CrawlShared>,
}

impl SearchEngine {
    /// Open the store and recover the index from its last complete snapshot.
    /// Corruption is fatal here: the engine will not serve from a damaged
    /// index. Starting over with a fresh directory and a full re-crawl is
    /// the fallback.
    pub fn open<P: AsRef<Path>>(cfg: Config, path: P) -> Result<Self, EngineError> {
        cfg.validate()?;
        let store = Arc::new(Store::open(path)?);
        let index = Arc::new(InvertedIndex::load(&store)?);
        let normalizer = Arc::new(Normalizer::new(cfg.language));
        let authority = Arc::new(AuthorityTable::new());
        authority.swap(store.load_authority().map_err(EngineError::Store)?);
        let link_auth = Arc::new(LinkAuthority::new());
        recompute_link_authority(&index, &link_auth, &cfg);

        let pipeline = SearchPipeline::new(
            index.clone(),
            normalizer.clone(),
            authority.clone(),
            link_auth.clone(),
            cfg.clone(),
        );
        info!(
            docs = index.total_docs(),
            terms = index.term_count(),
            "engine open"
        );
        Ok(Self {
            cfg,
            store,
            index,
            normalizer,
            authority,
            link_auth,
            pipeline,
            stats: QueryStats::new(),
            crawl: Arc::new(CrawlShared::new()),
        })
    }

    pub fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<SearchOutcome, SearchError> {
        let outcome = self.pipeline.search(query, max_results);
        match &outcome {
            Ok(out) => self.stats.record(out.elapsed),
            Err(SearchError::Timeout { .. }) => self.stats.record(self.cfg.query_budget),
        }
        outcome
    }

    pub fn health(&self) -> Health {
        Health {
            document_count: self.index.total_docs(),
            term_count: self.index.term_count(),
            last_crawl_time: self.crawl.last_crawl_time(),
            index_size_bytes: self.store.size_on_disk(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Index one document through the same write path the crawler uses.
    /// Terms come from the engine's own normalizer, so a later query for any
    /// word in the body will find it.
    pub fn index_page(&self, mut page: NewDocument) -> DocId {
        let text = if page.title.is_empty() {
            page.body.clone()
        } else {
            format!("{}\n{}", page.title, page.body)
        };
        let terms = self.normalizer.normalize(&text);
        page.raw_term_count = self.normalizer.raw_token_count(&text);
        self.index.commit(page, &terms)
    }

    /// Flush outstanding index changes to the store and mark the snapshot
    /// complete.
    pub fn snapshot(&self) -> Result<(), StoreError> {
        self.index.persist_dirty(&self.store)
    }

    /// Start a crawl over the given seed domains or URLs. Must be called
    /// from within a tokio runtime; the crawl runs on spawned tasks and this
    /// returns immediately.
    pub fn start_crawl(&self, seeds: &[String]) -> Result<(), CrawlError> {
        let seed_urls = parse_seeds(seeds);
        if seed_urls.is_empty() {
            return Err(CrawlError::NoSeeds);
        }
        let frontier = Arc::new(Frontier::new(FrontierLimits {
            max_depth: self.cfg.crawl.max_depth,
            max_pages_per_domain: self.cfg.crawl.max_pages_per_domain,
            allowed_domains: self.cfg.allowed_domains.clone(),
        }));
        if !self.crawl.begin(frontier.clone()) {
            return Err(CrawlError::AlreadyRunning);
        }

        let now = unix_now();
        for url in seed_urls {
            frontier.push(url, 0, now);
        }
        // Resume whatever a stopped crawl left behind.
        for pending in self.store.take_frontier()? {
            if let Ok(url) = Url::parse(&pending.url) {
                frontier.push(url, pending.depth, now);
            }
        }
        // Re-crawl pass: stale documents go back into the frontier.
        let stale = self
            .index
            .stale_urls(now, self.cfg.crawl.recrawl_interval);
        if !stale.is_empty() {
            info!(count = stale.len(), "re-enqueueing stale documents");
            for url in stale {
                if let Ok(url) = Url::parse(&url) {
                    frontier.push(url, 0, now);
                }
            }
        }

        let client = build_client(&self.cfg.crawl).map_err(|e| {
            self.crawl.request_stop();
            self.crawl.finish();
            CrawlError::Client(e.to_string())
        })?;
        let crawler = Arc::new(Crawler::new(
            self.cfg.crawl.clone(),
            Fetcher::new(client.clone(), self.cfg.crawl.fetch.clone()),
            PolitenessGate::new(client, &self.cfg.crawl),
            frontier,
            self.index.clone(),
            self.store.clone(),
            self.normalizer.clone(),
            self.crawl.clone(),
        ));

        let shared = self.crawl.clone();
        let index = self.index.clone();
        let link_auth = self.link_auth.clone();
        let cfg = self.cfg.clone();
        tokio::spawn(async move {
            crawler.run().await;
            recompute_link_authority(&index, &link_auth, &cfg);
            shared.finish();
            info!("crawl cycle complete");
        });
        Ok(())
    }

    /// Close the frontier; in-flight fetches finish or time out, then the
    /// remaining queue is persisted for the next run.
    pub fn stop_crawl(&self) {
        self.crawl.request_stop();
    }

    pub fn crawl_status(&self) -> CrawlStatus {
        self.crawl.status()
    }

    /// Replace the domain authority table wholesale, in the store and for
    /// all readers at once.
    pub fn swap_authority(&self, table: HashMap<String, f64>) -> Result<(), StoreError> {
        self.store.put_authority(&table)?;
        self.authority.swap(table);
        Ok(())
    }
}

/// Batch recompute of the link-graph authority; readers swap to the new
/// scores atomically.
fn recompute_link_authority(index: &InvertedIndex, link_auth: &LinkAuthority, cfg: &Config) {
    let docs = index.all_documents();
    if docs.is_empty() {
        return;
    }
    let graph = LinkGraph::build(&docs);
    let scores = link_authority(
        &graph,
        cfg.ranking.damping,
        cfg.ranking.max_iterations,
        cfg.ranking.convergence_epsilon,
    );
    link_auth.swap(scores);
}

fn parse_seeds(seeds: &[String]) -> Vec<Url> {
    seeds
        .iter()
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() || s.starts_with('#') {
                return None;
            }
            Url::parse(s)
                .or_else(|_| Url::parse(&format!("https://{s}")))
                .ok()
        })
        .collect()
}
