//! Crawl scheduler: a fixed pool of workers draining the frontier through
//! the politeness gate and fetcher, with content-hash change detection and
//! incremental index hand-off. Per frontier entry the lifecycle is
//! Queued → Fetching → Indexed | Skipped(reason) | Failed(error); failures
//! never take a worker down.

use crate::config::CrawlConfig;
use crate::fetch::{FetchedPage, Fetcher};
use crate::frontier::{url_key, Frontier, FrontierEntry};
use crate::index::{unix_now, InvertedIndex, NewDocument};
use crate::normalize::Normalizer;
use crate::politeness::PolitenessGate;
use crate::storage::{PendingEntry, Store};
use parking_lot::Mutex;
use scraper::{Html, Selector};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// Index snapshots are flushed after this many newly indexed documents.
const PERSIST_EVERY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CrawlPhase {
    Idle,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlStatus {
    pub phase: CrawlPhase,
    pub pages_fetched: u64,
    pub pages_indexed: u64,
    pub pages_unchanged: u64,
    pub pages_skipped: u64,
    pub pages_failed: u64,
    pub frontier_len: usize,
    pub urls_seen: usize,
    /// Unix seconds.
    pub started_at: Option<u64>,
    pub last_crawl_time: Option<u64>,
}

/// Counters and lifecycle state shared between the engine facade and the
/// running crawl.
#[derive(Default)]
pub(crate) struct CrawlShared {
    phase: Mutex<CrawlPhase>,
    pub(crate) pages_fetched: AtomicU64,
    pub(crate) pages_indexed: AtomicU64,
    pub(crate) pages_unchanged: AtomicU64,
    pub(crate) pages_skipped: AtomicU64,
    pub(crate) pages_failed: AtomicU64,
    started_at: Mutex<Option<u64>>,
    last_crawl_time: Mutex<Option<u64>>,
    frontier: Mutex<Option<Arc<Frontier>>>,
}

impl Default for CrawlPhase {
    fn default() -> Self {
        CrawlPhase::Idle
    }
}

impl CrawlShared {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Transition Idle → Running, publishing the frontier for stop/status.
    pub(crate) fn begin(&self, frontier: Arc<Frontier>) -> bool {
        let mut phase = self.phase.lock();
        if *phase != CrawlPhase::Idle {
            return false;
        }
        *phase = CrawlPhase::Running;
        *self.started_at.lock() = Some(unix_now());
        self.pages_fetched.store(0, Ordering::SeqCst);
        self.pages_indexed.store(0, Ordering::SeqCst);
        self.pages_unchanged.store(0, Ordering::SeqCst);
        self.pages_skipped.store(0, Ordering::SeqCst);
        self.pages_failed.store(0, Ordering::SeqCst);
        *self.frontier.lock() = Some(frontier);
        true
    }

    pub(crate) fn request_stop(&self) {
        let mut phase = self.phase.lock();
        if *phase != CrawlPhase::Running {
            return;
        }
        *phase = CrawlPhase::Stopping;
        if let Some(frontier) = self.frontier.lock().as_ref() {
            frontier.close();
        }
    }

    pub(crate) fn finish(&self) {
        *self.phase.lock() = CrawlPhase::Idle;
        *self.last_crawl_time.lock() = Some(unix_now());
        *self.frontier.lock() = None;
    }

    pub(crate) fn last_crawl_time(&self) -> Option<u64> {
        *self.last_crawl_time.lock()
    }

    pub(crate) fn status(&self) -> CrawlStatus {
        let frontier = self.frontier.lock().clone();
        CrawlStatus {
            phase: *self.phase.lock(),
            pages_fetched: self.pages_fetched.load(Ordering::SeqCst),
            pages_indexed: self.pages_indexed.load(Ordering::SeqCst),
            pages_unchanged: self.pages_unchanged.load(Ordering::SeqCst),
            pages_skipped: self.pages_skipped.load(Ordering::SeqCst),
            pages_failed: self.pages_failed.load(Ordering::SeqCst),
            frontier_len: frontier.as_ref().map_or(0, |f| f.len()),
            urls_seen: frontier.as_ref().map_or(0, |f| f.seen_count()),
            started_at: *self.started_at.lock(),
            last_crawl_time: *self.last_crawl_time.lock(),
        }
    }
}

/// Global pages-per-minute ceiling across all workers, on top of the
/// per-domain delay.
pub(crate) struct Throttle {
    limit: usize,
    window: tokio::sync::Mutex<VecDeque<Instant>>,
}

impl Throttle {
    pub(crate) fn new(pages_per_minute: u32) -> Self {
        Self {
            limit: pages_per_minute.max(1) as usize,
            window: tokio::sync::Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let horizon = Duration::from_secs(60);
                while window
                    .front()
                    .is_some_and(|t| t.elapsed() > horizon)
                {
                    window.pop_front();
                }
                if window.len() < self.limit {
                    window.push_back(Instant::now());
                    None
                } else {
                    window.front().map(|t| horizon.saturating_sub(t.elapsed()))
                }
            };
            match wait {
                None => return,
                Some(d) => sleep(d.max(Duration::from_millis(10))).await,
            }
        }
    }
}

pub(crate) struct Crawler {
    pub(crate) cfg: CrawlConfig,
    pub(crate) fetcher: Fetcher,
    pub(crate) gate: PolitenessGate,
    pub(crate) frontier: Arc<Frontier>,
    pub(crate) index: Arc<InvertedIndex>,
    pub(crate) store: Arc<Store>,
    pub(crate) normalizer: Arc<Normalizer>,
    pub(crate) shared: Arc<CrawlShared>,
    pub(crate) throttle: Throttle,
    in_flight: AtomicUsize,
    indexed_since_persist: AtomicUsize,
}

impl Crawler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        cfg: CrawlConfig,
        fetcher: Fetcher,
        gate: PolitenessGate,
        frontier: Arc<Frontier>,
        index: Arc<InvertedIndex>,
        store: Arc<Store>,
        normalizer: Arc<Normalizer>,
        shared: Arc<CrawlShared>,
    ) -> Self {
        let throttle = Throttle::new(cfg.pages_per_minute);
        Self {
            cfg,
            fetcher,
            gate,
            frontier,
            index,
            store,
            normalizer,
            shared,
            throttle,
            in_flight: AtomicUsize::new(0),
            indexed_since_persist: AtomicUsize::new(0),
        }
    }

    /// Drain the frontier with the configured worker pool, then persist what
    /// remains (a stopped crawl resumes from the stored frontier).
    pub(crate) async fn run(self: Arc<Self>) {
        let workers = self.cfg.workers.max(1);
        info!(workers, frontier = self.frontier.len(), "crawl starting");
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let crawler = self.clone();
            handles.push(tokio::spawn(crawler.worker(worker_id)));
        }
        for handle in handles {
            let _ = handle.await;
        }

        if self.frontier.is_closed() {
            let pending: Vec<PendingEntry> = self
                .frontier
                .drain_pending()
                .into_iter()
                .map(|e| PendingEntry {
                    url: e.url.to_string(),
                    depth: e.depth,
                    discovered_at: e.discovered_at,
                })
                .collect();
            if !pending.is_empty() {
                if let Err(err) = self.store.save_frontier(&pending) {
                    warn!(error = %err, "failed to persist pending frontier");
                }
            }
        }
        if let Err(err) = self.index.persist_dirty(&self.store) {
            warn!(error = %err, "final index persist failed");
        }
        info!(
            indexed = self.shared.pages_indexed.load(Ordering::SeqCst),
            failed = self.shared.pages_failed.load(Ordering::SeqCst),
            "crawl finished"
        );
    }

    async fn worker(self: Arc<Self>, worker_id: usize) {
        loop {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            match self.frontier.pop() {
                Some(entry) => {
                    self.process(entry).await;
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                }
                None => {
                    let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
                    if self.frontier.is_closed()
                        || (self.frontier.is_empty() && remaining == 0)
                    {
                        break;
                    }
                    sleep(Duration::from_millis(50)).await;
                }
            }
        }
        debug!(worker_id, "crawl worker exiting");
    }

    async fn process(&self, entry: FrontierEntry) {
        let url = entry.url.clone();
        let Some(host) = url.host_str().map(str::to_string) else {
            self.shared.pages_skipped.fetch_add(1, Ordering::SeqCst);
            return;
        };

        if !self.gate.allowed(&url).await {
            debug!(%url, "disallowed by robots.txt, permanently skipped");
            self.shared.pages_skipped.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.gate.admit(&host).await;
        self.throttle.acquire().await;

        let page = match self.fetcher.fetch(&url).await {
            Ok(page) => page,
            Err(err) => {
                warn!(%url, error = %err, "fetch failed");
                self.shared.pages_failed.fetch_add(1, Ordering::SeqCst);
                return;
            }
        };
        self.shared.pages_fetched.fetch_add(1, Ordering::SeqCst);

        if !is_html(&page) {
            debug!(%url, content_type = ?page.content_type, "not html, skipped");
            self.shared.pages_skipped.fetch_add(1, Ordering::SeqCst);
            return;
        }

        let Some(parsed) = parse_page(&url, &page.body) else {
            debug!(%url, "unparseable page, skipped");
            self.shared.pages_skipped.fetch_add(1, Ordering::SeqCst);
            return;
        };

        let key = url_key(&url);
        let hash = content_digest(&parsed.title, &parsed.text);
        let now = unix_now();

        if self.index.content_hash(&key) == Some(hash) {
            // Unchanged page: refresh the fetch timestamp, write nothing to
            // the postings.
            self.index.touch(&key, now);
            self.shared.pages_unchanged.fetch_add(1, Ordering::SeqCst);
            debug!(%url, "content unchanged");
            return;
        }

        let indexed_text = if parsed.title.is_empty() {
            parsed.text.clone()
        } else {
            format!("{}\n{}", parsed.title, parsed.text)
        };
        let terms = self.normalizer.normalize(&indexed_text);
        let raw_term_count = self.normalizer.raw_token_count(&indexed_text);
        let outbound_links: Vec<String> =
            parsed.links.iter().map(url_key).collect();

        let doc_id = self.index.commit(
            NewDocument {
                url: key,
                domain: host,
                title: parsed.title,
                fetched_at: now,
                content_hash: hash,
                raw_term_count,
                outbound_links,
                body: parsed.text,
            },
            &terms,
        );
        self.shared.pages_indexed.fetch_add(1, Ordering::SeqCst);
        debug!(%url, doc_id, terms = terms.len(), "indexed");

        for link in parsed.links {
            self.frontier.push(link, entry.depth + 1, now);
        }

        let since = self.indexed_since_persist.fetch_add(1, Ordering::SeqCst) + 1;
        if since >= PERSIST_EVERY {
            self.indexed_since_persist.store(0, Ordering::SeqCst);
            if let Err(err) = self.index.persist_dirty(&self.store) {
                warn!(error = %err, "periodic index persist failed");
            }
        }
    }
}

fn is_html(page: &FetchedPage) -> bool {
    page.content_type
        .as_deref()
        .map_or(true, |ct| ct.starts_with("text/html"))
}

pub(crate) struct ParsedPage {
    pub title: String,
    pub text: String,
    pub links: Vec<Url>,
}

/// Extract title, visible text, and absolutized outbound links. Returns
/// `None` for pages with no extractable text, which the caller records as a
/// parse skip.
pub(crate) fn parse_page(base: &Url, bytes: &[u8]) -> Option<ParsedPage> {
    let raw = String::from_utf8_lossy(bytes);
    let sel_title = Selector::parse("title").expect("valid selector");
    let sel_body = Selector::parse("body").expect("valid selector");
    let sel_a = Selector::parse("a").expect("valid selector");

    let doc = Html::parse_document(&raw);
    let title = doc
        .select(&sel_title)
        .next()
        .map(|n| n.text().collect::<String>())
        .unwrap_or_default()
        .trim()
        .to_string();
    let text = doc
        .select(&sel_body)
        .next()
        .map(|n| n.text().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    let mut links = Vec::new();
    for a in doc.select(&sel_a) {
        if let Some(href) = a.value().attr("href") {
            if let Ok(mut u) = Url::parse(href).or_else(|_| base.join(href)) {
                if u.scheme().starts_with("http") {
                    u.set_fragment(None);
                    links.push(u);
                }
            }
        }
    }

    if title.is_empty() && text.is_empty() {
        return None;
    }
    Some(ParsedPage { title, text, links })
}

/// 256-bit digest over the extracted title and text, for change detection.
pub(crate) fn content_digest(title: &str, text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\n");
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_title_text_and_links() {
        let base = Url::parse("https://example.se/dir/page.html").unwrap();
        let html = br#"<html><head><title>  Testsida  </title></head>
            <body><p>Hej  varlden</p>
            <a href="/absolute">a</a>
            <a href="relative.html">b</a>
            <a href="https://other.se/x#frag">c</a>
            <a href="mailto:nobody@example.se">d</a>
            </body></html>"#;
        let page = parse_page(&base, html).unwrap();
        assert_eq!(page.title, "Testsida");
        assert!(page.text.contains("Hej varlden"));
        let links: Vec<String> = page.links.iter().map(|u| u.to_string()).collect();
        assert!(links.contains(&"https://example.se/absolute".to_string()));
        assert!(links.contains(&"https://example.se/dir/relative.html".to_string()));
        assert!(links.contains(&"https://other.se/x".to_string()));
        assert_eq!(links.len(), 3);
    }

    #[test]
    fn empty_pages_are_unparseable() {
        let base = Url::parse("https://example.se/").unwrap();
        assert!(parse_page(&base, b"<html><head></head><body></body></html>").is_none());
    }

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let a = content_digest("title", "body");
        assert_eq!(a, content_digest("title", "body"));
        assert_ne!(a, content_digest("title", "other body"));
        assert_ne!(a, content_digest("other title", "body"));
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_enforces_pages_per_minute() {
        let throttle = Throttle::new(2);
        let start = Instant::now();
        throttle.acquire().await;
        throttle.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));
        // Third acquisition has to wait for the window to roll.
        throttle.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(59));
    }
}
