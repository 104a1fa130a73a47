//! Crawl frontier: a FIFO of URLs waiting to be fetched, a seen-set keyed by
//! normalized URL, and per-domain page counters. Owned by the scheduler;
//! closing it is how a crawl is stopped.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use url::Url;

#[derive(Debug, Clone)]
pub struct FrontierEntry {
    pub url: Url,
    pub depth: u32,
    /// Unix seconds at discovery time.
    pub discovered_at: u64,
}

/// Why a push was refused. Surfaced in crawl statistics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    AlreadySeen,
    DepthExceeded,
    DomainFull,
    DomainNotAllowed,
    NotHttp,
}

pub struct FrontierLimits {
    pub max_depth: u32,
    pub max_pages_per_domain: usize,
    /// Empty means every domain is allowed.
    pub allowed_domains: Vec<String>,
}

struct FrontierInner {
    queue: VecDeque<FrontierEntry>,
    seen: HashSet<String>,
    per_domain: HashMap<String, usize>,
}

pub struct Frontier {
    limits: FrontierLimits,
    inner: Mutex<FrontierInner>,
    closed: AtomicBool,
}

/// Canonical key for the seen-set and the document store: the URL with its
/// fragment stripped.
pub fn url_key(url: &Url) -> String {
    let mut u = url.clone();
    u.set_fragment(None);
    u.to_string()
}

impl Frontier {
    pub fn new(limits: FrontierLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(FrontierInner {
                queue: VecDeque::new(),
                seen: HashSet::new(),
                per_domain: HashMap::new(),
            }),
            closed: AtomicBool::new(false),
        }
    }

    pub fn domain_allowed(&self, host: &str) -> bool {
        if self.limits.allowed_domains.is_empty() {
            return true;
        }
        self.limits
            .allowed_domains
            .iter()
            .any(|d| host == d || host.ends_with(&format!(".{d}")))
    }

    pub fn push(&self, url: Url, depth: u32, discovered_at: u64) -> PushOutcome {
        if !url.scheme().starts_with("http") {
            return PushOutcome::NotHttp;
        }
        if depth > self.limits.max_depth {
            return PushOutcome::DepthExceeded;
        }
        let host = match url.host_str() {
            Some(h) => h.to_string(),
            None => return PushOutcome::NotHttp,
        };
        if !self.domain_allowed(&host) {
            return PushOutcome::DomainNotAllowed;
        }
        let key = url_key(&url);
        let mut inner = self.inner.lock();
        if inner.seen.contains(&key) {
            return PushOutcome::AlreadySeen;
        }
        let count = inner.per_domain.get(&host).copied().unwrap_or(0);
        if count >= self.limits.max_pages_per_domain {
            return PushOutcome::DomainFull;
        }
        inner.seen.insert(key);
        inner.per_domain.insert(host, count + 1);
        inner.queue.push_back(FrontierEntry {
            url,
            depth,
            discovered_at,
        });
        PushOutcome::Queued
    }

    /// Entries are removed on dequeue and never re-inserted within one run.
    pub fn pop(&self) -> Option<FrontierEntry> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.inner.lock().queue.pop_front()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn seen_count(&self) -> usize {
        self.inner.lock().seen.len()
    }

    /// Drain what is left, for persistence at shutdown.
    pub fn drain_pending(&self) -> Vec<FrontierEntry> {
        let mut inner = self.inner.lock();
        inner.queue.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frontier() -> Frontier {
        Frontier::new(FrontierLimits {
            max_depth: 2,
            max_pages_per_domain: 2,
            allowed_domains: vec!["example.se".to_string()],
        })
    }

    fn u(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn refuses_duplicate_urls() {
        let f = frontier();
        assert_eq!(f.push(u("https://example.se/a"), 0, 0), PushOutcome::Queued);
        assert_eq!(f.push(u("https://example.se/a"), 0, 0), PushOutcome::AlreadySeen);
        // Same page, different fragment: one seen-set entry.
        assert_eq!(
            f.push(u("https://example.se/a#section"), 0, 0),
            PushOutcome::AlreadySeen
        );
    }

    #[test]
    fn enforces_depth_and_domain_limits() {
        let f = frontier();
        assert_eq!(f.push(u("https://example.se/a"), 3, 0), PushOutcome::DepthExceeded);
        assert_eq!(f.push(u("https://other.se/"), 0, 0), PushOutcome::DomainNotAllowed);
        assert_eq!(f.push(u("https://example.se/1"), 0, 0), PushOutcome::Queued);
        assert_eq!(f.push(u("https://example.se/2"), 0, 0), PushOutcome::Queued);
        assert_eq!(f.push(u("https://example.se/3"), 0, 0), PushOutcome::DomainFull);
    }

    #[test]
    fn subdomains_of_allowed_domains_pass() {
        let f = frontier();
        assert_eq!(f.push(u("https://www.example.se/"), 0, 0), PushOutcome::Queued);
    }

    #[test]
    fn close_stops_dequeue() {
        let f = frontier();
        f.push(u("https://example.se/a"), 0, 0);
        f.close();
        assert!(f.pop().is_none());
    }

    #[test]
    fn pops_in_fifo_order() {
        let f = frontier();
        f.push(u("https://example.se/first"), 0, 0);
        f.push(u("https://example.se/second"), 1, 0);
        assert_eq!(f.pop().unwrap().url.path(), "/first");
        assert_eq!(f.pop().unwrap().url.path(), "/second");
        assert!(f.pop().is_none());
    }
}
