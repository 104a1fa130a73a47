//! Politeness gate: per-domain admission spacing and a robots.txt cache.
//! Admissions to one domain are serialized by a per-domain token; different
//! domains proceed independently.

use crate::config::CrawlConfig;
use parking_lot::{Mutex, RwLock};
use reqwest::{header, Client};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio::time::Instant as TokioInstant;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct RobotsRules {
    allows: Vec<String>,
    disallows: Vec<String>,
    crawl_delay: Option<Duration>,
    fetched_at: Instant,
}

impl RobotsRules {
    fn allow_all() -> Self {
        Self {
            allows: Vec::new(),
            disallows: Vec::new(),
            crawl_delay: None,
            fetched_at: Instant::now(),
        }
    }
}

/// Holds the last admission instant; locking it is what serializes a domain.
/// Uses the tokio clock so paused-time tests observe real spacing.
struct DomainSlot {
    gate: tokio::sync::Mutex<Option<TokioInstant>>,
}

pub struct PolitenessGate {
    client: Client,
    user_agent: String,
    delay: Duration,
    robots_refresh: Duration,
    slots: Mutex<HashMap<String, Arc<DomainSlot>>>,
    robots: RwLock<HashMap<String, Arc<RobotsRules>>>,
}

impl PolitenessGate {
    pub fn new(client: Client, cfg: &CrawlConfig) -> Self {
        Self {
            client,
            user_agent: cfg.user_agent.clone(),
            delay: cfg.per_domain_delay,
            robots_refresh: cfg.robots_refresh,
            slots: Mutex::new(HashMap::new()),
            robots: RwLock::new(HashMap::new()),
        }
    }

    fn slot(&self, domain: &str) -> Arc<DomainSlot> {
        let mut slots = self.slots.lock();
        slots
            .entry(domain.to_string())
            .or_insert_with(|| {
                Arc::new(DomainSlot {
                    gate: tokio::sync::Mutex::new(None),
                })
            })
            .clone()
    }

    /// Block until a fetch to `domain` may proceed. Two consecutive
    /// admissions to the same domain are never less than the configured
    /// delay apart (robots crawl-delay overrides it upward).
    pub async fn admit(&self, domain: &str) {
        let slot = self.slot(domain);
        let delay = self.effective_delay(domain);
        let mut last = slot.gate.lock().await;
        if let Some(prev) = *last {
            let since = prev.elapsed();
            if since < delay {
                sleep(delay - since).await;
            }
        }
        *last = Some(TokioInstant::now());
    }

    fn effective_delay(&self, domain: &str) -> Duration {
        let robots = self.robots.read();
        robots
            .get(domain)
            .and_then(|r| r.crawl_delay)
            .map_or(self.delay, |d| d.max(self.delay))
    }

    /// Evaluate `url` against the domain's cached robots.txt ruleset,
    /// refetching when the cache entry is older than the refresh interval.
    pub async fn allowed(&self, url: &Url) -> bool {
        let host = match url.host_str() {
            Some(h) => h.to_string(),
            None => return false,
        };
        let cached = {
            let robots = self.robots.read();
            robots
                .get(&host)
                .filter(|r| r.fetched_at.elapsed() < self.robots_refresh)
                .cloned()
        };
        let rules = match cached {
            Some(r) => r,
            None => self.refresh_rules(url.scheme(), &host).await,
        };
        path_allowed(url.path(), &rules)
    }

    async fn refresh_rules(&self, scheme: &str, host: &str) -> Arc<RobotsRules> {
        let robots_url = format!("{scheme}://{host}/robots.txt");
        let rules = match self
            .client
            .get(&robots_url)
            .header(header::USER_AGENT, &self.user_agent)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => {
                let txt = resp.text().await.unwrap_or_default();
                parse_robots(&txt)
            }
            Ok(resp) => {
                debug!(host, status = resp.status().as_u16(), "robots.txt not served, allowing all");
                RobotsRules::allow_all()
            }
            Err(err) => {
                warn!(host, error = %err, "robots.txt unreachable, allowing all");
                RobotsRules::allow_all()
            }
        };
        let rules = Arc::new(rules);
        self.robots.write().insert(host.to_string(), rules.clone());
        rules
    }
}

/// Minimal parser for the `*` user-agent group.
fn parse_robots(txt: &str) -> RobotsRules {
    let mut active = false;
    let mut rules = RobotsRules::allow_all();
    for line in txt.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, val)) = line.split_once(':') {
            let key = key.trim().to_lowercase();
            let val = val.trim();
            match key.as_str() {
                "user-agent" => active = val == "*",
                "allow" if active && !val.is_empty() => rules.allows.push(val.to_string()),
                "disallow" if active && !val.is_empty() => rules.disallows.push(val.to_string()),
                "crawl-delay" if active => {
                    if let Ok(secs) = val.parse::<f64>() {
                        rules.crawl_delay = Some(Duration::from_millis((secs * 1000.0) as u64));
                    }
                }
                _ => {}
            }
        }
    }
    rules
}

/// Longest matching rule wins; Allow beats Disallow at equal length.
fn path_allowed(path: &str, rules: &RobotsRules) -> bool {
    let best_allow = rules
        .allows
        .iter()
        .filter(|a| path.starts_with(a.as_str()))
        .map(|a| a.len())
        .max();
    let best_dis = rules
        .disallows
        .iter()
        .filter(|d| path.starts_with(d.as_str()))
        .map(|d| d.len())
        .max();
    match (best_allow, best_dis) {
        (Some(a), Some(d)) => a >= d,
        (Some(_), None) => true,
        (None, Some(_)) => false,
        (None, None) => true,
    }
}
