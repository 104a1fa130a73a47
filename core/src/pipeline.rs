//! Query-serving pipeline: normalize, probe the cache, gather candidates
//! (OR semantics over query terms), rank, diversify, build snippets, fill
//! the cache. A deadline is checked between stages; overrun returns the
//! best-effort partial ranking as a typed error instead of blocking.

use crate::authority::{AuthorityTable, LinkAuthority};
use crate::cache::ResultCache;
use crate::config::Config;
use crate::error::SearchError;
use crate::index::{unix_now, DocId, Document, InvertedIndex};
use crate::normalize::Normalizer;
use crate::rank::{
    build_query_vector, diversify, score_candidates, sort_scored, Candidate, RankContext,
    ScoredDoc,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryResult {
    /// 1-based position in the returned page.
    pub rank: u32,
    pub doc_id: DocId,
    /// Final ranking score in [0, 100].
    pub score: f64,
    pub url: String,
    pub title: String,
    pub snippet: String,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<QueryResult>,
    pub elapsed: Duration,
    pub cached: bool,
}

struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    fn exceeded(&self) -> bool {
        self.started.elapsed() >= self.budget
    }
}

pub struct SearchPipeline {
    index: Arc<InvertedIndex>,
    normalizer: Arc<Normalizer>,
    authority: Arc<AuthorityTable>,
    link_authority: Arc<LinkAuthority>,
    cache: ResultCache,
    cfg: Config,
}

impl SearchPipeline {
    pub fn new(
        index: Arc<InvertedIndex>,
        normalizer: Arc<Normalizer>,
        authority: Arc<AuthorityTable>,
        link_authority: Arc<LinkAuthority>,
        cfg: Config,
    ) -> Self {
        Self {
            index,
            normalizer,
            authority,
            link_authority,
            cache: ResultCache::new(&cfg.cache),
            cfg,
        }
    }

    pub fn search(
        &self,
        raw_query: &str,
        max_results: usize,
    ) -> Result<SearchOutcome, SearchError> {
        let deadline = Deadline::new(self.cfg.query_budget);
        let max_results = max_results.max(1);

        let terms = self.normalizer.normalize(raw_query);
        if terms.is_empty() {
            return Ok(SearchOutcome {
                results: Vec::new(),
                elapsed: deadline.started.elapsed(),
                cached: false,
            });
        }
        let cache_key = terms
            .iter()
            .map(|(t, _)| t.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(mut results) = self.cache.get(&cache_key) {
            results.truncate(max_results);
            return Ok(SearchOutcome {
                results,
                elapsed: deadline.started.elapsed(),
                cached: true,
            });
        }

        // Candidate set: union of documents containing at least one term.
        let query = build_query_vector(&terms, |t| self.index.idf(t));
        let mut hits: HashMap<DocId, Vec<(usize, u32)>> = HashMap::new();
        for (qi, qt) in query.terms.iter().enumerate() {
            for posting in self.index.postings(&qt.term) {
                hits.entry(posting.doc_id).or_default().push((qi, posting.tf));
            }
        }
        if hits.is_empty() {
            let elapsed = deadline.started.elapsed();
            self.cache.insert(cache_key, Vec::new());
            return Ok(SearchOutcome {
                results: Vec::new(),
                elapsed,
                cached: false,
            });
        }
        if deadline.exceeded() {
            return Err(self.timeout(Vec::new()));
        }

        // Large candidate sets are pre-cut by raw term frequency before full
        // ranking: bounded work at the cost of recall on the tail.
        let mut hits: Vec<(DocId, Vec<(usize, u32)>)> = hits.into_iter().collect();
        if hits.len() > self.cfg.max_candidates {
            debug!(
                candidates = hits.len(),
                cap = self.cfg.max_candidates,
                "capping candidate set before ranking"
            );
            hits.sort_by_key(|(doc_id, h)| {
                let total: u32 = h.iter().map(|(_, tf)| *tf).sum();
                (std::cmp::Reverse(total), *doc_id)
            });
            hits.truncate(self.cfg.max_candidates);
        }

        let mut docs: HashMap<DocId, Document> = HashMap::new();
        let mut candidates: Vec<Candidate> = Vec::with_capacity(hits.len());
        for (doc_id, term_hits) in hits {
            let Some(doc) = self.index.document(doc_id) else {
                continue;
            };
            let (internal, external) = link_split(&doc);
            candidates.push(Candidate {
                doc_id,
                domain: doc.domain.clone(),
                title: doc.title.clone(),
                fetched_at: doc.fetched_at,
                doc_len: self.index.doc_len(doc_id),
                doc_norm: self.index.doc_norm(doc_id),
                internal_links: internal,
                external_links: external,
                term_hits,
            });
            docs.insert(doc_id, doc);
        }
        if deadline.exceeded() {
            return Err(self.timeout(Vec::new()));
        }

        let domain_authority = self.authority.snapshot();
        let link_scores = self.link_authority.snapshot();
        let ctx = RankContext {
            cfg: &self.cfg.ranking,
            domain_authority: &domain_authority,
            link_authority: &link_scores,
            now: unix_now(),
        };
        let mut scored = score_candidates(&query, &candidates, &ctx);
        sort_scored(&mut scored);
        if deadline.exceeded() {
            let partial = self.materialize(&scored[..scored.len().min(max_results)], &docs, raw_query);
            return Err(self.timeout(partial));
        }

        let picked = diversify(&scored, self.cfg.ranking.per_domain_cap, max_results);
        let results = self.materialize(&picked, &docs, raw_query);
        self.cache.insert(cache_key, results.clone());

        Ok(SearchOutcome {
            elapsed: deadline.started.elapsed(),
            cached: false,
            results,
        })
    }

    fn materialize(
        &self,
        picked: &[ScoredDoc],
        docs: &HashMap<DocId, Document>,
        raw_query: &str,
    ) -> Vec<QueryResult> {
        let words: Vec<String> = raw_query.split_whitespace().map(|w| w.to_string()).collect();
        picked
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                let doc = docs.get(&s.doc_id)?;
                Some(QueryResult {
                    rank: i as u32 + 1,
                    doc_id: s.doc_id,
                    score: s.score,
                    url: doc.url.clone(),
                    title: doc.title.clone(),
                    snippet: make_snippet(&doc.body, &words),
                })
            })
            .collect()
    }

    fn timeout(&self, partial: Vec<QueryResult>) -> SearchError {
        SearchError::Timeout {
            partial,
            budget_ms: self.cfg.query_budget.as_millis() as u64,
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

fn link_split(doc: &Document) -> (u32, u32) {
    let mut internal = 0;
    let mut external = 0;
    for link in &doc.outbound_links {
        match Url::parse(link).ok().and_then(|u| u.host_str().map(|h| h.to_string())) {
            Some(host) if host == doc.domain => internal += 1,
            Some(_) => external += 1,
            None => {}
        }
    }
    (internal, external)
}

const SNIPPET_BEFORE: usize = 100;
const SNIPPET_AFTER: usize = 200;

/// Window of page text around the first query-word occurrence, with matches
/// wrapped in `<em>`.
fn make_snippet(body: &str, query_words: &[String]) -> String {
    if body.is_empty() {
        return String::new();
    }
    let lowered = body.to_lowercase();
    let hit = query_words
        .iter()
        .filter(|w| !w.trim().is_empty())
        .filter_map(|w| lowered.find(&w.to_lowercase()))
        .min();
    let window = match hit {
        Some(idx) => {
            // Lowercasing can shift byte offsets for a handful of scripts;
            // clamp back onto a char boundary of the original text.
            let idx = floor_char_boundary(body, idx.min(body.len()));
            let start = floor_char_boundary(body, idx.saturating_sub(SNIPPET_BEFORE));
            let end = ceil_char_boundary(body, (idx + SNIPPET_AFTER).min(body.len()));
            &body[start..end]
        }
        None => {
            let end = ceil_char_boundary(body, SNIPPET_AFTER.min(body.len()));
            &body[..end]
        }
    };
    highlight(window.trim(), query_words)
}

fn highlight(snippet: &str, query_words: &[String]) -> String {
    let mut out = snippet.to_string();
    for word in query_words {
        if word.trim().is_empty() {
            continue;
        }
        if let Ok(re) = regex::RegexBuilder::new(&regex::escape(word))
            .case_insensitive(true)
            .build()
        {
            out = re
                .replace_all(&out, |caps: &regex::Captures<'_>| {
                    format!("<em>{}</em>", &caps[0])
                })
                .to_string();
        }
    }
    out
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}
