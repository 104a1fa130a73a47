//! Ranking engine: seven weighted signals folded into one 0–100 score per
//! candidate, deterministic ordering, and single-pass domain
//! diversification.

use crate::authority::LinkScores;
use crate::config::RankingConfig;
use crate::index::DocId;
use std::collections::HashMap;

const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct QueryTerm {
    pub term: String,
    pub tf: u32,
    pub idf: f64,
    /// L2-normalized (1 + ln tf) · idf weight.
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct QueryVector {
    pub terms: Vec<QueryTerm>,
}

/// Fold a normalized `(term, position)` sequence into a weighted query
/// vector. `idf_of` is the index's idf at query time.
pub fn build_query_vector(
    term_positions: &[(String, u32)],
    idf_of: impl Fn(&str) -> f64,
) -> QueryVector {
    let mut order: Vec<String> = Vec::new();
    let mut tally: HashMap<&str, u32> = HashMap::new();
    for (term, _) in term_positions {
        if !tally.contains_key(term.as_str()) {
            order.push(term.clone());
        }
        *tally.entry(term.as_str()).or_insert(0) += 1;
    }

    let mut terms: Vec<QueryTerm> = order
        .into_iter()
        .map(|term| {
            let tf = tally[term.as_str()];
            let idf = idf_of(&term).max(0.0);
            let weight = (1.0 + (tf as f64).ln()) * idf;
            QueryTerm {
                term,
                tf,
                idf,
                weight,
            }
        })
        .collect();

    let norm = terms
        .iter()
        .map(|t| t.weight * t.weight)
        .sum::<f64>()
        .sqrt();
    if norm > 0.0 {
        for t in &mut terms {
            t.weight /= norm;
        }
    }
    QueryVector { terms }
}

/// Everything the ranker needs about one candidate document.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub doc_id: DocId,
    pub domain: String,
    pub title: String,
    pub fetched_at: u64,
    pub doc_len: u32,
    /// Cosine norm over the document's (1 + ln tf) weights.
    pub doc_norm: f64,
    pub internal_links: u32,
    pub external_links: u32,
    /// (index into `QueryVector::terms`, tf in this document).
    pub term_hits: Vec<(usize, u32)>,
}

#[derive(Debug, Clone)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub domain: String,
    pub score: f64,
}

pub struct RankContext<'a> {
    pub cfg: &'a RankingConfig,
    pub domain_authority: &'a HashMap<String, f64>,
    pub link_authority: &'a LinkScores,
    /// Unix seconds at query time.
    pub now: u64,
}

pub fn score_candidates(
    query: &QueryVector,
    candidates: &[Candidate],
    ctx: &RankContext<'_>,
) -> Vec<ScoredDoc> {
    candidates
        .iter()
        .map(|c| ScoredDoc {
            doc_id: c.doc_id,
            domain: c.domain.clone(),
            score: score_one(query, c, ctx),
        })
        .collect()
}

fn score_one(query: &QueryVector, c: &Candidate, ctx: &RankContext<'_>) -> f64 {
    let w = &ctx.cfg.weights;
    let tfidf = cosine_signal(query, c);
    let link_auth = link_authority_signal(c.doc_id, ctx.link_authority);
    let domain_auth = ctx.domain_authority.get(&c.domain).copied().unwrap_or(0.0) / 100.0;
    let age_days = ctx.now.saturating_sub(c.fetched_at) as f64 / 86_400.0;
    let recency = recency_signal(age_days, ctx.cfg.recency_half_life_days);
    let matched: u32 = c.term_hits.iter().map(|(_, tf)| *tf).sum();
    let density = density_signal(matched, c.doc_len, ctx.cfg.density_cap);
    let structure = structure_signal(c.internal_links, c.external_links);
    let locale = locale_signal(&c.domain, &c.title, ctx.cfg);

    100.0
        * (w.tfidf * tfidf
            + w.link_authority * link_auth
            + w.domain_authority * domain_auth
            + w.recency * recency
            + w.keyword_density * density
            + w.link_structure * structure
            + w.locale * locale)
}

/// Cosine between the query vector and the document's matched terms, with
/// the document side normalized by its full-term norm. Lies in [0, 1].
fn cosine_signal(query: &QueryVector, c: &Candidate) -> f64 {
    if c.doc_norm <= 0.0 {
        return 0.0;
    }
    c.term_hits
        .iter()
        .filter_map(|(qi, tf)| {
            let qw = query.terms.get(*qi)?.weight;
            let dw = (1.0 + (*tf as f64).ln()) / c.doc_norm;
            Some(qw * dw)
        })
        .sum::<f64>()
        .clamp(0.0, 1.0)
}

fn link_authority_signal(doc_id: DocId, scores: &LinkScores) -> f64 {
    if scores.max <= 0.0 {
        return 0.0;
    }
    scores.scores.get(&doc_id).copied().unwrap_or(0.0) / scores.max
}

fn recency_signal(age_days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 {
        return 0.0;
    }
    (-age_days / half_life_days).exp()
}

/// Fraction of document tokens matching the query, saturating at the cap so
/// keyword stuffing stops paying off.
fn density_signal(matched_tokens: u32, doc_len: u32, cap: f64) -> f64 {
    if doc_len == 0 || cap <= 0.0 {
        return 0.0;
    }
    (matched_tokens as f64 / doc_len as f64).min(cap) / cap
}

/// Share of outbound links staying on the same site. Pages without links
/// sit at the neutral midpoint.
fn structure_signal(internal: u32, external: u32) -> f64 {
    let total = internal + external;
    if total == 0 {
        return 0.5;
    }
    internal as f64 / total as f64
}

fn locale_signal(domain: &str, title: &str, cfg: &RankingConfig) -> f64 {
    if let Some(tld) = &cfg.preferred_tld {
        if domain.ends_with(&format!(".{tld}")) {
            return 1.0;
        }
    }
    if !cfg.local_terms.is_empty() {
        let title = title.to_lowercase();
        if cfg.local_terms.iter().any(|t| title.contains(&t.to_lowercase())) {
            return 1.0;
        }
    }
    0.0
}

/// Descending by score; doc_id ascending when scores are equal within
/// floating-point epsilon, so identical inputs always order identically.
pub fn sort_scored(scored: &mut [ScoredDoc]) {
    scored.sort_by(|a, b| {
        if (a.score - b.score).abs() < SCORE_EPSILON {
            a.doc_id.cmp(&b.doc_id)
        } else {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        }
    });
}

/// One forward pass over the sorted list: documents past the per-domain cap
/// are skipped and the next-best distinct-domain candidate moves up. Never
/// re-sorts.
pub fn diversify(sorted: &[ScoredDoc], per_domain_cap: usize, max_results: usize) -> Vec<ScoredDoc> {
    let mut taken: Vec<ScoredDoc> = Vec::with_capacity(max_results.min(sorted.len()));
    let mut per_domain: HashMap<&str, usize> = HashMap::new();
    for doc in sorted {
        if taken.len() >= max_results {
            break;
        }
        let count = per_domain.entry(doc.domain.as_str()).or_insert(0);
        if *count >= per_domain_cap {
            continue;
        }
        *count += 1;
        taken.push(doc.clone());
    }
    taken
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RankingConfig;

    fn ctx<'a>(
        cfg: &'a RankingConfig,
        domain_authority: &'a HashMap<String, f64>,
        link_authority: &'a LinkScores,
    ) -> RankContext<'a> {
        RankContext {
            cfg,
            domain_authority,
            link_authority,
            now: 1_700_000_000,
        }
    }

    fn candidate(doc_id: DocId, domain: &str, term_hits: Vec<(usize, u32)>) -> Candidate {
        let norm = term_hits
            .iter()
            .map(|(_, tf)| {
                let w = 1.0 + (*tf as f64).ln();
                w * w
            })
            .sum::<f64>()
            .sqrt();
        Candidate {
            doc_id,
            domain: domain.to_string(),
            title: String::new(),
            fetched_at: 1_700_000_000,
            doc_len: term_hits.iter().map(|(_, tf)| *tf).sum(),
            doc_norm: norm,
            internal_links: 0,
            external_links: 0,
            term_hits,
        }
    }

    fn query(terms: &[&str]) -> QueryVector {
        let seq: Vec<(String, u32)> = terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.to_string(), i as u32))
            .collect();
        build_query_vector(&seq, |_| 1.0)
    }

    #[test]
    fn scores_stay_in_range() {
        let cfg = RankingConfig::default();
        let da = HashMap::from([("a.se".to_string(), 100.0)]);
        let la = LinkScores::default();
        let q = query(&["universitet"]);
        let cands = vec![candidate(0, "a.se", vec![(0, 5)])];
        let scored = score_candidates(&q, &cands, &ctx(&cfg, &da, &la));
        assert!(scored[0].score >= 0.0 && scored[0].score <= 100.0);
    }

    #[test]
    fn tfidf_is_monotone_in_term_frequency() {
        // Two-term documents: the second term is fixed, the query term's tf
        // grows. Rarity (idf) and document length are held equal.
        let q = query(&["alpha"]);
        let mut last = -1.0;
        for tf in 1..=5u32 {
            let mut c = candidate(0, "a.se", vec![(0, tf)]);
            let other = 1.0 + 3.0_f64.ln();
            let own = 1.0 + (tf as f64).ln();
            c.doc_norm = (own * own + other * other).sqrt();
            c.doc_len = 100;
            let s = cosine_signal(&q, &c);
            assert!(s >= 0.0);
            assert!(s > last, "tf={tf}: {s} not above {last}");
            last = s;
        }
    }

    #[test]
    fn ties_break_by_doc_id_ascending() {
        let mut scored = vec![
            ScoredDoc { doc_id: 9, domain: "a.se".into(), score: 40.0 },
            ScoredDoc { doc_id: 2, domain: "b.se".into(), score: 40.0 },
            ScoredDoc { doc_id: 5, domain: "c.se".into(), score: 60.0 },
        ];
        sort_scored(&mut scored);
        let ids: Vec<DocId> = scored.iter().map(|d| d.doc_id).collect();
        assert_eq!(ids, vec![5, 2, 9]);
    }

    #[test]
    fn diversify_caps_domains_and_preserves_rank_order() {
        let sorted = vec![
            ScoredDoc { doc_id: 0, domain: "a.se".into(), score: 90.0 },
            ScoredDoc { doc_id: 1, domain: "a.se".into(), score: 80.0 },
            ScoredDoc { doc_id: 2, domain: "a.se".into(), score: 70.0 },
            ScoredDoc { doc_id: 3, domain: "b.se".into(), score: 60.0 },
            ScoredDoc { doc_id: 4, domain: "c.se".into(), score: 50.0 },
        ];
        let picked = diversify(&sorted, 2, 4);
        let ids: Vec<DocId> = picked.iter().map(|d| d.doc_id).collect();
        // Third a.se page is skipped; the rest keep their relative order.
        assert_eq!(ids, vec![0, 1, 3, 4]);
        let a_count = picked.iter().filter(|d| d.domain == "a.se").count();
        assert!(a_count <= 2);
    }

    #[test]
    fn diversify_is_a_subset_in_rank_order() {
        let sorted: Vec<ScoredDoc> = (0..20)
            .map(|i| ScoredDoc {
                doc_id: i,
                domain: format!("d{}.se", i % 3),
                score: 100.0 - i as f64,
            })
            .collect();
        let picked = diversify(&sorted, 3, 10);
        let mut cursor = 0;
        for doc in &picked {
            let found = sorted[cursor..]
                .iter()
                .position(|s| s.doc_id == doc.doc_id)
                .expect("picked doc must come from the sorted list, in order");
            cursor += found + 1;
        }
    }

    #[test]
    fn recency_decays_with_age() {
        assert!(recency_signal(0.0, 30.0) > recency_signal(10.0, 30.0));
        assert!((recency_signal(0.0, 30.0) - 1.0).abs() < 1e-12);
        assert!(recency_signal(10_000.0, 30.0) >= 0.0);
    }

    #[test]
    fn density_saturates_at_cap() {
        assert_eq!(density_signal(25, 100, 0.25), 1.0);
        assert_eq!(density_signal(80, 100, 0.25), 1.0);
        assert!(density_signal(5, 100, 0.25) < 1.0);
        assert_eq!(density_signal(0, 0, 0.25), 0.0);
    }

    #[test]
    fn structure_rewards_internal_links() {
        assert_eq!(structure_signal(0, 0), 0.5);
        assert!(structure_signal(8, 2) > structure_signal(2, 8));
    }

    #[test]
    fn locale_matches_tld_or_local_terms() {
        let mut cfg = RankingConfig::default();
        cfg.preferred_tld = Some("se".to_string());
        cfg.local_terms = vec!["Stockholm".to_string()];
        assert_eq!(locale_signal("kth.se", "", &cfg), 1.0);
        assert_eq!(locale_signal("example.com", "Visit Stockholm", &cfg), 1.0);
        assert_eq!(locale_signal("example.com", "nothing local", &cfg), 0.0);
    }

    #[test]
    fn query_vector_is_normalized() {
        let q = build_query_vector(
            &[("alpha".into(), 0), ("beta".into(), 1), ("alpha".into(), 2)],
            |_| 2.0,
        );
        assert_eq!(q.terms.len(), 2);
        assert_eq!(q.terms[0].tf, 2);
        let norm: f64 = q.terms.iter().map(|t| t.weight * t.weight).sum();
        assert!((norm - 1.0).abs() < 1e-9);
    }
}
