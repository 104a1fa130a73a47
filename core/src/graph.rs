//! Link graph derived from document outbound links, and the iterative
//! authority computation over it. The graph is rebuilt in batch after each
//! crawl cycle; it is never mutated incrementally.

use crate::frontier::url_key;
use crate::index::{DocId, Document};
use std::collections::HashMap;
use tracing::debug;
use url::Url;

/// Adjacency keyed by doc_id through an arena of node indices, so cycles in
/// the web graph never become ownership cycles.
pub struct LinkGraph {
    nodes: Vec<DocId>,
    out: Vec<Vec<usize>>,
}

impl LinkGraph {
    pub fn build(docs: &[Document]) -> Self {
        let mut nodes: Vec<DocId> = docs.iter().map(|d| d.doc_id).collect();
        nodes.sort_unstable();
        let index_of: HashMap<DocId, usize> =
            nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let by_url: HashMap<String, usize> = docs
            .iter()
            .filter_map(|d| Some((d.url.clone(), *index_of.get(&d.doc_id)?)))
            .collect();

        let mut out = vec![Vec::new(); nodes.len()];
        for doc in docs {
            let Some(&src) = index_of.get(&doc.doc_id) else {
                continue;
            };
            for link in &doc.outbound_links {
                let Ok(url) = Url::parse(link) else { continue };
                // Links to pages outside the corpus are dropped; self-links
                // carry no authority.
                if let Some(&dst) = by_url.get(&url_key(&url)) {
                    if dst != src && !out[src].contains(&dst) {
                        out[src].push(dst);
                    }
                }
            }
        }
        Self { nodes, out }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Iterative fixed-point authority over the link graph, double-buffered per
/// iteration. Dangling mass is redistributed uniformly, so the scores keep
/// summing to 1 regardless of the initial values.
pub fn link_authority(
    graph: &LinkGraph,
    damping: f64,
    max_iterations: u32,
    epsilon: f64,
) -> HashMap<DocId, f64> {
    let n = graph.node_count();
    if n == 0 {
        return HashMap::new();
    }
    let uniform = 1.0 / n as f64;
    let mut current = vec![uniform; n];
    let mut next = vec![0.0; n];

    for iteration in 0..max_iterations {
        let dangling: f64 = (0..n)
            .filter(|&i| graph.out[i].is_empty())
            .map(|i| current[i])
            .sum();
        let base = (1.0 - damping) * uniform + damping * dangling * uniform;
        next.iter_mut().for_each(|s| *s = base);
        for (src, targets) in graph.out.iter().enumerate() {
            if targets.is_empty() {
                continue;
            }
            let share = damping * current[src] / targets.len() as f64;
            for &dst in targets {
                next[dst] += share;
            }
        }

        let delta: f64 = current
            .iter()
            .zip(next.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        std::mem::swap(&mut current, &mut next);
        if delta < epsilon {
            debug!(iteration, delta, "link authority converged");
            break;
        }
    }

    graph
        .nodes
        .iter()
        .zip(current.iter())
        .map(|(id, score)| (*id, *score))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(doc_id: DocId, url: &str, links: &[&str]) -> Document {
        Document {
            doc_id,
            url: url.to_string(),
            domain: "example.se".to_string(),
            title: String::new(),
            fetched_at: 0,
            content_hash: [0u8; 32],
            raw_term_count: 0,
            outbound_links: links.iter().map(|l| l.to_string()).collect(),
            body: String::new(),
        }
    }

    #[test]
    fn scores_sum_to_one_after_convergence() {
        let docs = vec![
            doc(0, "https://a.se/", &["https://b.se/", "https://c.se/"]),
            doc(1, "https://b.se/", &["https://c.se/"]),
            doc(2, "https://c.se/", &["https://a.se/"]),
        ];
        let graph = LinkGraph::build(&docs);
        let scores = link_authority(&graph, 0.85, 100, 1e-10);
        let sum: f64 = scores.values().sum();
        assert!((sum - 1.0).abs() < 1e-6, "sum was {sum}");
    }

    #[test]
    fn dangling_nodes_keep_total_mass() {
        let docs = vec![
            doc(0, "https://a.se/", &["https://b.se/"]),
            doc(1, "https://b.se/", &[]),
        ];
        let graph = LinkGraph::build(&docs);
        let scores = link_authority(&graph, 0.85, 100, 1e-10);
        let sum: f64 = scores.values().sum();
        assert!((sum - 1.0).abs() < 1e-6, "sum was {sum}");
        // The linked-to page accumulates more authority than the linker.
        assert!(scores[&1] > scores[&0]);
    }

    #[test]
    fn links_outside_corpus_are_dropped() {
        let docs = vec![doc(0, "https://a.se/", &["https://elsewhere.se/page"])];
        let graph = LinkGraph::build(&docs);
        assert_eq!(graph.node_count(), 1);
        let scores = link_authority(&graph, 0.85, 50, 1e-9);
        assert!((scores[&0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn empty_graph_yields_no_scores() {
        let graph = LinkGraph::build(&[]);
        assert!(link_authority(&graph, 0.85, 50, 1e-9).is_empty());
    }

    #[test]
    fn convergence_is_independent_of_iteration_budget_once_reached() {
        let docs = vec![
            doc(0, "https://a.se/", &["https://b.se/"]),
            doc(1, "https://b.se/", &["https://a.se/"]),
        ];
        let graph = LinkGraph::build(&docs);
        let a = link_authority(&graph, 0.85, 60, 1e-12);
        let b = link_authority(&graph, 0.85, 200, 1e-12);
        for (id, score) in &a {
            assert!((score - b[id]).abs() < 1e-9);
        }
    }
}
