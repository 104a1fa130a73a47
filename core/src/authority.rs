//! Read-mostly authority tables shared between the crawl and query sides.
//! Both are updated only by full-table swap: readers clone an `Arc` and can
//! never observe a half-updated table.

use crate::index::DocId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Domain → trust score in [0, 100].
#[derive(Default)]
pub struct AuthorityTable {
    table: RwLock<Arc<HashMap<String, f64>>>,
}

impl AuthorityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, domain: &str) -> f64 {
        self.table.read().get(domain).copied().unwrap_or(0.0)
    }

    pub fn snapshot(&self) -> Arc<HashMap<String, f64>> {
        self.table.read().clone()
    }

    /// Replace the whole table. Scores are clamped to [0, 100].
    pub fn swap(&self, table: HashMap<String, f64>) {
        let clamped: HashMap<String, f64> = table
            .into_iter()
            .map(|(domain, score)| (domain, score.clamp(0.0, 100.0)))
            .collect();
        *self.table.write() = Arc::new(clamped);
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Link-graph authority scores with their maximum, for normalization at
/// ranking time. Swapped wholesale after each batch recompute.
#[derive(Debug, Default)]
pub struct LinkScores {
    pub scores: HashMap<DocId, f64>,
    pub max: f64,
}

#[derive(Default)]
pub struct LinkAuthority {
    inner: RwLock<Arc<LinkScores>>,
}

impl LinkAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<LinkScores> {
        self.inner.read().clone()
    }

    pub fn swap(&self, scores: HashMap<DocId, f64>) {
        let max = scores.values().fold(0.0_f64, |m, s| m.max(*s));
        *self.inner.write() = Arc::new(LinkScores { scores, max });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_replaces_wholesale() {
        let table = AuthorityTable::new();
        table.swap(HashMap::from([("a.se".to_string(), 80.0)]));
        assert_eq!(table.get("a.se"), 80.0);
        table.swap(HashMap::from([("b.se".to_string(), 50.0)]));
        assert_eq!(table.get("a.se"), 0.0);
        assert_eq!(table.get("b.se"), 50.0);
    }

    #[test]
    fn scores_are_clamped() {
        let table = AuthorityTable::new();
        table.swap(HashMap::from([
            ("high.se".to_string(), 250.0),
            ("low.se".to_string(), -3.0),
        ]));
        assert_eq!(table.get("high.se"), 100.0);
        assert_eq!(table.get("low.se"), 0.0);
    }

    #[test]
    fn readers_hold_a_consistent_snapshot() {
        let table = AuthorityTable::new();
        table.swap(HashMap::from([("a.se".to_string(), 10.0)]));
        let snap = table.snapshot();
        table.swap(HashMap::new());
        // The old snapshot is still intact.
        assert_eq!(snap.get("a.se"), Some(&10.0));
        assert!(table.is_empty());
    }

    #[test]
    fn link_scores_track_max() {
        let auth = LinkAuthority::new();
        auth.swap(HashMap::from([(1, 0.2), (2, 0.5), (3, 0.3)]));
        let snap = auth.snapshot();
        assert_eq!(snap.max, 0.5);
        assert_eq!(snap.scores[&2], 0.5);
    }
}
