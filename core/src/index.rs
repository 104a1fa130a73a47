//! Positional inverted index. One RwLock guards the whole structure: posting
//! deltas are built outside the lock and applied in a single short write
//! section, so a document's postings become visible to readers all-at-once
//! or not at all. Dirty-term tracking keeps persistence incremental.

use crate::error::StoreError;
use crate::storage::{SnapshotMarker, Store};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

pub type DocId = u64;

/// An indexed page. Immutable once committed except `fetched_at` and
/// `content_hash`, which change on re-crawl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: DocId,
    /// Normalized URL (fragment stripped); unique per document.
    pub url: String,
    pub domain: String,
    pub title: String,
    /// Unix seconds.
    pub fetched_at: u64,
    pub content_hash: [u8; 32],
    /// Token count before stop-word filtering.
    pub raw_term_count: u32,
    pub outbound_links: Vec<String>,
    /// Extracted page text, kept for snippet generation.
    pub body: String,
}

/// Per-document occurrence record for one term. `tf` always equals
/// `positions.len()`, and positions are strictly increasing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Posting {
    pub doc_id: DocId,
    pub positions: Vec<u32>,
    pub tf: u32,
}

/// Sorted by doc_id.
pub type PostingList = Vec<Posting>;

/// What the crawler hands over; the index assigns the doc_id.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub url: String,
    pub domain: String,
    pub title: String,
    pub fetched_at: u64,
    pub content_hash: [u8; 32],
    pub raw_term_count: u32,
    pub outbound_links: Vec<String>,
    pub body: String,
}

#[derive(Debug, Default)]
struct IndexInner {
    postings: HashMap<String, PostingList>,
    docs: HashMap<DocId, Document>,
    url_to_doc: HashMap<String, DocId>,
    /// Distinct terms per document, so re-indexing touches only the terms
    /// the document actually contained.
    doc_terms: HashMap<DocId, Vec<String>>,
    doc_len: HashMap<DocId, u32>,
    /// Cosine norm over the document's term weights (1 + ln tf), computed at
    /// commit time.
    doc_norm: HashMap<DocId, f64>,
    total_len: u64,
    next_doc_id: DocId,
    generation: u64,
    dirty_terms: HashSet<String>,
    dirty_docs: HashSet<DocId>,
}

#[derive(Debug, Default)]
pub struct InvertedIndex {
    inner: RwLock<IndexInner>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a document and its `(term, position)` sequence. Re-committing
    /// an existing URL replaces its postings; unrelated terms are untouched.
    pub fn commit(&self, new: NewDocument, terms: &[(String, u32)]) -> DocId {
        // Group positions per term before taking the lock.
        let mut grouped: BTreeMap<&str, Vec<u32>> = BTreeMap::new();
        for (term, pos) in terms {
            grouped.entry(term.as_str()).or_default().push(*pos);
        }
        let doc_len = terms.len() as u32;
        let norm = grouped
            .values()
            .map(|p| {
                let w = 1.0 + (p.len() as f64).ln();
                w * w
            })
            .sum::<f64>()
            .sqrt();

        let mut inner = self.inner.write();
        let doc_id = match inner.url_to_doc.get(&new.url).copied() {
            Some(existing) => {
                remove_doc_postings(&mut inner, existing);
                existing
            }
            None => {
                let id = inner.next_doc_id;
                inner.next_doc_id += 1;
                id
            }
        };

        for (term, positions) in &grouped {
            let posting = Posting {
                doc_id,
                tf: positions.len() as u32,
                positions: positions.clone(),
            };
            let list = inner.postings.entry(term.to_string()).or_default();
            match list.binary_search_by_key(&doc_id, |p| p.doc_id) {
                Ok(i) => list[i] = posting,
                Err(i) => list.insert(i, posting),
            }
            inner.dirty_terms.insert(term.to_string());
        }

        let term_list: Vec<String> = grouped.keys().map(|t| t.to_string()).collect();
        inner.url_to_doc.insert(new.url.clone(), doc_id);
        inner.doc_terms.insert(doc_id, term_list);
        inner.doc_len.insert(doc_id, doc_len);
        inner.doc_norm.insert(doc_id, norm);
        inner.total_len += doc_len as u64;
        inner.dirty_docs.insert(doc_id);
        inner.docs.insert(
            doc_id,
            Document {
                doc_id,
                url: new.url,
                domain: new.domain,
                title: new.title,
                fetched_at: new.fetched_at,
                content_hash: new.content_hash,
                raw_term_count: new.raw_term_count,
                outbound_links: new.outbound_links,
                body: new.body,
            },
        );
        doc_id
    }

    /// Unchanged re-crawl: update `fetched_at` only, no posting writes.
    pub fn touch(&self, url: &str, fetched_at: u64) -> bool {
        let mut inner = self.inner.write();
        let Some(doc_id) = inner.url_to_doc.get(url).copied() else {
            return false;
        };
        if let Some(doc) = inner.docs.get_mut(&doc_id) {
            doc.fetched_at = fetched_at;
        }
        inner.dirty_docs.insert(doc_id);
        true
    }

    pub fn content_hash(&self, url: &str) -> Option<[u8; 32]> {
        let inner = self.inner.read();
        let doc_id = inner.url_to_doc.get(url)?;
        inner.docs.get(doc_id).map(|d| d.content_hash)
    }

    /// Posting set for a term; empty if the term is absent.
    pub fn postings(&self, term: &str) -> PostingList {
        self.inner
            .read()
            .postings
            .get(term)
            .cloned()
            .unwrap_or_default()
    }

    /// `ln(total_documents / (1 + documents_containing_term))`.
    pub fn idf(&self, term: &str) -> f64 {
        let inner = self.inner.read();
        let total = inner.docs.len() as f64;
        if total == 0.0 {
            return 0.0;
        }
        let df = inner.postings.get(term).map_or(0, |l| l.len()) as f64;
        (total / (1.0 + df)).ln()
    }

    pub fn document(&self, doc_id: DocId) -> Option<Document> {
        self.inner.read().docs.get(&doc_id).cloned()
    }

    pub fn total_docs(&self) -> u64 {
        self.inner.read().docs.len() as u64
    }

    pub fn term_count(&self) -> u64 {
        self.inner.read().postings.len() as u64
    }

    pub fn avg_doc_len(&self) -> f64 {
        let inner = self.inner.read();
        if inner.docs.is_empty() {
            return 0.0;
        }
        inner.total_len as f64 / inner.docs.len() as f64
    }

    pub fn doc_len(&self, doc_id: DocId) -> u32 {
        self.inner.read().doc_len.get(&doc_id).copied().unwrap_or(0)
    }

    pub fn doc_norm(&self, doc_id: DocId) -> f64 {
        self.inner.read().doc_norm.get(&doc_id).copied().unwrap_or(0.0)
    }

    /// Snapshot of all documents, for link-graph builds.
    pub fn all_documents(&self) -> Vec<Document> {
        self.inner.read().docs.values().cloned().collect()
    }

    /// URLs of documents due for re-crawl.
    pub fn stale_urls(&self, now: u64, recrawl_interval: Duration) -> Vec<String> {
        let cutoff = now.saturating_sub(recrawl_interval.as_secs());
        self.inner
            .read()
            .docs
            .values()
            .filter(|d| d.fetched_at < cutoff)
            .map(|d| d.url.clone())
            .collect()
    }

    /// Write changed postings and documents to the store, then mark the
    /// snapshot complete. Unchanged terms are never rewritten.
    pub fn persist_dirty(&self, store: &Store) -> Result<(), StoreError> {
        let (terms, docs, marker) = {
            let mut inner = self.inner.write();
            if inner.dirty_terms.is_empty() && inner.dirty_docs.is_empty() {
                return Ok(());
            }
            inner.generation += 1;
            let dirty_terms = std::mem::take(&mut inner.dirty_terms);
            let dirty_docs = std::mem::take(&mut inner.dirty_docs);
            let terms: Vec<(String, Option<PostingList>)> = dirty_terms
                .into_iter()
                .map(|t| {
                    let list = inner.postings.get(&t).cloned();
                    (t, list)
                })
                .collect();
            let docs: Vec<Document> = dirty_docs
                .iter()
                .filter_map(|id| inner.docs.get(id).cloned())
                .collect();
            let marker = SnapshotMarker {
                generation: inner.generation,
                total_docs: inner.docs.len() as u64,
                created_at: unix_now(),
            };
            (terms, docs, marker)
        };

        for (term, list) in &terms {
            match list {
                Some(list) => store.put_postings(term, list)?,
                None => store.delete_postings(term)?,
            }
        }
        for doc in &docs {
            store.put_document(doc)?;
        }
        store.write_snapshot_marker(&marker)?;
        store.flush()?;
        debug!(
            terms = terms.len(),
            docs = docs.len(),
            generation = marker.generation,
            "persisted index delta"
        );
        Ok(())
    }

    /// Recover from the last complete snapshot. A store with documents but
    /// no marker, or any record that fails validation, is corrupt.
    pub fn load(store: &Store) -> Result<Self, StoreError> {
        let marker = match store.snapshot_marker()? {
            Some(m) => m,
            None => {
                if store.document_count() > 0 {
                    return Err(StoreError::Corrupt(
                        "documents present without a snapshot marker".to_string(),
                    ));
                }
                return Ok(Self::new());
            }
        };

        let mut inner = IndexInner {
            generation: marker.generation,
            ..IndexInner::default()
        };
        for doc in store.load_documents()? {
            inner.url_to_doc.insert(doc.url.clone(), doc.doc_id);
            inner.next_doc_id = inner.next_doc_id.max(doc.doc_id + 1);
            inner.docs.insert(doc.doc_id, doc);
        }
        if inner.docs.len() as u64 != marker.total_docs {
            return Err(StoreError::Corrupt(format!(
                "snapshot marker records {} documents, store holds {}",
                marker.total_docs,
                inner.docs.len()
            )));
        }

        for (term, list) in store.load_postings()? {
            let mut prev: Option<DocId> = None;
            for posting in &list {
                if !inner.docs.contains_key(&posting.doc_id) {
                    return Err(StoreError::Corrupt(format!(
                        "term {term:?} references unknown doc {}",
                        posting.doc_id
                    )));
                }
                if posting.tf as usize != posting.positions.len()
                    || !posting.positions.windows(2).all(|w| w[0] < w[1])
                {
                    return Err(StoreError::Corrupt(format!(
                        "malformed posting for term {term:?}, doc {}",
                        posting.doc_id
                    )));
                }
                if prev.is_some_and(|p| p >= posting.doc_id) {
                    return Err(StoreError::Corrupt(format!(
                        "posting list for {term:?} not sorted by doc_id"
                    )));
                }
                prev = Some(posting.doc_id);

                *inner.doc_len.entry(posting.doc_id).or_insert(0) += posting.tf;
                let w = 1.0 + (posting.tf as f64).ln();
                *inner.doc_norm.entry(posting.doc_id).or_insert(0.0) += w * w;
                inner
                    .doc_terms
                    .entry(posting.doc_id)
                    .or_default()
                    .push(term.clone());
            }
            inner.postings.insert(term, list);
        }
        for norm in inner.doc_norm.values_mut() {
            *norm = norm.sqrt();
        }
        inner.total_len = inner.doc_len.values().map(|l| *l as u64).sum();

        info!(
            docs = inner.docs.len(),
            terms = inner.postings.len(),
            generation = inner.generation,
            "recovered index from snapshot"
        );
        Ok(Self {
            inner: RwLock::new(inner),
        })
    }
}

fn remove_doc_postings(inner: &mut IndexInner, doc_id: DocId) {
    let terms = inner.doc_terms.remove(&doc_id).unwrap_or_default();
    for term in terms {
        let mut emptied = false;
        if let Some(list) = inner.postings.get_mut(&term) {
            if let Ok(i) = list.binary_search_by_key(&doc_id, |p| p.doc_id) {
                list.remove(i);
            }
            emptied = list.is_empty();
        }
        if emptied {
            inner.postings.remove(&term);
        }
        inner.dirty_terms.insert(term);
    }
    if let Some(len) = inner.doc_len.remove(&doc_id) {
        inner.total_len -= len as u64;
    }
    inner.doc_norm.remove(&doc_id);
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
