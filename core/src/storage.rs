//! Durable storage over sled: byte-keyed trees for documents, postings,
//! domain authority, the pending frontier, and snapshot metadata. Values are
//! bincode-encoded. A snapshot is complete only once its marker is written;
//! recovery refuses anything that fails to decode.

use crate::error::StoreError;
use crate::index::{DocId, Document, PostingList};
use serde::{Deserialize, Serialize};
use sled::Tree;
use std::collections::HashMap;
use std::path::Path;

const SNAPSHOT_KEY: &[u8] = b"snapshot";
const PENDING_KEY: &[u8] = b"pending";

/// Written last during a snapshot; its presence marks the snapshot complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotMarker {
    pub generation: u64,
    pub total_docs: u64,
    /// Unix seconds.
    pub created_at: u64,
}

/// A frontier entry in storable form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEntry {
    pub url: String,
    pub depth: u32,
    pub discovered_at: u64,
}

pub struct Store {
    db: sled::Db,
    docs: Tree,
    postings: Tree,
    meta: Tree,
    authority: Tree,
    frontier: Tree,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            docs: db.open_tree("docs")?,
            postings: db.open_tree("postings")?,
            meta: db.open_tree("meta")?,
            authority: db.open_tree("authority")?,
            frontier: db.open_tree("frontier")?,
            db,
        })
    }

    pub fn put_document(&self, doc: &Document) -> Result<(), StoreError> {
        let bytes = bincode::serialize(doc)?;
        self.docs.insert(doc.doc_id.to_be_bytes(), bytes)?;
        Ok(())
    }

    pub fn document(&self, doc_id: DocId) -> Result<Option<Document>, StoreError> {
        match self.docs.get(doc_id.to_be_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes, "document")?)),
            None => Ok(None),
        }
    }

    pub fn load_documents(&self) -> Result<Vec<Document>, StoreError> {
        let mut out = Vec::new();
        for item in self.docs.iter() {
            let (_, bytes) = item?;
            out.push(decode(&bytes, "document")?);
        }
        Ok(out)
    }

    pub fn put_postings(&self, term: &str, list: &PostingList) -> Result<(), StoreError> {
        let bytes = bincode::serialize(list)?;
        self.postings.insert(term.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn delete_postings(&self, term: &str) -> Result<(), StoreError> {
        self.postings.remove(term.as_bytes())?;
        Ok(())
    }

    pub fn load_postings(&self) -> Result<Vec<(String, PostingList)>, StoreError> {
        let mut out = Vec::new();
        for item in self.postings.iter() {
            let (key, bytes) = item?;
            let term = String::from_utf8(key.to_vec())
                .map_err(|_| StoreError::Corrupt("non-utf8 term key".to_string()))?;
            out.push((term, decode(&bytes, "postings")?));
        }
        Ok(out)
    }

    /// Replace the stored authority table wholesale.
    pub fn put_authority(&self, table: &HashMap<String, f64>) -> Result<(), StoreError> {
        self.authority.clear()?;
        for (domain, score) in table {
            self.authority
                .insert(domain.as_bytes(), &score.to_be_bytes())?;
        }
        Ok(())
    }

    pub fn load_authority(&self) -> Result<HashMap<String, f64>, StoreError> {
        let mut out = HashMap::new();
        for item in self.authority.iter() {
            let (key, bytes) = item?;
            let domain = String::from_utf8(key.to_vec())
                .map_err(|_| StoreError::Corrupt("non-utf8 domain key".to_string()))?;
            let raw: [u8; 8] = bytes
                .as_ref()
                .try_into()
                .map_err(|_| StoreError::Corrupt("authority score width".to_string()))?;
            out.insert(domain, f64::from_be_bytes(raw));
        }
        Ok(out)
    }

    pub fn save_frontier(&self, entries: &[PendingEntry]) -> Result<(), StoreError> {
        let bytes = bincode::serialize(entries)?;
        self.frontier.insert(PENDING_KEY, bytes)?;
        Ok(())
    }

    pub fn take_frontier(&self) -> Result<Vec<PendingEntry>, StoreError> {
        match self.frontier.remove(PENDING_KEY)? {
            Some(bytes) => decode(&bytes, "frontier"),
            None => Ok(Vec::new()),
        }
    }

    pub fn write_snapshot_marker(&self, marker: &SnapshotMarker) -> Result<(), StoreError> {
        let bytes = bincode::serialize(marker)?;
        self.meta.insert(SNAPSHOT_KEY, bytes)?;
        Ok(())
    }

    pub fn snapshot_marker(&self) -> Result<Option<SnapshotMarker>, StoreError> {
        match self.meta.get(SNAPSHOT_KEY)? {
            Some(bytes) => Ok(Some(decode(&bytes, "snapshot marker")?)),
            None => Ok(None),
        }
    }

    /// Flush everything to disk. The marker must already be written; sled
    /// orders the flush after all prior inserts.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn size_on_disk(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }

    pub fn document_count(&self) -> usize {
        self.docs.len()
    }
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8], what: &str) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Corrupt(format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Posting;
    use tempfile::tempdir;

    fn doc(doc_id: DocId, url: &str) -> Document {
        Document {
            doc_id,
            url: url.to_string(),
            domain: "example.se".to_string(),
            title: "Example".to_string(),
            fetched_at: 1_700_000_000,
            content_hash: [7u8; 32],
            raw_term_count: 42,
            outbound_links: vec!["https://example.se/other".to_string()],
            body: "example body".to_string(),
        }
    }

    #[test]
    fn document_round_trip() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let d = doc(1, "https://example.se/");
        store.put_document(&d).unwrap();
        let loaded = store.document(1).unwrap().unwrap();
        assert_eq!(loaded.url, d.url);
        assert_eq!(loaded.content_hash, d.content_hash);
        assert!(store.document(2).unwrap().is_none());
    }

    #[test]
    fn postings_round_trip() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let list = vec![Posting {
            doc_id: 3,
            positions: vec![1, 5, 9],
            tf: 3,
        }];
        store.put_postings("term", &list).unwrap();
        let loaded = store.load_postings().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, "term");
        assert_eq!(loaded[0].1, list);
    }

    #[test]
    fn snapshot_marker_round_trip() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        assert!(store.snapshot_marker().unwrap().is_none());
        let marker = SnapshotMarker {
            generation: 4,
            total_docs: 10,
            created_at: 1_700_000_000,
        };
        store.write_snapshot_marker(&marker).unwrap();
        assert_eq!(store.snapshot_marker().unwrap().unwrap(), marker);
    }

    #[test]
    fn corrupt_record_is_detected() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store.docs.insert(1u64.to_be_bytes(), &b"garbage"[..]).unwrap();
        match store.document(1) {
            Err(StoreError::Corrupt(_)) => {}
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn frontier_take_clears_pending() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        store
            .save_frontier(&[PendingEntry {
                url: "https://example.se/".to_string(),
                depth: 1,
                discovered_at: 0,
            }])
            .unwrap();
        assert_eq!(store.take_frontier().unwrap().len(), 1);
        assert!(store.take_frontier().unwrap().is_empty());
    }
}
