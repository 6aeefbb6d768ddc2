//! In-process document store.
//!
//! `MemoryStore::lagging()` serves `find` from a snapshot that only moves
//! forward when `converge()` is called, which reproduces the replica lag of
//! the production document store in tests.

use super::{check_revision, DocumentStore, Query, WriteOutcome};
use crate::document::Document;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Inner {
    docs: HashMap<String, Document>,
    /// `Some` when the index lags behind `docs`.
    index: Option<HashMap<String, Document>>,
    writes: u64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose index only catches up on [`MemoryStore::converge`].
    pub fn lagging() -> Self {
        Self {
            inner: Mutex::new(Inner {
                index: Some(HashMap::new()),
                ..Inner::default()
            }),
        }
    }

    /// Bring the lagging index up to date with the primary.
    pub fn converge(&self) {
        let mut inner = self.lock();
        if inner.index.is_some() {
            inner.index = Some(inner.docs.clone());
        }
    }

    /// Number of documents accepted by `bulk_write` so far.
    pub fn write_count(&self) -> u64 {
        self.lock().writes
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_many(&self, ids: &[String]) -> Result<Vec<Document>> {
        let inner = self.lock();
        Ok(ids.iter().filter_map(|id| inner.docs.get(id).cloned()).collect())
    }

    async fn bulk_write(&self, docs: Vec<Document>) -> Result<Vec<WriteOutcome>> {
        let mut inner = self.lock();
        let mut outcomes = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let current = inner.docs.get(doc.id());
            if !check_revision(current, doc.rev()) {
                outcomes.push(WriteOutcome::Conflict {
                    id: doc.id().to_string(),
                    current: current.and_then(Document::rev),
                });
                continue;
            }
            let next = current.and_then(Document::rev).unwrap_or(0) + 1;
            doc.set_rev(Some(next));
            inner.docs.insert(doc.id().to_string(), doc.clone());
            inner.writes += 1;
            outcomes.push(WriteOutcome::Written(doc));
        }
        Ok(outcomes)
    }

    async fn find(&self, query: &Query) -> Result<Vec<Document>> {
        let inner = self.lock();
        let source = inner.index.as_ref().unwrap_or(&inner.docs);
        Ok(source.values().filter(|d| query.matches(d)).cloned().collect())
    }

    async fn delete(&self, id: &str, rev: Option<u64>) -> Result<WriteOutcome> {
        let mut inner = self.lock();
        let current = inner.docs.get(id);
        if current.is_none() || !check_revision(current, rev) {
            return Ok(WriteOutcome::Conflict {
                id: id.to_string(),
                current: current.and_then(Document::rev),
            });
        }
        match inner.docs.remove(id) {
            Some(doc) => Ok(WriteOutcome::Written(doc)),
            None => Ok(WriteOutcome::Conflict {
                id: id.to_string(),
                current: None,
            }),
        }
    }
}
