//! Optimistic write path.
//!
//! `put` bulk-writes documents and rebases conflicting ones onto the latest
//! stored revision; `update` retries a whole read-modify-write cycle. Both
//! feed the request scope, the uniqueness index and the stage embeddings.

use crate::config::RetryConfig;
use crate::document::{Action, Document};
use crate::error::{FolioError, Result};
use crate::scope::RequestScope;
use crate::stage_sync::{self, SyncChange};
use crate::store::{DocumentStore, WriteOutcome};
use crate::unique::UniqueIndex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_backoff_ms: cfg.base_backoff_ms,
            max_backoff_ms: cfg.max_backoff_ms,
            use_jitter: cfg.use_jitter,
        }
    }

    /// Exponential delay before retry number `attempt` (1-based), capped at
    /// `max_backoff_ms`, plus up to half the capped delay of jitter.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(self.max_backoff_ms);

        if self.use_jitter {
            let jitter_range = (capped / 4).max(1);
            let jitter = rand::random::<u64>() % (2 * jitter_range);
            Duration::from_millis(capped.saturating_add(jitter))
        } else {
            Duration::from_millis(capped)
        }
    }
}

// ---------------------------------------------------------------------------
// Rebasing
// ---------------------------------------------------------------------------

/// Top-level changes from `base` to `mine`. `None` marks a removed key.
/// With no base every key of `mine` counts as changed.
fn diff(base: Option<&Map<String, Value>>, mine: &Map<String, Value>) -> Vec<(String, Option<Value>)> {
    let mut changes: Vec<(String, Option<Value>)> = mine
        .iter()
        .filter(|(k, v)| k.as_str() != "_rev" && base.map_or(true, |b| b.get(*k) != Some(*v)))
        .map(|(k, v)| (k.clone(), Some(v.clone())))
        .collect();
    if let Some(base) = base {
        changes.extend(
            base.keys()
                .filter(|k| k.as_str() != "_rev" && !mine.contains_key(*k))
                .map(|k| (k.clone(), None)),
        );
    }
    changes
}

fn as_object(doc: &Document) -> Result<Map<String, Value>> {
    match serde_json::to_value(doc)? {
        Value::Object(map) => Ok(map),
        _ => Err(FolioError::Validation(format!(
            "document {} did not serialize to an object",
            doc.id()
        ))),
    }
}

/// Replay the caller's changes on top of `latest`, taking its revision.
fn rebase(
    latest: &Document,
    changes: &[(String, Option<Value>)],
) -> Result<Document> {
    let mut map = as_object(latest)?;
    for (k, v) in changes {
        match v {
            Some(v) => {
                map.insert(k.clone(), v.clone());
            }
            None => {
                map.remove(k);
            }
        }
    }
    let mut doc: Document = serde_json::from_value(Value::Object(map))?;
    doc.set_rev(latest.rev());
    Ok(doc)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Writer {
    store: Arc<dyn DocumentStore>,
    unique: Arc<dyn UniqueIndex>,
    retry: RetryPolicy,
    max_depth: usize,
}

impl Writer {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        unique: Arc<dyn UniqueIndex>,
        retry: RetryPolicy,
        max_depth: usize,
    ) -> Self {
        Self {
            store,
            unique,
            retry,
            max_depth,
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Persist `docs` and propagate written actions into their stages.
    pub async fn put(&self, scope: &RequestScope, docs: Vec<Document>) -> Result<Vec<Document>> {
        let written = self.put_raw(scope, docs).await?;
        let changes: Vec<SyncChange> = written
            .iter()
            .filter_map(Document::as_action)
            .map(|a| SyncChange::Upsert(a.clone()))
            .collect();
        stage_sync::sync_workflow(self, scope, &changes).await?;
        Ok(written)
    }

    /// Bulk write with conflict rebasing; no stage propagation.
    pub(crate) async fn put_raw(
        &self,
        scope: &RequestScope,
        docs: Vec<Document>,
    ) -> Result<Vec<Document>> {
        let order: Vec<String> = docs.iter().map(|d| d.id().to_string()).collect();
        let mut changes: HashMap<String, Vec<(String, Option<Value>)>> = HashMap::new();
        for doc in &docs {
            let base = scope.get(doc.id()).map(|d| as_object(&d)).transpose()?;
            changes.insert(doc.id().to_string(), diff(base.as_ref(), &as_object(doc)?));
        }

        let mut written: HashMap<String, Document> = HashMap::new();
        let mut pending = docs;
        let mut attempt = 1;
        loop {
            let outcomes = self.store.bulk_write(pending).await?;
            let mut conflicts = Vec::new();
            for outcome in outcomes {
                match outcome {
                    WriteOutcome::Written(doc) => {
                        written.insert(doc.id().to_string(), doc);
                    }
                    WriteOutcome::Conflict { id, .. } => conflicts.push(id),
                }
            }
            if conflicts.is_empty() {
                break;
            }
            if attempt >= self.retry.max_attempts {
                return Err(FolioError::RetriesExhausted {
                    attempts: attempt,
                    ids: conflicts,
                });
            }
            let backoff = self.retry.calculate_backoff(attempt);
            tracing::debug!(
                attempt,
                conflicts = conflicts.len(),
                backoff_ms = backoff.as_millis() as u64,
                "write conflict, rebasing"
            );
            tokio::time::sleep(backoff).await;

            let latest: HashMap<String, Document> = self
                .store
                .get_many(&conflicts)
                .await?
                .into_iter()
                .map(|d| (d.id().to_string(), d))
                .collect();
            pending = Vec::with_capacity(conflicts.len());
            for id in &conflicts {
                let my_changes = changes.get(id).map(Vec::as_slice).unwrap_or_default();
                let next = match latest.get(id) {
                    Some(current) => rebase(current, my_changes)?,
                    // deleted concurrently: write it back as a fresh insert
                    None => {
                        let mut map = Map::new();
                        for (k, v) in my_changes {
                            if let Some(v) = v {
                                map.insert(k.clone(), v.clone());
                            }
                        }
                        let mut doc: Document = serde_json::from_value(Value::Object(map))?;
                        doc.set_rev(None);
                        doc
                    }
                };
                pending.push(next);
            }
            attempt += 1;
        }

        let out: Vec<Document> = order
            .iter()
            .filter_map(|id| written.remove(id))
            .collect();
        self.after_write(scope, &out).await?;
        Ok(out)
    }

    /// Read-modify-write on the latest stored revision, then stage propagation.
    pub async fn update<F>(
        &self,
        scope: &RequestScope,
        id: &str,
        expected_rev: Option<u64>,
        mutator: F,
    ) -> Result<Document>
    where
        F: FnMut(&mut Document) -> Result<bool> + Send,
    {
        let doc = self.update_raw(scope, id, expected_rev, mutator).await?;
        if let Some(action) = doc.as_action() {
            stage_sync::sync_workflow(self, scope, &[SyncChange::Upsert(action.clone())]).await?;
        }
        Ok(doc)
    }

    /// Read-modify-write without stage propagation. The mutator returns
    /// whether it changed anything; an unchanged document is not written.
    /// A write conflict reruns the whole cycle against a fresh read.
    pub(crate) async fn update_raw<F>(
        &self,
        scope: &RequestScope,
        id: &str,
        expected_rev: Option<u64>,
        mut mutator: F,
    ) -> Result<Document>
    where
        F: FnMut(&mut Document) -> Result<bool> + Send,
    {
        let ids = [id.to_string()];
        let mut attempt = 1;
        loop {
            let mut doc = scope
                .refresh(self.store.as_ref(), &ids)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| FolioError::NotFound(id.to_string()))?;
            if let Some(expected) = expected_rev {
                if doc.rev() != Some(expected) {
                    return Err(FolioError::Conflict {
                        id: id.to_string(),
                        expected: Some(expected),
                        found: doc.rev(),
                    });
                }
            }
            if !mutator(&mut doc)? {
                return Ok(doc);
            }

            let outcome = self.store.bulk_write(vec![doc]).await?;
            match outcome.into_iter().next() {
                Some(WriteOutcome::Written(doc)) => {
                    self.after_write(scope, std::slice::from_ref(&doc)).await?;
                    return Ok(doc);
                }
                Some(WriteOutcome::Conflict { .. }) if attempt < self.retry.max_attempts => {
                    let backoff = self.retry.calculate_backoff(attempt);
                    tracing::debug!(id, attempt, "update conflict, rereading");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                _ => {
                    return Err(FolioError::RetriesExhausted {
                        attempts: attempt,
                        ids: ids.to_vec(),
                    })
                }
            }
        }
    }

    /// Remove a document and its embedding, freeing its unique keys.
    pub async fn delete(&self, scope: &RequestScope, id: &str, rev: Option<u64>) -> Result<Document> {
        match self.store.delete(id, rev).await? {
            WriteOutcome::Written(doc) => {
                scope.forget(id);
                self.unique.remove(&doc.unique_keys()).await?;
                if let Some(action) = doc.as_action() {
                    stage_sync::sync_workflow(self, scope, &[SyncChange::Delete(action.clone())])
                        .await?;
                }
                Ok(doc)
            }
            WriteOutcome::Conflict { current: None, .. } => Err(FolioError::NotFound(id.to_string())),
            WriteOutcome::Conflict { current, .. } => Err(FolioError::Conflict {
                id: id.to_string(),
                expected: rev,
                found: current,
            }),
        }
    }

    async fn after_write(&self, scope: &RequestScope, docs: &[Document]) -> Result<()> {
        scope.record_written(docs);
        let keys: Vec<String> = docs.iter().flat_map(Document::unique_keys).collect();
        if !keys.is_empty() {
            self.unique.insert(&keys).await?;
        }
        Ok(())
    }
}

/// Convenience for handlers that write a single action.
pub async fn put_action(writer: &Writer, scope: &RequestScope, action: Action) -> Result<Action> {
    writer
        .put(scope, vec![action.into()])
        .await?
        .into_iter()
        .next()
        .and_then(Document::into_action)
        .ok_or_else(|| FolioError::Db("bulk write returned no document".to_string()))
}
