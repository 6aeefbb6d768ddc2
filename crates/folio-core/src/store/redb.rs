//! Durable backend on redb.
//!
//! # Table design
//!
//! ```text
//! documents : @id           -> JSON-encoded Document (carries `_rev`)
//! locks     : lock key      -> JSON-encoded LeaseRecord { token, expires_at_ms }
//! unique    : unique key    -> empty
//! ```
//!
//! redb serializes write transactions, so the revision check and the write
//! of a bulk batch happen atomically. One `RedbStore` backs the document
//! store, the lease table and the uniqueness index.

use super::{check_revision, DocumentStore, Query, WriteOutcome};
use crate::document::Document;
use crate::error::{FolioError, Result};
use crate::lock::LockService;
use crate::unique::UniqueIndex;
use async_trait::async_trait;
use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");
const LOCKS: TableDefinition<&str, &[u8]> = TableDefinition::new("locks");
const UNIQUE: TableDefinition<&str, &[u8]> = TableDefinition::new("unique");

fn db_err(e: impl std::fmt::Display) -> FolioError {
    FolioError::Db(e.to_string())
}

#[derive(Debug, Serialize, Deserialize)]
struct LeaseRecord {
    token: String,
    expires_at_ms: i64,
}

// ---------------------------------------------------------------------------
// RedbStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create the database at `path`, creating every table up front.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(DOCUMENTS).map_err(db_err)?;
        wt.open_table(LOCKS).map_err(db_err)?;
        wt.open_table(UNIQUE).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Run a redb operation on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| FolioError::Db(format!("blocking task join error: {e}")))?
    }
}

fn read_doc(bytes: &[u8]) -> Result<Document> {
    Ok(serde_json::from_slice(bytes)?)
}

#[async_trait]
impl DocumentStore for RedbStore {
    async fn get_many(&self, ids: &[String]) -> Result<Vec<Document>> {
        let ids = ids.to_vec();
        self.blocking(move |db| {
            let rt = db.begin_read().map_err(db_err)?;
            let table = rt.open_table(DOCUMENTS).map_err(db_err)?;
            let mut out = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(v) = table.get(id.as_str()).map_err(db_err)? {
                    out.push(read_doc(v.value())?);
                }
            }
            Ok(out)
        })
        .await
    }

    async fn bulk_write(&self, docs: Vec<Document>) -> Result<Vec<WriteOutcome>> {
        self.blocking(move |db| {
            let wt = db.begin_write().map_err(db_err)?;
            let mut outcomes = Vec::with_capacity(docs.len());
            {
                let mut table = wt.open_table(DOCUMENTS).map_err(db_err)?;
                for mut doc in docs {
                    let current = match table.get(doc.id()).map_err(db_err)? {
                        Some(v) => Some(read_doc(v.value())?),
                        None => None,
                    };
                    if !check_revision(current.as_ref(), doc.rev()) {
                        outcomes.push(WriteOutcome::Conflict {
                            id: doc.id().to_string(),
                            current: current.as_ref().and_then(Document::rev),
                        });
                        continue;
                    }
                    let next = current.as_ref().and_then(Document::rev).unwrap_or(0) + 1;
                    doc.set_rev(Some(next));
                    let bytes = serde_json::to_vec(&doc)?;
                    table
                        .insert(doc.id(), bytes.as_slice())
                        .map_err(db_err)?;
                    outcomes.push(WriteOutcome::Written(doc));
                }
            }
            wt.commit().map_err(db_err)?;
            Ok(outcomes)
        })
        .await
    }

    async fn find(&self, query: &Query) -> Result<Vec<Document>> {
        let query = query.clone();
        self.blocking(move |db| {
            let rt = db.begin_read().map_err(db_err)?;
            let table = rt.open_table(DOCUMENTS).map_err(db_err)?;
            let mut out = Vec::new();
            for entry in table.iter().map_err(db_err)? {
                let (_, v) = entry.map_err(db_err)?;
                let doc = read_doc(v.value())?;
                if query.matches(&doc) {
                    out.push(doc);
                }
            }
            Ok(out)
        })
        .await
    }

    async fn delete(&self, id: &str, rev: Option<u64>) -> Result<WriteOutcome> {
        let id = id.to_string();
        self.blocking(move |db| {
            let wt = db.begin_write().map_err(db_err)?;
            let outcome = {
                let mut table = wt.open_table(DOCUMENTS).map_err(db_err)?;
                let current = match table.get(id.as_str()).map_err(db_err)? {
                    Some(v) => Some(read_doc(v.value())?),
                    None => None,
                };
                match current {
                    Some(doc) if check_revision(Some(&doc), rev) => {
                        table.remove(id.as_str()).map_err(db_err)?;
                        WriteOutcome::Written(doc)
                    }
                    other => WriteOutcome::Conflict {
                        id: id.clone(),
                        current: other.as_ref().and_then(Document::rev),
                    },
                }
            };
            wt.commit().map_err(db_err)?;
            Ok(outcome)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Leases
// ---------------------------------------------------------------------------

#[async_trait]
impl LockService for RedbStore {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<String> {
        let key = key.to_string();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        self.blocking(move |db| {
            let now_ms = Utc::now().timestamp_millis();
            let token = uuid::Uuid::new_v4().to_string();
            let wt = db.begin_write().map_err(db_err)?;
            {
                let mut table = wt.open_table(LOCKS).map_err(db_err)?;
                let held = match table.get(key.as_str()).map_err(db_err)? {
                    Some(v) => {
                        let rec: LeaseRecord = serde_json::from_slice(v.value())?;
                        rec.expires_at_ms > now_ms
                    }
                    None => false,
                };
                if held {
                    return Err(FolioError::LockUnavailable { keys: vec![key] });
                }
                let rec = LeaseRecord {
                    token: token.clone(),
                    expires_at_ms: now_ms.saturating_add(ttl_ms),
                };
                let bytes = serde_json::to_vec(&rec)?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(db_err)?;
            }
            wt.commit().map_err(db_err)?;
            Ok(token)
        })
        .await
    }

    async fn release(&self, key: &str, token: &str) -> Result<bool> {
        let key = key.to_string();
        let token = token.to_string();
        self.blocking(move |db| {
            let wt = db.begin_write().map_err(db_err)?;
            let released = {
                let mut table = wt.open_table(LOCKS).map_err(db_err)?;
                let owned = match table.get(key.as_str()).map_err(db_err)? {
                    Some(v) => {
                        let rec: LeaseRecord = serde_json::from_slice(v.value())?;
                        rec.token == token
                    }
                    None => false,
                };
                if owned {
                    table.remove(key.as_str()).map_err(db_err)?;
                }
                owned
            };
            wt.commit().map_err(db_err)?;
            Ok(released)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Uniqueness index
// ---------------------------------------------------------------------------

#[async_trait]
impl UniqueIndex for RedbStore {
    async fn insert(&self, keys: &[String]) -> Result<()> {
        let keys = keys.to_vec();
        self.blocking(move |db| {
            let wt = db.begin_write().map_err(db_err)?;
            {
                let mut table = wt.open_table(UNIQUE).map_err(db_err)?;
                for k in &keys {
                    table.insert(k.as_str(), [].as_slice()).map_err(db_err)?;
                }
            }
            wt.commit().map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.blocking(move |db| {
            let rt = db.begin_read().map_err(db_err)?;
            let table = rt.open_table(UNIQUE).map_err(db_err)?;
            Ok(table.get(key.as_str()).map_err(db_err)?.is_some())
        })
        .await
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        let keys = keys.to_vec();
        self.blocking(move |db| {
            let wt = db.begin_write().map_err(db_err)?;
            {
                let mut table = wt.open_table(UNIQUE).map_err(db_err)?;
                for k in &keys {
                    table.remove(k.as_str()).map_err(db_err)?;
                }
            }
            wt.commit().map_err(db_err)?;
            Ok(())
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
