//! Request-scoped reconciling cache.
//!
//! Every document written or read during one orchestration pass is merged
//! here. Index lookups against the store may lag behind writes, so
//! [`RequestScope::query_with_repair`] merges the (possibly stale) index
//! result and then re-evaluates the query over everything the scope knows.
//! That gives read-your-writes inside a pass without trusting the index.

use crate::document::{Action, Document};
use crate::error::Result;
use crate::store::{DocumentStore, Query};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    docs: BTreeMap<String, Document>,
    deleted: HashSet<String>,
}

#[derive(Default)]
pub struct RequestScope {
    state: Mutex<State>,
}

impl std::fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.lock();
        f.debug_struct("RequestScope")
            .field("docs", &st.docs.len())
            .field("deleted", &st.deleted.len())
            .finish()
    }
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Merge documents read from the store. A cached copy with a higher
    /// revision wins, and ids deleted in this pass stay deleted.
    pub fn merge(&self, docs: impl IntoIterator<Item = Document>) {
        let mut st = self.lock();
        for doc in docs {
            if st.deleted.contains(doc.id()) {
                continue;
            }
            let newer = match st.docs.get(doc.id()) {
                Some(cached) => doc.rev().unwrap_or(0) >= cached.rev().unwrap_or(0),
                None => true,
            };
            if newer {
                st.docs.insert(doc.id().to_string(), doc);
            }
        }
    }

    /// Record documents this pass has just written. Unlike `merge`, this
    /// also revives ids previously deleted in the same pass.
    pub fn record_written(&self, docs: &[Document]) {
        let mut st = self.lock();
        for doc in docs {
            st.deleted.remove(doc.id());
            st.docs.insert(doc.id().to_string(), doc.clone());
        }
    }

    pub fn forget(&self, id: &str) {
        let mut st = self.lock();
        st.docs.remove(id);
        st.deleted.insert(id.to_string());
    }

    pub fn get(&self, id: &str) -> Option<Document> {
        self.lock().docs.get(id).cloned()
    }

    pub fn get_action(&self, id: &str) -> Option<Action> {
        self.get(id).and_then(Document::into_action)
    }

    /// `true` when every id is cached.
    pub fn has(&self, ids: &[String]) -> bool {
        let st = self.lock();
        ids.iter().all(|id| st.docs.contains_key(id))
    }

    pub fn len(&self) -> usize {
        self.lock().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached documents first, the store for the rest. Missing ids are skipped.
    pub async fn fetch(&self, store: &dyn DocumentStore, ids: &[String]) -> Result<Vec<Document>> {
        let missing: Vec<String> = {
            let st = self.lock();
            ids.iter()
                .filter(|id| !st.docs.contains_key(*id) && !st.deleted.contains(*id))
                .cloned()
                .collect()
        };
        if !missing.is_empty() {
            let fetched = store.get_many(&missing).await?;
            self.merge(fetched);
        }
        let st = self.lock();
        Ok(ids.iter().filter_map(|id| st.docs.get(id).cloned()).collect())
    }

    pub async fn fetch_one(&self, store: &dyn DocumentStore, id: &str) -> Result<Option<Document>> {
        Ok(self.fetch(store, &[id.to_string()]).await?.into_iter().next())
    }

    /// Bypass the cache: read the latest revisions and merge them.
    pub async fn refresh(&self, store: &dyn DocumentStore, ids: &[String]) -> Result<Vec<Document>> {
        let fetched = store.get_many(ids).await?;
        self.merge(fetched.clone());
        Ok(fetched)
    }

    /// Run an index query, merge its result, then re-evaluate the query
    /// against the full cache so writes the index has not seen are included
    /// and documents that no longer match are dropped.
    pub async fn query_with_repair(
        &self,
        store: &dyn DocumentStore,
        query: &Query,
    ) -> Result<Vec<Document>> {
        let indexed = store.find(query).await?;
        self.merge(indexed);
        let st = self.lock();
        Ok(st
            .docs
            .values()
            .filter(|d| query.matches(d))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::ActionStatus;

    fn in_stage(id: &str, stage: &str) -> Action {
        let mut a = Action::new(id, "ReviewAction").with_status(ActionStatus::Active);
        a.result_of = Some(stage.into());
        a
    }

    #[tokio::test]
    async fn query_with_repair_sees_unindexed_writes() {
        let store = MemoryStore::lagging();
        let scope = RequestScope::new();
        let written = store
            .bulk_write(vec![in_stage("a1", "stage:1").into()])
            .await
            .unwrap();
        let docs: Vec<Document> = written
            .into_iter()
            .filter_map(|o| match o {
                crate::store::WriteOutcome::Written(d) => Some(d),
                _ => None,
            })
            .collect();
        scope.record_written(&docs);

        let q = Query::ByResultOf("stage:1".into());
        assert!(store.find(&q).await.unwrap().is_empty());
        let found = scope.query_with_repair(&store, &q).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), "a1");
    }

    #[tokio::test]
    async fn stale_index_entries_are_refiltered() {
        let store = MemoryStore::lagging();
        store
            .bulk_write(vec![in_stage("a1", "stage:1").into()])
            .await
            .unwrap();
        store.converge();

        // moved to another stage; the index still lists it under stage:1
        let mut moved = in_stage("a1", "stage:2");
        moved.rev = Some(1);
        store.bulk_write(vec![moved.clone().into()]).await.unwrap();
        moved.rev = Some(2);

        let scope = RequestScope::new();
        scope.record_written(&[moved.into()]);
        let found = scope
            .query_with_repair(&store, &Query::ByResultOf("stage:1".into()))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn merge_keeps_the_higher_revision() {
        let scope = RequestScope::new();
        let mut newer = in_stage("a1", "s");
        newer.rev = Some(3);
        let mut older = in_stage("a1", "s");
        older.rev = Some(1);
        older.action_status = ActionStatus::Potential;

        scope.merge([Document::from(newer)]);
        scope.merge([Document::from(older)]);
        let cached = scope.get_action("a1").unwrap();
        assert_eq!(cached.rev, Some(3));
        assert_eq!(cached.action_status, ActionStatus::Active);
    }

    #[tokio::test]
    async fn fetch_prefers_cache_and_skips_deleted() {
        let store = MemoryStore::new();
        store
            .bulk_write(vec![in_stage("a1", "s").into(), in_stage("a2", "s").into()])
            .await
            .unwrap();
        let scope = RequestScope::new();
        scope.forget("a2");
        let docs = scope
            .fetch(&store, &["a1".into(), "a2".into()])
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert!(scope.has(&["a1".into()]));
    }
}
