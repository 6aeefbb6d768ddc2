//! Workflow action lock.
//!
//! Serializes every operation on one logical workflow slot. A slot is the
//! pair (stage, template): `{resultOf}:{instanceOf}`. Keying on the template
//! rather than the instance is what serializes concurrent operations on
//! repeated instances of the same template.
//!
//! All keys an action needs are acquired together or not at all. Keys the
//! enclosing pass already holds are passed in as `held` and not requested
//! again, so triggered posts do not deadlock on their parent. Only the pass
//! that took a lease hands it down; two posts sharing a request scope still
//! exclude each other.

use crate::document::{Action, Document};
use crate::error::{FolioError, Result};
use crate::handler::TargetOp;
use crate::lock::{create_lock, release_quietly, Lease, LockOptions, LockService};
use crate::scope::RequestScope;
use crate::store::{DocumentStore, INVITE_ACTION};
use std::sync::Arc;

/// Slot key of a workflow action, if it belongs to a stage.
pub fn slot_key(action: &Action) -> Option<String> {
    let stage = action.result_of.as_deref()?;
    let template = action.instance_of.as_deref().unwrap_or(&action.id);
    Some(format!("{stage}:{template}"))
}

/// Every slot key `action` must hold, deduplicated and sorted.
pub async fn lock_keys(
    store: &dyn DocumentStore,
    scope: &RequestScope,
    action: &Action,
) -> Result<Vec<String>> {
    let targets: Vec<String> = if TargetOp::from_action_type(&action.action_type).is_some() {
        action.object.iter().cloned().collect()
    } else if action.action_type == INVITE_ACTION {
        action.purpose.clone()
    } else {
        Vec::new()
    };

    let mut keys: Vec<String> = if targets.is_empty() {
        slot_key(action).into_iter().collect()
    } else {
        scope
            .fetch(store, &targets)
            .await?
            .iter()
            .filter_map(Document::as_action)
            .filter_map(slot_key)
            .collect()
    };
    keys.sort();
    keys.dedup();
    Ok(keys)
}

/// Leases held for one orchestration pass.
#[derive(Debug, Default)]
pub struct WorkflowLock {
    leases: Vec<Lease>,
    keys: Vec<String>,
}

impl WorkflowLock {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Release every lease. Failures are logged; the TTL covers them.
    pub async fn release(self) {
        for lease in self.leases {
            release_quietly(lease).await;
        }
    }
}

/// Acquire the slot keys for `action`, all or nothing. On partial failure
/// the acquired leases are released and the error names every key that
/// could not be taken.
pub async fn acquire(
    service: Arc<dyn LockService>,
    store: &dyn DocumentStore,
    scope: &RequestScope,
    action: &Action,
    opts: &LockOptions,
    held: &[String],
) -> Result<WorkflowLock> {
    let wanted: Vec<String> = lock_keys(store, scope, action)
        .await?
        .into_iter()
        .filter(|k| !held.contains(k))
        .collect();

    let mut lock = WorkflowLock::default();
    let mut refused = Vec::new();
    for key in &wanted {
        match create_lock(Arc::clone(&service), key, opts, None).await {
            Ok(lease) => lock.leases.push(lease),
            Err(FolioError::LockUnavailable { keys }) => refused.extend(keys),
            Err(e) => {
                lock.release().await;
                return Err(e);
            }
        }
    }
    if !refused.is_empty() {
        tracing::debug!(action_id = %action.id, keys = ?refused, "workflow slot busy");
        lock.release().await;
        return Err(FolioError::LockUnavailable { keys: refused });
    }

    lock.keys = wanted;
    Ok(lock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::MemoryLockService;
    use crate::store::MemoryStore;
    use crate::types::ActionStatus;
    use std::time::Duration;

    fn opts() -> LockOptions {
        LockOptions {
            ttl: Duration::from_secs(60),
            prefix: "lock".into(),
        }
    }

    fn polyton(id: &str) -> Action {
        Action::new(id, "ReviewAction")
            .with_status(ActionStatus::Active)
            .in_stage("graph:1", "stage:1", "tpl:review")
    }

    #[tokio::test]
    async fn instances_of_one_template_share_a_key() {
        let store = MemoryStore::new();
        let scope = RequestScope::new();
        let a = lock_keys(&store, &scope, &polyton("r1")).await.unwrap();
        let b = lock_keys(&store, &scope, &polyton("r2")).await.unwrap();
        assert_eq!(a, vec!["stage:1:tpl:review".to_string()]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn operations_lock_their_target_slot() {
        let store = MemoryStore::new();
        store.bulk_write(vec![polyton("r1").into()]).await.unwrap();
        let scope = RequestScope::new();

        let mut assign = Action::new("assign:1", "AssignAction");
        assign.object = Some("r1".into());
        assert_eq!(
            lock_keys(&store, &scope, &assign).await.unwrap(),
            vec!["stage:1:tpl:review".to_string()]
        );

        let mut invite = Action::new("invite:1", INVITE_ACTION);
        invite.purpose = vec!["r1".into(), "missing".into()];
        assert_eq!(lock_keys(&store, &scope, &invite).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_acquire_is_exclusive() {
        let svc: Arc<dyn LockService> = Arc::new(MemoryLockService::new());
        let store = MemoryStore::new();
        let s1 = RequestScope::new();
        let s2 = RequestScope::new();

        let held = acquire(svc.clone(), &store, &s1, &polyton("r1"), &opts(), &[])
            .await
            .unwrap();
        let err = acquire(svc.clone(), &store, &s2, &polyton("r2"), &opts(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, FolioError::LockUnavailable { ref keys } if keys.len() == 1));

        held.release().await;
        acquire(svc, &store, &s2, &polyton("r2"), &opts(), &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn keys_held_by_the_enclosing_pass_are_not_requested() {
        let svc: Arc<dyn LockService> = Arc::new(MemoryLockService::new());
        let store = MemoryStore::new();
        let scope = RequestScope::new();
        let outer = acquire(svc.clone(), &store, &scope, &polyton("r1"), &opts(), &[])
            .await
            .unwrap();
        let inner = acquire(svc, &store, &scope, &polyton("r1"), &opts(), outer.keys())
            .await
            .unwrap();
        assert!(inner.keys().is_empty());
    }

    #[tokio::test]
    async fn sharing_a_scope_does_not_share_the_slot() {
        let svc: Arc<dyn LockService> = Arc::new(MemoryLockService::new());
        let store = MemoryStore::new();
        let scope = RequestScope::new();
        let _first = acquire(svc.clone(), &store, &scope, &polyton("r1"), &opts(), &[])
            .await
            .unwrap();
        let err = acquire(svc, &store, &scope, &polyton("r2"), &opts(), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, FolioError::LockUnavailable { .. }));
    }

    #[tokio::test]
    async fn partial_failure_releases_everything() {
        let svc: Arc<dyn LockService> = Arc::new(MemoryLockService::new());
        let store = MemoryStore::new();
        let mut other = polyton("x1");
        other.instance_of = Some("tpl:other".into());
        store
            .bulk_write(vec![polyton("r1").into(), other.clone().into()])
            .await
            .unwrap();

        // someone else holds the second slot
        let blocker = RequestScope::new();
        let _held = acquire(svc.clone(), &store, &blocker, &other, &opts(), &[])
            .await
            .unwrap();

        let mut invite = Action::new("invite:1", INVITE_ACTION);
        invite.purpose = vec!["r1".into(), "x1".into()];
        let scope = RequestScope::new();
        let err = acquire(svc.clone(), &store, &scope, &invite, &opts(), &[])
            .await
            .unwrap_err();
        assert!(
            matches!(err, FolioError::LockUnavailable { ref keys } if keys == &["lock:stage:1:tpl:other"])
        );

        // the first slot was released again
        acquire(svc, &store, &RequestScope::new(), &polyton("r1"), &opts(), &[])
            .await
            .unwrap();
    }
}
