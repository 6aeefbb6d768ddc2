//! Trigger engine.
//!
//! An action declares up to three triggers (`activateOn`, `endorseOn`,
//! `completeOn`). Each declaration resolves to a [`TriggerKey`]: the trigger
//! type plus the id of the document it watches (the action's `object`, its
//! `resultOf` stage, or the action itself). When an action changes status
//! it emits keys; every action registered against an emitted key is a
//! firing candidate.
//!
//! Escalation re-emits every lower key reached en route, so an action
//! posted straight to Completed fires the Active and Staged triggers too.

use crate::document::{Action, Document, TriggerAudit};
use crate::error::{FolioError, Result, TriggerFailure};
use crate::orchestrator::{Engine, PostOptions};
use crate::scope::RequestScope;
use crate::store::Query;
use crate::types::{ActionStatus, TriggerSlot, TriggerSubject, TriggerType};
use std::collections::BTreeMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerKey {
    pub subject_id: String,
    pub trigger_type: TriggerType,
}

impl TriggerKey {
    pub fn new(subject_id: impl Into<String>, trigger_type: TriggerType) -> Self {
        Self {
            subject_id: subject_id.into(),
            trigger_type,
        }
    }
}

impl std::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.trigger_type, self.subject_id)
    }
}

/// Keys an action is registered under, one per resolvable declaration.
pub fn registration_keys(action: &Action) -> Vec<(TriggerSlot, TriggerKey)> {
    action
        .declarations()
        .into_iter()
        .filter_map(|(slot, ttype)| {
            let subject = match ttype.subject() {
                TriggerSubject::Object => action.object.as_deref()?,
                TriggerSubject::Stage => action.result_of.as_deref()?,
                TriggerSubject::SelfId => action.id.as_str(),
            };
            Some((slot, TriggerKey::new(subject, ttype)))
        })
        .collect()
}

/// Keys emitted by an action in its current status, not counting the
/// stage-end key (which needs the rest of the stage).
pub fn status_keys(action: &Action) -> Vec<TriggerKey> {
    use TriggerType::*;
    let id = action.id.as_str();
    let mut types: Vec<TriggerType> = match action.action_status {
        ActionStatus::Potential | ActionStatus::Canceled => Vec::new(),
        ActionStatus::Active => vec![OnObjectActiveActionStatus],
        ActionStatus::Staged => vec![OnObjectActiveActionStatus, OnObjectStagedActionStatus],
        ActionStatus::Endorsed => vec![
            OnObjectActiveActionStatus,
            OnObjectStagedActionStatus,
            OnEndorsed,
        ],
        ActionStatus::Completed => vec![
            OnObjectActiveActionStatus,
            OnObjectStagedActionStatus,
            OnObjectCompletedActionStatus,
        ],
        ActionStatus::Failed => vec![OnObjectActiveActionStatus, OnObjectFailedActionStatus],
    };
    if action.action_status == ActionStatus::Completed && action.endorsed_time.is_some() {
        types.push(OnEndorsed);
    }
    if action.worker
        && matches!(
            action.action_status,
            ActionStatus::Completed | ActionStatus::Failed
        )
    {
        types.push(OnWorkerEnd);
    }
    types.into_iter().map(|t| TriggerKey::new(id, t)).collect()
}

/// Actions waiting on the stage end do not hold the stage open.
fn holds_stage_open(action: &Action) -> bool {
    !action.action_status.is_terminal()
        && !action
            .declarations()
            .iter()
            .any(|(_, t)| *t == TriggerType::OnWorkflowStageEnd)
}

async fn stage_has_ended(engine: &Engine, scope: &RequestScope, stage_id: &str) -> Result<bool> {
    let members = scope
        .query_with_repair(engine.store(), &Query::ByResultOf(stage_id.to_string()))
        .await?;
    Ok(!members.is_empty()
        && members
            .iter()
            .filter_map(Document::as_action)
            .all(|a| !holds_stage_open(a)))
}

/// Every key the action emits, including the stage-end key when this
/// action's terminal transition closes its stage.
pub async fn emitted_keys(
    engine: &Engine,
    scope: &RequestScope,
    action: &Action,
) -> Result<Vec<TriggerKey>> {
    let mut keys = status_keys(action);
    if action.action_status.is_terminal() {
        if let Some(stage) = action.result_of.as_deref() {
            if stage_has_ended(engine, scope, stage).await? {
                keys.push(TriggerKey::new(stage, TriggerType::OnWorkflowStageEnd));
            }
        }
    }
    Ok(keys)
}

/// Whether the watched document currently satisfies `key`. Used for
/// candidates reached through a blocking dependency rather than an emission.
async fn key_satisfied(engine: &Engine, scope: &RequestScope, key: &TriggerKey) -> Result<bool> {
    if key.trigger_type == TriggerType::OnWorkflowStageEnd {
        return stage_has_ended(engine, scope, &key.subject_id).await;
    }
    let Some(doc) = scope.fetch_one(engine.store(), &key.subject_id).await? else {
        return Ok(false);
    };
    Ok(doc
        .as_action()
        .is_some_and(|subject| status_keys(subject).contains(key)))
}

// ---------------------------------------------------------------------------
// Firing
// ---------------------------------------------------------------------------

fn firing_order(action_type: &str) -> u8 {
    match action_type {
        "AuthorizeAction" | "DeauthorizeAction" => 0,
        "InformAction" => 2,
        _ => 1,
    }
}

/// `requiresCompletionOf` gate: every blocking action must be Completed or Canceled.
async fn is_unblocked(engine: &Engine, scope: &RequestScope, candidate: &Action) -> Result<bool> {
    if candidate.requires_completion_of.is_empty() {
        return Ok(true);
    }
    let blockers = scope
        .fetch(engine.store(), &candidate.requires_completion_of)
        .await?;
    if blockers.len() < candidate.requires_completion_of.len() {
        return Ok(false);
    }
    Ok(blockers
        .iter()
        .all(|d| d.as_action().is_some_and(|a| a.action_status.is_resolved())))
}

/// Strip the satisfied declarations and move the candidate to the status of
/// the winning slot. Returns `None` when nothing is left to fire.
pub fn apply_firing(
    mut candidate: Action,
    matched: &[(TriggerSlot, TriggerKey)],
) -> Option<Action> {
    let (slot, key) = matched.iter().max_by_key(|(slot, _)| *slot)?;
    for (s, _) in matched {
        candidate.clear_declaration(*s);
    }
    let target = slot.target_status();
    if target.rank() > candidate.action_status.rank() {
        candidate.action_status = target;
    }
    candidate.triggered_by = Some(TriggerAudit {
        triggering_id: key.subject_id.clone(),
        trigger_type: key.trigger_type,
        slot: *slot,
    });
    Some(candidate)
}

/// Fire every action registered against what `sources` emit, plus any
/// action whose blocking dependencies were just resolved by them.
///
/// `held` are the workflow slot keys the calling pass holds; triggered
/// posts reuse them instead of acquiring them again.
///
/// Failures are collected per candidate. Returns the fired actions, or
/// `TriggeredAction` listing every failure once all candidates were tried.
pub async fn fire(
    engine: &Engine,
    scope: &Arc<RequestScope>,
    sources: &[Action],
    opts: &PostOptions,
    held: &[String],
) -> Result<Vec<Action>> {
    let mut emitted: Vec<TriggerKey> = Vec::new();
    for source in sources {
        for key in emitted_keys(engine, scope, source).await? {
            if !emitted.contains(&key) {
                emitted.push(key);
            }
        }
    }

    let mut candidates: BTreeMap<String, Action> = BTreeMap::new();
    if !emitted.is_empty() {
        let docs = scope
            .query_with_repair(engine.store(), &Query::TriggeredBy(emitted.clone()))
            .await?;
        candidates.extend(docs.into_iter().filter_map(Document::into_action).map(|a| (a.id.clone(), a)));
    }
    for source in sources.iter().filter(|s| s.action_status.is_resolved()) {
        let docs = scope
            .query_with_repair(
                engine.store(),
                &Query::RequiresCompletionOf(source.id.clone()),
            )
            .await?;
        candidates.extend(docs.into_iter().filter_map(Document::into_action).map(|a| (a.id.clone(), a)));
    }

    let mut ordered: Vec<Action> = candidates
        .into_values()
        .filter(|a| !a.action_status.is_terminal())
        .collect();
    ordered.sort_by_key(|a| firing_order(&a.action_type));

    let mut fired = Vec::new();
    let mut failures = Vec::new();
    for candidate in ordered {
        let id = candidate.id.clone();
        match fire_one(engine, scope, &id, &emitted, opts, held).await {
            Ok(Some(mut results)) => fired.append(&mut results),
            Ok(None) => {}
            Err(FolioError::TriggeredAction {
                failures: nested, ..
            }) => {
                // the candidate itself was written; only its downstream failed
                failures.extend(nested);
            }
            Err(e) => {
                tracing::warn!(action_id = %id, error = %e, "triggered action failed");
                failures.push(TriggerFailure {
                    action_id: id,
                    message: e.to_string(),
                });
            }
        }
    }

    if failures.is_empty() {
        Ok(fired)
    } else {
        Err(FolioError::TriggeredAction {
            action_id: sources
                .first()
                .map(|a| a.id.clone())
                .unwrap_or_default(),
            failures,
        })
    }
}

async fn fire_one(
    engine: &Engine,
    scope: &Arc<RequestScope>,
    id: &str,
    emitted: &[TriggerKey],
    opts: &PostOptions,
    held: &[String],
) -> Result<Option<Vec<Action>>> {
    // re-read: an earlier candidate in this pass may have changed it
    let Some(candidate) = scope
        .fetch_one(engine.store(), id)
        .await?
        .and_then(Document::into_action)
    else {
        return Ok(None);
    };
    if candidate.action_status.is_terminal() {
        return Ok(None);
    }

    let mut matched = Vec::new();
    for (slot, key) in registration_keys(&candidate) {
        if emitted.contains(&key) || key_satisfied(engine, scope, &key).await? {
            matched.push((slot, key));
        }
    }
    if matched.is_empty() {
        return Ok(None);
    }
    if !is_unblocked(engine, scope, &candidate).await? {
        tracing::debug!(action_id = %id, "trigger gated on requiresCompletionOf");
        return Ok(None);
    }
    let Some(next) = apply_firing(candidate, &matched) else {
        return Ok(None);
    };
    tracing::debug!(
        action_id = %id,
        status = %next.action_status,
        "firing triggered action"
    );

    let triggered_opts = PostOptions {
        triggered: true,
        acl: None,
        rpc: false,
        skip_payments: opts.skip_payments,
        ..PostOptions::default()
    };
    let result = engine
        .post_nested(next, triggered_opts, Arc::clone(scope), held.to_vec())
        .await?;
    let mut out = vec![result.action];
    out.extend(result.triggered);
    Ok(Some(out))
}
