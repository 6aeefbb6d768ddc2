//! Orchestrator: the single mutation entry point.
//!
//! `Engine::post` runs one pipeline per request:
//!
//! 1. validate the action and resolve its handler
//! 2. load the stored revision and enforce mutability rules (user posts only)
//! 3. access check when an acting user is given
//! 4. creation lease for new documents, then the workflow slot lock
//! 5. handler validation pass (`side_effects = false`), then the real pass
//! 6. trigger engine over the action and everything the handler touched
//! 7. release locks (failures are logged), dispatch worker actions
//! 8. shape the result (hydration, webify)
//!
//! Triggered actions re-enter step 1 with the same [`RequestScope`], so
//! they see every write of the pass, and with the slot keys their parent
//! holds, so they do not wait on it.
//!
//! Re-posting a terminal action unchanged replays its triggers. That is how
//! a caller recovers after `TriggeredAction`: the source is already stored,
//! and candidates that failed still carry their declarations.

use crate::access::{is_public, resolve_access, AccessRequest};
use crate::config::{Config, StoreBackend};
use crate::dispatch::{self, Broker, MemoryBroker};
use crate::document::{new_id, Action, Document, Participant, Role};
use crate::error::{FolioError, Result};
use crate::handler::{HandlerContext, HandlerRegistry};
use crate::lock::{create_lock, release_quietly, IsLocked, LockOptions, LockService, MemoryLockService};
use crate::participants::reconcile_scope;
use crate::paths::validate_id;
use crate::scope::RequestScope;
use crate::store::{DocumentStore, MemoryStore, Query, RedbStore};
use crate::triggers;
use crate::types::ActionStatus;
use crate::unique::{MemoryUniqueIndex, UniqueIndex};
use crate::workflow_lock;
use crate::write::{RetryPolicy, Writer};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostMode {
    /// The action with embedded potential actions re-hydrated.
    #[default]
    Node,
    /// The action exactly as stored.
    Document,
}

#[derive(Debug, Clone, Default)]
pub struct PostOptions {
    /// Acting user; when set the access check must allow the post.
    pub acl: Option<String>,
    /// Posted by the trigger engine; skips user-edit rules and the ACL.
    pub triggered: bool,
    /// Share a request scope with the caller instead of starting fresh.
    pub store: Option<Arc<RequestScope>>,
    /// Refuse types without a dedicated handler.
    pub strict: bool,
    /// Rewrite ids in the result as absolute URLs.
    pub webify: bool,
    /// Wait for worker completion.
    pub rpc: bool,
    pub skip_payments: bool,
    pub mode: PostMode,
    pub add_triggered_action_to_result: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostResult {
    pub action: Action,
    /// Actions fired by triggers during this pass, in firing order.
    pub triggered: Vec<Action>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    store: Arc<dyn DocumentStore>,
    locks: Arc<dyn LockService>,
    unique: Arc<dyn UniqueIndex>,
    broker: Option<Arc<dyn Broker>>,
    handlers: HandlerRegistry,
    writer: Writer,
    lock_opts: LockOptions,
    config: Config,
}

pub struct EngineBuilder {
    config: Config,
    store: Option<Arc<dyn DocumentStore>>,
    locks: Option<Arc<dyn LockService>>,
    unique: Option<Arc<dyn UniqueIndex>>,
    broker: Option<Arc<dyn Broker>>,
    handlers: HandlerRegistry,
}

impl EngineBuilder {
    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn locks(mut self, locks: Arc<dyn LockService>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn unique(mut self, unique: Arc<dyn UniqueIndex>) -> Self {
        self.unique = Some(unique);
        self
    }

    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn handler(
        mut self,
        action_type: impl Into<String>,
        handler: Arc<dyn crate::handler::ActionHandler>,
    ) -> Self {
        self.handlers.register(action_type, handler);
        self
    }

    pub fn build(self) -> Engine {
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let unique = self
            .unique
            .unwrap_or_else(|| Arc::new(MemoryUniqueIndex::new()));
        let writer = Writer::new(
            Arc::clone(&store),
            Arc::clone(&unique),
            RetryPolicy::from_config(&self.config.retry),
            self.config.stage_sync.max_depth,
        );
        Engine {
            store,
            locks: self
                .locks
                .unwrap_or_else(|| Arc::new(MemoryLockService::new())),
            unique,
            broker: self.broker,
            handlers: self.handlers,
            writer,
            lock_opts: LockOptions::from_config(&self.config.lock),
            config: self.config,
        }
    }
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder {
            config,
            store: None,
            locks: None,
            unique: None,
            broker: None,
            handlers: HandlerRegistry::with_builtins(),
        }
    }

    /// Everything in memory, with an in-process broker.
    pub fn in_memory(config: Config) -> Self {
        Self::builder(config)
            .broker(Arc::new(MemoryBroker::default()))
            .build()
    }

    /// Engine over the backend named in `config`.
    pub fn open(root: &Path, config: Config) -> Result<Self> {
        match config.store.backend {
            StoreBackend::Memory => Ok(Self::in_memory(config)),
            StoreBackend::Redb => {
                let db = RedbStore::open(&config.store.resolve_path(root))?;
                let db = Arc::new(db);
                Ok(Self::builder(config)
                    .store(db.clone())
                    .locks(db.clone())
                    .unique(db)
                    .broker(Arc::new(MemoryBroker::default()))
                    .build())
            }
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn writer(&self) -> &Writer {
        &self.writer
    }

    pub fn broker(&self) -> Option<&dyn Broker> {
        self.broker.as_deref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // -----------------------------------------------------------------------
    // post
    // -----------------------------------------------------------------------

    pub async fn post(&self, action: Action, opts: PostOptions) -> Result<PostResult> {
        let scope = opts.store.clone().unwrap_or_default();
        let result = self
            .post_in_scope(action, opts.clone(), Arc::clone(&scope))
            .await?;
        self.shape(result, &opts, &scope)
    }

    /// One pipeline pass inside an existing request scope. The scope only
    /// shares cached documents; workflow slots are acquired afresh.
    pub fn post_in_scope<'a>(
        &'a self,
        action: Action,
        opts: PostOptions,
        scope: Arc<RequestScope>,
    ) -> BoxFuture<'a, Result<PostResult>> {
        self.post_nested(action, opts, scope, Vec::new())
    }

    /// Pass started from inside another pass that holds `held`. Boxed so
    /// the trigger engine can recurse through it.
    pub(crate) fn post_nested<'a>(
        &'a self,
        action: Action,
        opts: PostOptions,
        scope: Arc<RequestScope>,
        held: Vec<String>,
    ) -> BoxFuture<'a, Result<PostResult>> {
        Box::pin(async move { self.run_post(action, &opts, &scope, &held).await })
    }

    /// Re-run the triggers of a stored action, typically after a post
    /// failed with `TriggeredAction`. Candidates that already fired are
    /// terminal or have lost their declaration, so nothing fires twice.
    pub async fn retry_triggers(&self, id: &str, opts: PostOptions) -> Result<PostResult> {
        let action = self
            .get(id)
            .await?
            .into_action()
            .ok_or_else(|| FolioError::Validation(format!("{id} is not an action")))?;
        if !action.action_status.is_terminal() {
            return Err(FolioError::Validation(format!(
                "{id} is {} and has no settled triggers to retry",
                action.action_status
            )));
        }
        self.post(action, opts).await
    }

    async fn run_post(
        &self,
        mut action: Action,
        opts: &PostOptions,
        scope: &Arc<RequestScope>,
        held: &[String],
    ) -> Result<PostResult> {
        validate_id(&action.id)?;
        if action.action_type.trim().is_empty() {
            return Err(FolioError::Validation(format!(
                "{} has no @type",
                action.id
            )));
        }
        let handler = self.handlers.resolve(&action.action_type, opts.strict)?;
        let now = Utc::now();

        let prev = match scope.fetch_one(self.store(), &action.id).await? {
            Some(doc) => Some(doc.into_action().ok_or_else(|| {
                FolioError::Validation(format!("{} is not an action", action.id))
            })?),
            None => None,
        };
        let replay = !opts.triggered && prev.as_ref().is_some_and(|p| is_replay(p, &action));
        match &prev {
            Some(prev) if !opts.triggered && !replay => check_mutation(prev, &mut action)?,
            Some(_) => {}
            None => action.rev = None,
        }

        if let (Some(user), false) = (opts.acl.as_deref(), opts.triggered) {
            self.authorize(user, &action, prev.as_ref(), scope, now).await?;
        }
        if let (true, Some(stored)) = (replay, prev.as_ref()) {
            return self.replay_triggers(stored.clone(), opts, scope, held).await;
        }

        // creation lease: a concurrent creator of the same id loses cleanly
        let creation = if prev.is_none() {
            let unique = Arc::clone(&self.unique);
            let id = action.id.clone();
            let guard: IsLocked<'_> = Some(Box::pin(async move { unique.contains(&id).await }));
            Some(
                create_lock(
                    Arc::clone(&self.locks),
                    &format!("create:{}", action.id),
                    &self.lock_opts,
                    guard,
                )
                .await?,
            )
        } else {
            None
        };

        let slot = match workflow_lock::acquire(
            Arc::clone(&self.locks),
            self.store(),
            scope,
            &action,
            &self.lock_opts,
            held,
        )
        .await
        {
            Ok(slot) => slot,
            Err(e) => {
                if let Some(lease) = creation {
                    release_quietly(lease).await;
                }
                return Err(e);
            }
        };

        let prev_status = prev.as_ref().map(|p| p.action_status);
        let mut pass_held = held.to_vec();
        pass_held.extend(slot.keys().iter().cloned());
        let outcome = self
            .locked_pass(handler, action, prev.as_ref(), opts, scope, now, &pass_held)
            .await;

        slot.release().await;
        if let Some(lease) = creation {
            release_quietly(lease).await;
        }
        // the action is stored even when some of its triggers failed
        let (mut action, fired) = outcome?;

        let newly_active = action.action_status == ActionStatus::Active
            && prev_status != Some(ActionStatus::Active);
        if action.worker && newly_active && self.broker.is_some() {
            let rpc = opts.rpc && !opts.triggered && fired.is_ok();
            if let Some(done) = dispatch::dispatch(self, &action, rpc).await? {
                action = done;
            }
        }
        Ok(PostResult {
            action,
            triggered: fired?,
        })
    }

    /// Triggers of an unchanged terminal action, under its slot lock.
    async fn replay_triggers(
        &self,
        action: Action,
        opts: &PostOptions,
        scope: &Arc<RequestScope>,
        held: &[String],
    ) -> Result<PostResult> {
        let slot = workflow_lock::acquire(
            Arc::clone(&self.locks),
            self.store(),
            scope,
            &action,
            &self.lock_opts,
            held,
        )
        .await?;
        tracing::info!(
            action_id = %action.id,
            status = %action.action_status,
            "replaying triggers"
        );
        let mut pass_held = held.to_vec();
        pass_held.extend(slot.keys().iter().cloned());
        let fired = triggers::fire(self, scope, std::slice::from_ref(&action), opts, &pass_held).await;
        slot.release().await;
        Ok(PostResult {
            action,
            triggered: fired?,
        })
    }

    /// Handler passes and the first trigger pass, run under the slot lock.
    /// An error from the handlers is returned as is; trigger failures come
    /// back next to the written action.
    #[allow(clippy::too_many_arguments)]
    async fn locked_pass(
        &self,
        handler: Arc<dyn crate::handler::ActionHandler>,
        mut action: Action,
        prev: Option<&Action>,
        opts: &PostOptions,
        scope: &Arc<RequestScope>,
        now: DateTime<Utc>,
        held: &[String],
    ) -> Result<(Action, Result<Vec<Action>>)> {
        action.stamp_times(now);
        let ctx = HandlerContext {
            engine: self,
            scope: scope.as_ref(),
            triggered: opts.triggered,
            prev,
            side_effects: false,
            skip_payments: opts.skip_payments,
            now,
        };
        handler.handle(&ctx, action.clone()).await?;
        let ctx = HandlerContext {
            side_effects: true,
            ..ctx
        };
        let handled = handler.handle(&ctx, action).await?;
        tracing::info!(
            action_id = %handled.action.id,
            action_type = %handled.action.action_type,
            status = %handled.action.action_status,
            triggered = opts.triggered,
            "action posted"
        );

        let mut sources = vec![handled.action.clone()];
        sources.extend(handled.affected.iter().cloned());
        if let Some(broker) = &self.broker {
            for a in sources.iter().filter(|a| a.worker && a.action_status.is_terminal()) {
                if let Err(e) = broker.publish_completion(a).await {
                    tracing::warn!(action_id = %a.id, error = %e, "completion publish failed");
                }
            }
        }

        let fired = triggers::fire(self, scope, &sources, opts, held).await;
        Ok((handled.action, fired))
    }

    async fn authorize(
        &self,
        user: &str,
        action: &Action,
        prev: Option<&Action>,
        scope: &RequestScope,
        now: DateTime<Utc>,
    ) -> Result<()> {
        // a new action cannot vouch for itself through the roles it names
        let subject = match prev {
            Some(p) => p.clone(),
            None => {
                let mut a = action.clone();
                a.agent = None;
                a.recipient.clear();
                a.participant.clear();
                a
            }
        };
        let docs = [Document::from(subject.clone())];
        let ctx = resolve_access(self.store(), scope, Some(user), &docs, now).await?;
        if ctx.check(AccessRequest::Act(&subject)) {
            Ok(())
        } else {
            Err(FolioError::Forbidden(format!("{user} may not act on {}", action.id)))
        }
    }

    fn shape(&self, mut result: PostResult, opts: &PostOptions, scope: &RequestScope) -> Result<PostResult> {
        if opts.mode == PostMode::Node {
            hydrate(&mut result.action, scope)?;
            if opts.add_triggered_action_to_result && !result.triggered.is_empty() {
                let extra = result
                    .triggered
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                result.action.result = Some(match result.action.result.take() {
                    None => Value::Array(extra),
                    Some(Value::Array(mut v)) => {
                        v.extend(extra);
                        Value::Array(v)
                    }
                    Some(other) => {
                        let mut v = vec![other];
                        v.extend(extra);
                        Value::Array(v)
                    }
                });
            }
        }
        if opts.webify {
            let base = self.config.server.base_url.trim_end_matches('/');
            webify(&mut result.action, base);
            for a in result.triggered.iter_mut() {
                webify(a, base);
            }
        }
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Assignment helpers
    // -----------------------------------------------------------------------

    /// Assign `role` as agent of `action_id` through an `AssignAction`.
    pub async fn assign(&self, action_id: &str, role: Role, opts: PostOptions) -> Result<PostResult> {
        let mut op = Action::new(new_id("action"), "AssignAction").with_status(ActionStatus::Active);
        op.object = Some(action_id.to_string());
        op.recipient.push(Participant::Role(role));
        self.post(op, opts).await
    }

    pub async fn unassign(&self, action_id: &str, opts: PostOptions) -> Result<PostResult> {
        let mut op = Action::new(new_id("action"), "UnassignAction").with_status(ActionStatus::Active);
        op.object = Some(action_id.to_string());
        self.post(op, opts).await
    }

    // -----------------------------------------------------------------------
    // Non-action documents and reads
    // -----------------------------------------------------------------------

    /// Upsert a scope, stage or user. Saving a scope reconciles the
    /// participants of its live actions against the new roster.
    ///
    /// With `acl`, the acting user must be an admin or hold a role in the
    /// stored document or a scope above it; only admins grant admin.
    pub async fn save(&self, doc: Document, acl: Option<&str>) -> Result<Document> {
        if doc.as_action().is_some() {
            return Err(FolioError::Validation(
                "actions go through post".to_string(),
            ));
        }
        validate_id(doc.id())?;
        let scope = RequestScope::new();
        if let Some(user) = acl {
            self.authorize_edit(user, &doc, &scope).await?;
        }
        let written = self
            .writer
            .put(&scope, vec![doc])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FolioError::Db("bulk write returned no document".to_string()))?;

        if let Some(s) = written.as_scope() {
            let actions: Vec<Action> = scope
                .query_with_repair(self.store(), &Query::PartOf(s.id.clone()))
                .await?
                .into_iter()
                .filter_map(Document::into_action)
                .collect();
            let changed = reconcile_scope(actions, s, Utc::now());
            if !changed.is_empty() {
                tracing::debug!(scope_id = %s.id, actions = changed.len(), "participants reconciled");
                self.writer
                    .put(&scope, changed.into_iter().map(Document::from).collect())
                    .await?;
            }
        }
        Ok(written)
    }

    async fn authorize_edit(&self, user: &str, doc: &Document, scope: &RequestScope) -> Result<()> {
        let stored = scope.fetch_one(self.store(), doc.id()).await?;
        let existing = stored.is_some();
        let mut docs = Vec::with_capacity(2);
        docs.extend(stored);
        docs.push(doc.clone());
        let ctx = resolve_access(self.store(), scope, Some(user), &docs, Utc::now()).await?;

        // the stored roster decides, and a move must land somewhere the user sits too
        let allowed = docs
            .iter()
            .all(|d| ctx.check(AccessRequest::Edit { doc: d, existing }));
        let grants_admin = matches!(doc, Document::User(u) if u.admin);
        if allowed && (ctx.is_admin || !grants_admin) {
            Ok(())
        } else {
            Err(FolioError::Forbidden(format!("{user} may not edit {}", doc.id())))
        }
    }

    /// Latest stored revision. A miss on an id the uniqueness index knows
    /// is reported as not yet visible.
    pub async fn get(&self, id: &str) -> Result<Document> {
        if let Some(doc) = self.store.get_many(&[id.to_string()]).await?.into_iter().next() {
            return Ok(doc);
        }
        if self.unique.contains(id).await? {
            return Err(FolioError::NotFound(format!("{id} (not yet visible)")));
        }
        Err(FolioError::NotFound(id.to_string()))
    }

    /// Read path: public documents skip the access check entirely. An
    /// action counts as public only with its potential actions resolved.
    pub async fn read(&self, id: &str, user: Option<&str>) -> Result<Document> {
        let doc = self.get(id).await?;
        let now = Utc::now();
        let scope = RequestScope::new();
        let judged = match doc.as_action() {
            Some(a) if !a.potential_action.is_empty() => {
                let refs: Vec<String> = a
                    .potential_action
                    .iter()
                    .filter_map(|p| p.as_str().map(str::to_string))
                    .collect();
                scope.fetch(self.store(), &refs).await?;
                let mut a = a.clone();
                hydrate(&mut a, &scope)?;
                Document::from(a)
            }
            _ => doc.clone(),
        };
        if is_public(std::slice::from_ref(&judged), now) {
            return Ok(doc);
        }
        let Some(user) = user else {
            return Err(FolioError::Forbidden(format!("{id} is not public")));
        };
        let ctx = resolve_access(self.store(), &scope, Some(user), std::slice::from_ref(&doc), now)
            .await?;
        if ctx.check(AccessRequest::View(&doc)) {
            Ok(doc)
        } else {
            Err(FolioError::Forbidden(format!("{user} may not view {id}")))
        }
    }

    /// Delete a document at `rev`, removing an action's stage embedding.
    /// With `acl`, the acting user must be allowed to act on the action or
    /// edit the document.
    pub async fn delete(&self, id: &str, rev: Option<u64>, acl: Option<&str>) -> Result<Document> {
        let scope = RequestScope::new();
        let doc = self.get(id).await?;
        if let Some(user) = acl {
            let docs = std::slice::from_ref(&doc);
            let ctx = resolve_access(self.store(), &scope, Some(user), docs, Utc::now()).await?;
            let allowed = match doc.as_action() {
                Some(a) => ctx.check(AccessRequest::Act(a)),
                None => ctx.check(AccessRequest::Edit {
                    doc: &doc,
                    existing: true,
                }),
            };
            if !allowed {
                return Err(FolioError::Forbidden(format!("{user} may not delete {id}")));
            }
        }
        let slot = match doc.as_action() {
            Some(a) => Some(
                workflow_lock::acquire(
                    Arc::clone(&self.locks),
                    self.store(),
                    &scope,
                    a,
                    &self.lock_opts,
                    &[],
                )
                .await?,
            ),
            None => None,
        };
        let outcome = self.writer.delete(&scope, id, rev).await;
        if let Some(slot) = slot {
            slot.release().await;
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Admission rules
// ---------------------------------------------------------------------------

fn write_once<T: PartialEq + Copy>(
    next: &mut Option<T>,
    prev: Option<T>,
    field: &str,
    id: &str,
) -> Result<()> {
    match (prev, *next) {
        (Some(p), Some(n)) if p != n => Err(FolioError::Validation(format!(
            "{field} of {id} is write-once"
        ))),
        (Some(p), None) => {
            *next = Some(p);
            Ok(())
        }
        _ => Ok(()),
    }
}

/// A re-post of a terminal action that changes nothing the caller owns.
/// Fields the engine stamps are taken from the stored copy when omitted.
fn is_replay(prev: &Action, next: &Action) -> bool {
    if !prev.action_status.is_terminal() || next.rev.is_some_and(|r| prev.rev != Some(r)) {
        return false;
    }
    let mut n = next.clone();
    n.rev = prev.rev;
    n.start_time = n.start_time.or(prev.start_time);
    n.staged_time = n.staged_time.or(prev.staged_time);
    n.pending_endorsement_time = n.pending_endorsement_time.or(prev.pending_endorsement_time);
    n.endorsed_time = n.endorsed_time.or(prev.endorsed_time);
    n.end_time = n.end_time.or(prev.end_time);
    if n.agent.is_none() {
        n.agent = prev.agent.clone();
    }
    if n.participant.is_empty() {
        n.participant = prev.participant.clone();
    }
    if n.triggered_by.is_none() {
        n.triggered_by = prev.triggered_by.clone();
    }
    if n.error.is_none() {
        n.error = prev.error.clone();
    }
    n == *prev
}

/// Rules for a user edit of a stored action. Fields the engine owns are
/// carried over when the caller omits them.
fn check_mutation(prev: &Action, next: &mut Action) -> Result<()> {
    let id = prev.id.as_str();
    if prev.action_type != next.action_type {
        return Err(FolioError::Validation(format!(
            "@type of {id} is immutable ({} -> {})",
            prev.action_type, next.action_type
        )));
    }
    if prev.action_status.is_terminal() {
        return Err(FolioError::Validation(format!(
            "{id} is {} and can no longer change",
            prev.action_status
        )));
    }
    if let Some(rev) = next.rev {
        if prev.rev != Some(rev) {
            return Err(FolioError::Conflict {
                id: id.to_string(),
                expected: Some(rev),
                found: prev.rev,
            });
        }
    }
    next.rev = prev.rev;

    write_once(&mut next.start_time, prev.start_time, "startTime", id)?;
    write_once(&mut next.end_time, prev.end_time, "endTime", id)?;
    write_once(
        &mut next.pending_endorsement_time,
        prev.pending_endorsement_time,
        "pendingEndorsementTime",
        id,
    )?;
    if next.staged_time.is_none() {
        next.staged_time = prev.staged_time;
    }
    if next.endorsed_time.is_none() {
        next.endorsed_time = prev.endorsed_time;
    }

    if next.agent.is_none() {
        next.agent = prev.agent.clone();
    } else if prev.agent.is_some() && prev.agent != next.agent {
        return Err(FolioError::Validation(format!(
            "agent of {id} changes only through AssignAction or UnassignAction"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Result shaping
// ---------------------------------------------------------------------------

/// Replace embedded potential-action references with the versions known to
/// this pass.
fn hydrate(action: &mut Action, scope: &RequestScope) -> Result<()> {
    for entry in action.potential_action.iter_mut() {
        let id = match entry {
            Value::String(s) => Some(s.clone()),
            Value::Object(m) => m.get("@id").and_then(Value::as_str).map(str::to_string),
            _ => None,
        };
        if let Some(latest) = id.and_then(|id| scope.get_action(&id)) {
            *entry = serde_json::to_value(&latest)?;
        }
    }
    Ok(())
}

fn webify(action: &mut Action, base: &str) {
    let url = |id: &str| {
        if id.starts_with("http://") || id.starts_with("https://") {
            id.to_string()
        } else {
            format!("{base}/{id}")
        }
    };
    action.id = url(&action.id);
    for field in [
        &mut action.object,
        &mut action.is_part_of,
        &mut action.result_of,
        &mut action.instance_of,
        &mut action.instrument,
    ] {
        if let Some(v) = field.as_mut() {
            *v = url(v);
        }
    }
    for p in action.purpose.iter_mut() {
        *p = url(p);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
