//! Action handlers.
//!
//! Each action type registers a handler. The orchestrator runs the
//! resolved handler twice: first with `side_effects = false` as a
//! validation pass that must not write, then for real. Domain handlers
//! validate their own fields, call the participant synchronizer and persist
//! through the [`Writer`](crate::write::Writer), which also syncs stages.

use crate::document::{Action, Document, Participant, Role, Scope};
use crate::error::{FolioError, Result};
use crate::orchestrator::Engine;
use crate::participants::handle_participants;
use crate::scope::RequestScope;
use crate::store::Query;
use crate::types::ActionStatus;
use crate::write::put_action;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

pub struct HandlerContext<'a> {
    pub engine: &'a Engine,
    pub scope: &'a RequestScope,
    /// Posted by the trigger engine rather than a user.
    pub triggered: bool,
    /// The stored action before this post, if any.
    pub prev: Option<&'a Action>,
    /// `false` during the validation pass.
    pub side_effects: bool,
    pub skip_payments: bool,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Handled {
    pub action: Action,
    /// Other actions this handler wrote, whose triggers must also fire.
    pub affected: Vec<Action>,
}

impl Handled {
    pub fn only(action: Action) -> Self {
        Self {
            action,
            affected: Vec::new(),
        }
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, ctx: &HandlerContext<'_>, action: Action) -> Result<Handled>;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    fallback: Option<Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The workflow operations plus [`StandardHandler`] as fallback.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        for op in TargetOp::all() {
            reg.register(op.action_type(), Arc::new(TargetOpHandler { op: *op }));
        }
        reg.register(crate::store::INVITE_ACTION, Arc::new(StandardHandler));
        reg.set_fallback(Arc::new(StandardHandler));
        reg
    }

    pub fn register(&mut self, action_type: impl Into<String>, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action_type.into(), handler);
    }

    pub fn set_fallback(&mut self, handler: Arc<dyn ActionHandler>) {
        self.fallback = Some(handler);
    }

    pub fn has(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    /// Handler for `action_type`. `strict` ignores the fallback; with no
    /// match the lookup fails closed.
    pub fn resolve(&self, action_type: &str, strict: bool) -> Result<Arc<dyn ActionHandler>> {
        if let Some(h) = self.handlers.get(action_type) {
            return Ok(Arc::clone(h));
        }
        match &self.fallback {
            Some(h) if !strict => Ok(Arc::clone(h)),
            _ => Err(FolioError::UnsupportedActionType(action_type.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// StandardHandler
// ---------------------------------------------------------------------------

async fn owning_scope(ctx: &HandlerContext<'_>, action: &Action) -> Result<Option<Scope>> {
    let Some(id) = action.is_part_of.as_deref() else {
        return Ok(None);
    };
    Ok(ctx
        .scope
        .fetch_one(ctx.engine.store(), id)
        .await?
        .and_then(|d| d.as_scope().cloned()))
}

/// Participants, then a single-document write.
pub struct StandardHandler;

#[async_trait]
impl ActionHandler for StandardHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>, action: Action) -> Result<Handled> {
        let scope_doc = owning_scope(ctx, &action).await?;
        let (action, _) = handle_participants(action, scope_doc.as_ref(), ctx.now);
        if !ctx.side_effects {
            return Ok(Handled::only(action));
        }
        let written = put_action(ctx.engine.writer(), ctx.scope, action).await?;
        Ok(Handled::only(written))
    }
}

// ---------------------------------------------------------------------------
// Workflow operations on another action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOp {
    Assign,
    Unassign,
    Cancel,
    Endorse,
    Reschedule,
}

impl TargetOp {
    pub fn all() -> &'static [TargetOp] {
        &[
            TargetOp::Assign,
            TargetOp::Unassign,
            TargetOp::Cancel,
            TargetOp::Endorse,
            TargetOp::Reschedule,
        ]
    }

    pub fn action_type(self) -> &'static str {
        match self {
            TargetOp::Assign => "AssignAction",
            TargetOp::Unassign => "UnassignAction",
            TargetOp::Cancel => "CancelAction",
            TargetOp::Endorse => "EndorseAction",
            TargetOp::Reschedule => "ScheduleAction",
        }
    }

    pub fn from_action_type(s: &str) -> Option<TargetOp> {
        TargetOp::all().iter().copied().find(|op| op.action_type() == s)
    }
}

/// Writes the operation (as Completed) and its target in one bulk write.
pub struct TargetOpHandler {
    pub op: TargetOp,
}

fn assignee(action: &Action) -> Option<&Role> {
    action
        .recipient
        .iter()
        .chain(&action.participant)
        .find_map(|p| match p {
            Participant::Role(r) => Some(r),
            _ => None,
        })
}

impl TargetOpHandler {
    /// Refuse a second live instance of the same template held by the same user.
    async fn check_polyton(
        &self,
        ctx: &HandlerContext<'_>,
        target: &Action,
        role: &Role,
    ) -> Result<()> {
        let (Some(stage), Some(template), Some(user)) = (
            target.result_of.as_deref(),
            target.instance_of.as_deref(),
            role.user_id.as_deref(),
        ) else {
            return Ok(());
        };
        let siblings = ctx
            .scope
            .query_with_repair(ctx.engine.store(), &Query::ByResultOf(stage.to_string()))
            .await?;
        let taken = siblings.iter().filter_map(Document::as_action).any(|a| {
            a.id != target.id
                && a.instance_of.as_deref() == Some(template)
                && !matches!(
                    a.action_status,
                    ActionStatus::Canceled | ActionStatus::Failed
                )
                && a.agent
                    .as_ref()
                    .is_some_and(|r| r.user_id.as_deref() == Some(user))
        });
        if taken {
            return Err(FolioError::Validation(format!(
                "{user} is already assigned to another instance of {template}"
            )));
        }
        Ok(())
    }

    fn apply(&self, op: &Action, target: &mut Action, now: DateTime<Utc>) -> Result<()> {
        match self.op {
            TargetOp::Assign => {
                let role = assignee(op).ok_or_else(|| {
                    FolioError::Validation(format!("{} needs a recipient role", op.id))
                })?;
                target.agent = Some(role.clone());
            }
            TargetOp::Unassign => target.agent = None,
            TargetOp::Cancel => target.action_status = ActionStatus::Canceled,
            TargetOp::Endorse => {
                if target.action_status.rank() >= ActionStatus::Endorsed.rank() {
                    return Err(FolioError::Validation(format!(
                        "{} is already {}",
                        target.id, target.action_status
                    )));
                }
                target.action_status = ActionStatus::Endorsed;
            }
            TargetOp::Reschedule => {
                let when = op.scheduled_time.ok_or_else(|| {
                    FolioError::Validation(format!("{} needs a scheduledTime", op.id))
                })?;
                target.scheduled_time = Some(when);
            }
        }
        target.stamp_times(now);
        Ok(())
    }
}

#[async_trait]
impl ActionHandler for TargetOpHandler {
    async fn handle(&self, ctx: &HandlerContext<'_>, mut action: Action) -> Result<Handled> {
        let target_id = action.object.clone().ok_or_else(|| {
            FolioError::Validation(format!("{} requires an object", action.action_type))
        })?;
        let mut target = ctx
            .scope
            .fetch_one(ctx.engine.store(), &target_id)
            .await?
            .ok_or_else(|| FolioError::NotFound(target_id.clone()))?
            .into_action()
            .ok_or_else(|| FolioError::Validation(format!("{target_id} is not an action")))?;
        if target.action_status.is_terminal() {
            return Err(FolioError::Validation(format!(
                "{target_id} is already {}",
                target.action_status
            )));
        }
        if self.op == TargetOp::Assign {
            if let Some(role) = assignee(&action) {
                self.check_polyton(ctx, &target, role).await?;
            }
        }
        self.apply(&action, &mut target, ctx.now)?;

        action.action_status = ActionStatus::Completed;
        action.stamp_times(ctx.now);
        if !ctx.side_effects {
            return Ok(Handled {
                action,
                affected: vec![target],
            });
        }

        let written = ctx
            .engine
            .writer()
            .put(ctx.scope, vec![action.into(), target.into()])
            .await?;
        let mut actions = written.into_iter().filter_map(Document::into_action);
        let action = actions
            .next()
            .ok_or_else(|| FolioError::Db("bulk write returned no document".to_string()))?;
        Ok(Handled {
            action,
            affected: actions.collect(),
        })
    }
}
