//! Document model: the shapes the engine reads from and writes to the store.
//!
//! Every stored record is a [`Document`], tagged by `kind`. Field names follow
//! the JSON-LD conventions of the publishing platform (`@id`, `@type`,
//! camelCase properties) so payloads round-trip unchanged through the API.

use crate::types::{ActionStatus, TriggerSlot, TriggerType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `true` when `now` falls inside the half-open window `[start, end)`.
pub fn window_contains(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    start.map_or(true, |s| s <= now) && end.map_or(true, |e| e > now)
}

/// Fresh identifier with a readable prefix, e.g. `role:6f1c…`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}:{}", uuid::Uuid::new_v4().simple())
}

// ---------------------------------------------------------------------------
// Roles and audiences
// ---------------------------------------------------------------------------

/// A long-lived identity grant held in a scope (editor, reviewer, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    #[serde(rename = "@id")]
    pub id: String,
    pub role_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl Role {
    pub fn new(id: impl Into<String>, role_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role_name: role_name.into(),
            user_id: None,
            email: None,
            start_date: None,
            end_date: None,
        }
    }

    pub fn held_by(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        window_contains(self.start_date, self.end_date, now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Audience {
    pub audience_type: String,
}

/// An identified, time-bounded audience grant on an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudienceRole {
    #[serde(rename = "@id")]
    pub id: String,
    pub audience: Audience,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

/// A per-action visibility snapshot derived from one scope role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleGrant {
    #[serde(rename = "@id")]
    pub id: String,
    /// The scope role this grant was materialized from.
    pub role_id: String,
    pub role_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
}

impl RoleGrant {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        window_contains(self.start_date, self.end_date, now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum Participant {
    Audience(Audience),
    AudienceRole(AudienceRole),
    RoleGrant(RoleGrant),
    Role(Role),
}

impl Participant {
    /// The audience type this entry opens visibility to, if it is active at `now`.
    pub fn active_audience(&self, now: DateTime<Utc>) -> Option<&str> {
        match self {
            Participant::Audience(a) => Some(a.audience_type.as_str()),
            Participant::AudienceRole(r) if window_contains(r.start_date, r.end_date, now) => {
                Some(r.audience.audience_type.as_str())
            }
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerAudit {
    pub triggering_id: String,
    pub trigger_type: TriggerType,
    pub slot: TriggerSlot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionError {
    pub kind: String,
    pub message: String,
}

/// The unit of work: one document with a lifecycle status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub action_type: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<u64>,
    #[serde(default)]
    pub action_status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participant: Vec<Participant>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipient: Vec<Participant>,
    /// Owning scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_part_of: Option<String>,
    /// Owning workflow stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_of: Option<String>,
    /// Template this action instantiates (shared by polyton instances).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_of: Option<String>,
    /// Workflow actions an invitation is issued for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub purpose: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_endorsement_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endorsed_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activate_on: Option<TriggerType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endorse_on: Option<TriggerType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_on: Option<TriggerType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_completion_of: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<TriggerAudit>,
    /// Executed by the worker pool rather than in-process.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub worker: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub potential_action: Vec<serde_json::Value>,
}

impl Action {
    pub fn new(id: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action_type: action_type.into(),
            rev: None,
            action_status: ActionStatus::Potential,
            agent: None,
            object: None,
            result: None,
            instrument: None,
            participant: Vec::new(),
            recipient: Vec::new(),
            is_part_of: None,
            result_of: None,
            instance_of: None,
            purpose: Vec::new(),
            start_time: None,
            staged_time: None,
            pending_endorsement_time: None,
            endorsed_time: None,
            end_time: None,
            scheduled_time: None,
            activate_on: None,
            endorse_on: None,
            complete_on: None,
            requires_completion_of: Vec::new(),
            triggered_by: None,
            worker: false,
            error: None,
            potential_action: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: ActionStatus) -> Self {
        self.action_status = status;
        self
    }

    /// Place the action in a workflow slot: stage, template and owning scope.
    pub fn in_stage(
        mut self,
        scope_id: impl Into<String>,
        stage_id: impl Into<String>,
        template_id: impl Into<String>,
    ) -> Self {
        self.is_part_of = Some(scope_id.into());
        self.result_of = Some(stage_id.into());
        self.instance_of = Some(template_id.into());
        self
    }

    pub fn declaration(&self, slot: TriggerSlot) -> Option<TriggerType> {
        match slot {
            TriggerSlot::ActivateOn => self.activate_on,
            TriggerSlot::EndorseOn => self.endorse_on,
            TriggerSlot::CompleteOn => self.complete_on,
        }
    }

    pub fn clear_declaration(&mut self, slot: TriggerSlot) {
        match slot {
            TriggerSlot::ActivateOn => self.activate_on = None,
            TriggerSlot::EndorseOn => self.endorse_on = None,
            TriggerSlot::CompleteOn => self.complete_on = None,
        }
    }

    /// Declared `(slot, trigger type)` pairs, in slot order.
    pub fn declarations(&self) -> Vec<(TriggerSlot, TriggerType)> {
        [
            TriggerSlot::ActivateOn,
            TriggerSlot::EndorseOn,
            TriggerSlot::CompleteOn,
        ]
        .into_iter()
        .filter_map(|slot| self.declaration(slot).map(|t| (slot, t)))
        .collect()
    }

    /// Fill the lifecycle timestamps the current status implies. Existing
    /// values are never overwritten.
    pub fn stamp_times(&mut self, now: DateTime<Utc>) {
        let status = self.action_status;
        if status.rank() >= ActionStatus::Active.rank() && status != ActionStatus::Canceled {
            self.start_time.get_or_insert(now);
        }
        match status {
            ActionStatus::Staged => {
                self.staged_time.get_or_insert(now);
            }
            ActionStatus::Endorsed => {
                self.endorsed_time.get_or_insert(now);
            }
            s if s.is_terminal() => {
                self.end_time.get_or_insert(now);
            }
            _ => {}
        }
    }

    /// Ids of the documents this action points at.
    pub fn references(&self) -> Vec<&str> {
        let mut refs: Vec<&str> = [
            self.is_part_of.as_deref(),
            self.result_of.as_deref(),
            self.object.as_deref(),
            self.instrument.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect();
        refs.extend(self.purpose.iter().map(String::as_str));
        refs
    }
}

// ---------------------------------------------------------------------------
// Stage embeddings
// ---------------------------------------------------------------------------

/// The denormalized copy of an action embedded in its stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionProjection {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@type")]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_of: Option<String>,
    #[serde(default)]
    pub action_status: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<Role>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participant: Vec<Participant>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipient: Vec<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endorsed_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result: Vec<EmbeddedNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub potential_action: Vec<EmbeddedNode>,
}

impl ActionProjection {
    pub fn from_action(action: &Action) -> Self {
        let mut p = Self {
            id: action.id.clone(),
            action_type: action.action_type.clone(),
            instance_of: action.instance_of.clone(),
            action_status: ActionStatus::Potential,
            agent: None,
            participant: Vec::new(),
            recipient: Vec::new(),
            start_time: None,
            staged_time: None,
            endorsed_time: None,
            end_time: None,
            scheduled_time: None,
            result: Vec::new(),
            potential_action: Vec::new(),
        };
        p.project(action);
        p
    }

    /// Overwrite the projected fields from the authoritative action.
    /// Absent source fields clear the projection. Returns whether anything changed.
    pub fn project(&mut self, action: &Action) -> bool {
        let before = self.clone();
        self.action_status = action.action_status;
        self.agent = action.agent.clone();
        self.participant = action.participant.clone();
        self.recipient = action.recipient.clone();
        self.start_time = action.start_time;
        self.staged_time = action.staged_time;
        self.endorsed_time = action.endorsed_time;
        self.end_time = action.end_time;
        self.scheduled_time = action.scheduled_time;
        *self != before
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offers: Vec<EmbeddedNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub potential_action: Vec<EmbeddedNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum EmbeddedNode {
    Action(ActionProjection),
    Service(Service),
    Offer(Offer),
}

impl EmbeddedNode {
    pub fn id(&self) -> &str {
        match self {
            EmbeddedNode::Action(a) => &a.id,
            EmbeddedNode::Service(s) => &s.id,
            EmbeddedNode::Offer(o) => &o.id,
        }
    }

    pub fn children(&self) -> Vec<&Vec<EmbeddedNode>> {
        match self {
            EmbeddedNode::Action(a) => vec![&a.result, &a.potential_action],
            EmbeddedNode::Service(s) => vec![&s.offers],
            EmbeddedNode::Offer(o) => vec![&o.potential_action],
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Vec<EmbeddedNode>> {
        match self {
            EmbeddedNode::Action(a) => vec![&mut a.result, &mut a.potential_action],
            EmbeddedNode::Service(s) => vec![&mut s.offers],
            EmbeddedNode::Offer(o) => vec![&mut o.potential_action],
        }
    }
}

/// A workflow phase holding embedded projections of its actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_part_of: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result: Vec<EmbeddedNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub potential_action: Vec<EmbeddedNode>,
}

impl Stage {
    pub fn new(id: impl Into<String>, scope_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            name: None,
            is_part_of: Some(scope_id.into()),
            result: Vec::new(),
            potential_action: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scope and users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    #[default]
    Graph,
    Periodical,
    Organization,
}

/// Aggregate root owning a family of actions and a membership roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<u64>,
    #[serde(default)]
    pub scope_type: ScopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_part_of: Option<String>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub author: Vec<Role>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub editor: Vec<Role>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reviewer: Vec<Role>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub producer: Vec<Role>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contributor: Vec<Role>,
}

impl Scope {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            scope_type: ScopeKind::Graph,
            name: None,
            is_part_of: None,
            is_public: false,
            author: Vec::new(),
            editor: Vec::new(),
            reviewer: Vec::new(),
            producer: Vec::new(),
            contributor: Vec::new(),
        }
    }

    /// Every role held in the scope, across all role-bearing properties.
    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.author
            .iter()
            .chain(&self.editor)
            .chain(&self.reviewer)
            .chain(&self.producer)
            .chain(&self.contributor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub admin: bool,
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Document {
    Action(Action),
    Stage(Stage),
    Scope(Scope),
    User(User),
}

impl Document {
    pub fn id(&self) -> &str {
        match self {
            Document::Action(a) => &a.id,
            Document::Stage(s) => &s.id,
            Document::Scope(s) => &s.id,
            Document::User(u) => &u.id,
        }
    }

    pub fn rev(&self) -> Option<u64> {
        match self {
            Document::Action(a) => a.rev,
            Document::Stage(s) => s.rev,
            Document::Scope(s) => s.rev,
            Document::User(u) => u.rev,
        }
    }

    pub fn set_rev(&mut self, rev: Option<u64>) {
        match self {
            Document::Action(a) => a.rev = rev,
            Document::Stage(s) => s.rev = rev,
            Document::Scope(s) => s.rev = rev,
            Document::User(u) => u.rev = rev,
        }
    }

    pub fn as_action(&self) -> Option<&Action> {
        match self {
            Document::Action(a) => Some(a),
            _ => None,
        }
    }

    pub fn into_action(self) -> Option<Action> {
        match self {
            Document::Action(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_stage(&self) -> Option<&Stage> {
        match self {
            Document::Stage(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_scope(&self) -> Option<&Scope> {
        match self {
            Document::Scope(s) => Some(s),
            _ => None,
        }
    }

    /// Keys recorded in the uniqueness index when this document is written.
    pub fn unique_keys(&self) -> Vec<String> {
        let mut keys = vec![self.id().to_string()];
        if let Document::User(User {
            email: Some(email), ..
        }) = self
        {
            keys.push(format!("email:{}", email.to_lowercase()));
        }
        keys
    }
}

impl From<Action> for Document {
    fn from(a: Action) -> Self {
        Document::Action(a)
    }
}

impl From<Stage> for Document {
    fn from(s: Stage) -> Self {
        Document::Stage(s)
    }
}

impl From<Scope> for Document {
    fn from(s: Scope) -> Self {
        Document::Scope(s)
    }
}

impl From<User> for Document {
    fn from(u: User) -> Self {
        Document::User(u)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
