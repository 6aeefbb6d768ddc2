//! Access check.
//!
//! [`resolve_access`] gathers everything needed to decide visibility for a
//! user: the user document (admin flag, email), standing invitations, and
//! the scopes reachable from the candidate documents by following their
//! reference properties. The resulting [`AccessContext`] answers
//! [`AccessContext::check`] without further I/O.

use crate::document::{Action, Document, Participant};
use crate::error::Result;
use crate::scope::RequestScope;
use crate::store::{DocumentStore, Query};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Audience type that makes an action visible to everyone.
pub const PUBLIC_AUDIENCE: &str = "public";

const MAX_WALK_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy)]
pub enum AccessRequest<'a> {
    View(&'a Document),
    Act(&'a Action),
    /// Create or replace a scope, stage or user. A stored document may be
    /// edited by members of its own roster; a new one only through the
    /// scopes above it.
    Edit { doc: &'a Document, existing: bool },
}

#[derive(Debug, Clone)]
pub struct AccessContext {
    pub user_id: Option<String>,
    pub is_admin: bool,
    now: DateTime<Utc>,
    docs: HashMap<String, Document>,
    invites: Vec<Action>,
}

impl AccessContext {
    pub fn anonymous(now: DateTime<Utc>) -> Self {
        Self {
            user_id: None,
            is_admin: false,
            now,
            docs: HashMap::new(),
            invites: Vec::new(),
        }
    }

    pub fn check(&self, req: AccessRequest<'_>) -> bool {
        if self.is_admin {
            return true;
        }
        match req {
            AccessRequest::View(doc) => {
                if is_public(std::slice::from_ref(doc), self.now) {
                    return true;
                }
                let Some(user) = self.user_id.as_deref() else {
                    return false;
                };
                match doc {
                    Document::User(u) => u.id == user,
                    Document::Action(a) => self.may_touch(user, a),
                    other => self.is_member(user, other.id()) || self.governing_member(user, other),
                }
            }
            AccessRequest::Act(action) => match self.user_id.as_deref() {
                Some(user) => self.may_touch(user, action),
                None => false,
            },
            AccessRequest::Edit { doc, existing } => {
                let Some(user) = self.user_id.as_deref() else {
                    return false;
                };
                match doc {
                    Document::User(u) => u.id == user,
                    Document::Action(a) => self.may_touch(user, a),
                    other => {
                        (existing && self.is_member(user, other.id()))
                            || self
                                .governing_scopes(other)
                                .iter()
                                .any(|id| id != other.id() && self.is_member(user, id))
                    }
                }
            }
        }
    }

    fn may_touch(&self, user: &str, action: &Action) -> bool {
        let is_agent = action
            .agent
            .as_ref()
            .is_some_and(|r| r.user_id.as_deref() == Some(user));
        let is_recipient = action.recipient.iter().any(|p| {
            matches!(p, Participant::Role(r) if r.user_id.as_deref() == Some(user))
        });
        let has_grant = action.participant.iter().any(|p| {
            matches!(p, Participant::RoleGrant(g)
                if g.user_id.as_deref() == Some(user) && g.is_active_at(self.now))
        });
        let invited = self.invites.iter().any(|inv| {
            inv.id == action.id
                || inv.purpose.contains(&action.id)
                || action.object.as_ref().is_some_and(|o| inv.purpose.contains(o))
        });
        is_agent || is_recipient || has_grant || invited || self.governing_member(user, &action.clone().into())
    }

    /// Holds an active role in the scope with this id.
    fn is_member(&self, user: &str, scope_id: &str) -> bool {
        self.docs
            .get(scope_id)
            .and_then(Document::as_scope)
            .is_some_and(|s| {
                s.roles()
                    .any(|r| r.user_id.as_deref() == Some(user) && r.is_active_at(self.now))
            })
    }

    /// Holds an active role in any scope governing `doc`.
    fn governing_member(&self, user: &str, doc: &Document) -> bool {
        self.governing_scopes(doc)
            .iter()
            .any(|id| self.is_member(user, id))
    }

    fn governing_scopes(&self, doc: &Document) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut frontier: Vec<String> = parents(doc);
        for _ in 0..MAX_WALK_DEPTH {
            let mut next = Vec::new();
            for id in frontier.drain(..) {
                if !seen.insert(id.clone()) {
                    continue;
                }
                if let Some(d) = self.docs.get(&id) {
                    next.extend(parents(d));
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        seen.retain(|id| self.docs.get(id).and_then(Document::as_scope).is_some());
        seen
    }
}

/// Reference properties followed when looking for governing scopes.
fn parents(doc: &Document) -> Vec<String> {
    match doc {
        Document::Action(a) => a.references().into_iter().map(str::to_string).collect(),
        Document::Stage(s) => s.is_part_of.iter().cloned().collect(),
        Document::Scope(s) => s.is_part_of.iter().cloned().collect(),
        Document::User(_) => Vec::new(),
    }
}

/// `true` when every document is publicly visible: a public scope, an action
/// open to the public audience whose potential actions are public too, or a
/// stage whose embedded actions all are.
pub fn is_public(docs: &[Document], now: DateTime<Utc>) -> bool {
    !docs.is_empty()
        && docs.iter().all(|d| match d {
            Document::Scope(s) => s.is_public,
            Document::Action(a) => action_is_public(a, now),
            Document::Stage(s) => {
                let embedded: Vec<_> = s
                    .result
                    .iter()
                    .chain(&s.potential_action)
                    .filter_map(|n| match n {
                        crate::document::EmbeddedNode::Action(p) => Some(p),
                        _ => None,
                    })
                    .collect();
                !embedded.is_empty()
                    && embedded.iter().all(|p| {
                        p.participant
                            .iter()
                            .chain(&p.recipient)
                            .any(|x| x.active_audience(now) == Some(PUBLIC_AUDIENCE))
                    })
            }
            Document::User(_) => false,
        })
}

fn action_is_public(a: &Action, now: DateTime<Utc>) -> bool {
    a.participant
        .iter()
        .chain(&a.recipient)
        .any(|p| p.active_audience(now) == Some(PUBLIC_AUDIENCE))
        && a.potential_action
            .iter()
            .all(|p| potential_is_public(p, now))
}

/// Only inline potential actions can be judged here; a bare id reference
/// counts as private until the caller has resolved it.
fn potential_is_public(entry: &Value, now: DateTime<Utc>) -> bool {
    match entry {
        Value::Object(_) => serde_json::from_value::<Action>(entry.clone())
            .is_ok_and(|p| action_is_public(&p, now)),
        _ => false,
    }
}

/// Gather the user's grants and the scope graph around `docs`.
pub async fn resolve_access(
    store: &dyn DocumentStore,
    scope: &RequestScope,
    user_id: Option<&str>,
    docs: &[Document],
    now: DateTime<Utc>,
) -> Result<AccessContext> {
    let mut ctx = AccessContext::anonymous(now);
    let Some(user_id) = user_id else {
        return Ok(ctx);
    };
    ctx.user_id = Some(user_id.to_string());

    let user = scope.fetch_one(store, user_id).await?;
    let email = match &user {
        Some(Document::User(u)) => {
            ctx.is_admin = u.admin;
            u.email.clone()
        }
        _ => None,
    };
    if ctx.is_admin {
        return Ok(ctx);
    }

    ctx.invites = scope
        .query_with_repair(
            store,
            &Query::InvitesFor {
                user_id: Some(user_id.to_string()),
                email,
            },
        )
        .await?
        .into_iter()
        .filter_map(Document::into_action)
        .collect();

    // walk reference properties out to the governing scopes
    let mut frontier: Vec<String> = docs.iter().flat_map(parents).collect();
    frontier.extend(ctx.invites.iter().flat_map(|i| parents(&i.clone().into())));
    for _ in 0..MAX_WALK_DEPTH {
        frontier.retain(|id| !ctx.docs.contains_key(id));
        frontier.sort();
        frontier.dedup();
        if frontier.is_empty() {
            break;
        }
        let fetched = scope.fetch(store, &frontier).await?;
        frontier = fetched.iter().flat_map(parents).collect();
        for d in fetched {
            ctx.docs.insert(d.id().to_string(), d);
        }
    }
    for d in docs {
        ctx.docs.entry(d.id().to_string()).or_insert_with(|| d.clone());
    }
    Ok(ctx)
}
