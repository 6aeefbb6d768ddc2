//! Participant synchronizer.
//!
//! Derives an action's per-role visibility grants from the audiences it
//! names and the owning scope's roster. Grants are never deleted, only
//! ended, so the history of who could see an action stays auditable.

use crate::document::{new_id, Action, AudienceRole, Participant, Role, RoleGrant, Scope};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Reconcile `action`'s participant grants against `scope` at `now`.
///
/// Returns the action and whether anything changed. Applying it again to
/// its own output with the same inputs reports no change.
pub fn handle_participants(
    mut action: Action,
    scope: Option<&Scope>,
    now: DateTime<Utc>,
) -> (Action, bool) {
    let mut changed = false;

    // bare audiences become identified audience roles
    for p in action.participant.iter_mut() {
        if let Participant::Audience(audience) = p {
            *p = Participant::AudienceRole(AudienceRole {
                id: new_id("audience"),
                audience: audience.clone(),
                start_date: None,
                end_date: None,
            });
            changed = true;
        }
    }

    let Some(scope) = scope else {
        return (action, changed);
    };

    let roster: Vec<&Role> = scope.roles().filter(|r| r.is_active_at(now)).collect();
    let active: BTreeSet<String> = action
        .participant
        .iter()
        .chain(&action.recipient)
        .filter_map(|p| p.active_audience(now))
        .map(str::to_string)
        .collect();

    // expire grants whose audience or backing role is gone
    for p in action.participant.iter_mut() {
        if let Participant::RoleGrant(grant) = p {
            if !grant.is_active_at(now) {
                continue;
            }
            let audience_open = active.contains(&grant.role_name);
            let role_valid = roster.iter().any(|r| r.id == grant.role_id);
            if !audience_open || !role_valid {
                grant.end_date = Some(now);
                changed = true;
            }
        }
    }

    // materialize a grant for every current holder of an open audience
    let mut additions = Vec::new();
    for role in roster.iter().filter(|r| active.contains(&r.role_name)) {
        let granted = action.participant.iter().any(|p| {
            matches!(p, Participant::RoleGrant(g) if g.role_id == role.id && g.is_active_at(now))
        });
        if !granted {
            additions.push(Participant::RoleGrant(RoleGrant {
                id: new_id("grant"),
                role_id: role.id.clone(),
                role_name: role.role_name.clone(),
                user_id: role.user_id.clone(),
                start_date: Some(now),
                end_date: None,
            }));
        }
    }
    if !additions.is_empty() {
        action.participant.extend(additions);
        changed = true;
    }

    (action, changed)
}

/// Re-run the synchronizer over every action of a scope after its roster
/// changed, returning only the actions that need a write.
pub fn reconcile_scope(
    actions: Vec<Action>,
    scope: &Scope,
    now: DateTime<Utc>,
) -> Vec<Action> {
    actions
        .into_iter()
        .filter(|a| !a.action_status.is_terminal())
        .filter_map(|a| match handle_participants(a, Some(scope), now) {
            (a, true) => Some(a),
            (_, false) => None,
        })
        .collect()
}
