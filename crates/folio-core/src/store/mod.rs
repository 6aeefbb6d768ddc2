//! Document store port.
//!
//! The backing store is only eventually consistent for [`DocumentStore::find`]:
//! index lookups may lag behind writes, so callers go through
//! [`crate::scope::RequestScope::query_with_repair`] rather than trusting
//! a `find` result set verbatim. `get_many` and `bulk_write` are
//! strongly consistent per document.

pub mod memory;
pub mod redb;

use crate::document::Document;
use crate::error::Result;
use crate::triggers::{registration_keys, TriggerKey};
use crate::types::ActionStatus;
use async_trait::async_trait;

pub use self::memory::MemoryStore;
pub use self::redb::RedbStore;

/// Per-document result of a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    /// Stored; carries the document with its new revision.
    Written(Document),
    /// The supplied revision did not match the stored one.
    Conflict { id: String, current: Option<u64> },
}

/// Eventually-consistent lookups the engine needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Actions whose trigger declarations resolve to any of these keys.
    TriggeredBy(Vec<TriggerKey>),
    /// Actions blocked on the given action.
    RequiresCompletionOf(String),
    /// Actions belonging to a stage.
    ByResultOf(String),
    /// Actions owned by a scope.
    PartOf(String),
    /// Active invitations addressed to a user, by id or by email.
    InvitesFor {
        user_id: Option<String>,
        email: Option<String>,
    },
}

pub const INVITE_ACTION: &str = "InviteAction";

impl Query {
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(action) = doc.as_action() else {
            return false;
        };
        match self {
            Query::TriggeredBy(keys) => registration_keys(action)
                .iter()
                .any(|(_, key)| keys.contains(key)),
            Query::RequiresCompletionOf(id) => action.requires_completion_of.contains(id),
            Query::ByResultOf(stage) => action.result_of.as_deref() == Some(stage.as_str()),
            Query::PartOf(scope) => action.is_part_of.as_deref() == Some(scope.as_str()),
            Query::InvitesFor { user_id, email } => {
                action.action_type == INVITE_ACTION
                    && action.action_status == ActionStatus::Active
                    && action.recipient.iter().any(|p| match p {
                        crate::document::Participant::Role(r) => {
                            let by_id = user_id.is_some() && r.user_id == *user_id;
                            let by_email = match (email, &r.email) {
                                (Some(want), Some(have)) => want.eq_ignore_ascii_case(have),
                                _ => false,
                            };
                            by_id || by_email
                        }
                        _ => false,
                    })
            }
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Latest revision of each requested document; missing ids are skipped.
    async fn get_many(&self, ids: &[String]) -> Result<Vec<Document>>;

    /// Write every document in one call. Documents whose revision is stale
    /// are reported as conflicts; the rest of the batch is still written.
    async fn bulk_write(&self, docs: Vec<Document>) -> Result<Vec<WriteOutcome>>;

    /// Index lookup. May return stale or incomplete results.
    async fn find(&self, query: &Query) -> Result<Vec<Document>>;

    /// Remove a document at the given revision.
    async fn delete(&self, id: &str, rev: Option<u64>) -> Result<WriteOutcome>;
}

/// Revision check shared by backends: `None` for inserts, exact match otherwise.
pub(crate) fn check_revision(current: Option<&Document>, supplied: Option<u64>) -> bool {
    current.and_then(Document::rev) == supplied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Action, Participant, Role};
    use crate::types::TriggerType;

    fn invite(email: &str) -> Document {
        let mut a = Action::new("invite:1", INVITE_ACTION).with_status(ActionStatus::Active);
        let mut r = Role::new("role:x", "reviewer");
        r.email = Some(email.into());
        a.recipient.push(Participant::Role(r));
        Document::Action(a)
    }

    #[test]
    fn invites_match_email_case_insensitively() {
        let q = Query::InvitesFor {
            user_id: None,
            email: Some("ann@example.org".into()),
        };
        assert!(q.matches(&invite("Ann@Example.org")));
        assert!(!q.matches(&invite("bob@example.org")));
    }

    #[test]
    fn triggered_by_resolves_object() {
        let mut b = Action::new("b", "ReviewAction");
        b.object = Some("a".into());
        b.complete_on = Some(TriggerType::OnObjectCompletedActionStatus);
        let q = Query::TriggeredBy(vec![TriggerKey::new(
            "a",
            TriggerType::OnObjectCompletedActionStatus,
        )]);
        assert!(q.matches(&Document::Action(b)));
    }

    #[test]
    fn revision_check() {
        let mut a = Action::new("a", "ReviewAction");
        a.rev = Some(3);
        let doc = Document::Action(a);
        assert!(check_revision(Some(&doc), Some(3)));
        assert!(!check_revision(Some(&doc), None));
        assert!(check_revision(None, None));
        assert!(!check_revision(None, Some(1)));
    }
}
