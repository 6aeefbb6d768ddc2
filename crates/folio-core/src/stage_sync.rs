//! Stage synchronizer.
//!
//! A stage embeds projections of its actions (under `result` and
//! `potentialAction`, possibly nested inside services and offers). After an
//! action is written its projection is overwritten from the authoritative
//! copy; after a repeatable action is deleted its projection is removed.
//! A stage or projection that does not exist is left alone.

use crate::document::{Action, Document, EmbeddedNode};
use crate::error::{FolioError, Result};
use crate::scope::RequestScope;
use crate::write::Writer;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub enum SyncChange {
    Upsert(Action),
    Delete(Action),
}

impl SyncChange {
    fn action(&self) -> &Action {
        match self {
            SyncChange::Upsert(a) | SyncChange::Delete(a) => a,
        }
    }
}

// ---------------------------------------------------------------------------
// Visitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Called once per embedding array, outermost first.
pub trait NodeVisitor {
    fn visit(&mut self, nodes: &mut Vec<EmbeddedNode>) -> Flow;
}

/// Depth-first walk over nested embedding arrays. Arrays deeper than
/// `max_depth` are not visited.
pub fn walk(
    nodes: &mut Vec<EmbeddedNode>,
    visitor: &mut dyn NodeVisitor,
    depth: usize,
    max_depth: usize,
) -> Flow {
    if depth >= max_depth {
        return Flow::Continue;
    }
    if visitor.visit(nodes) == Flow::Stop {
        return Flow::Stop;
    }
    for node in nodes.iter_mut() {
        for children in node.children_mut() {
            if walk(children, visitor, depth + 1, max_depth) == Flow::Stop {
                return Flow::Stop;
            }
        }
    }
    Flow::Continue
}

struct Project<'a> {
    action: &'a Action,
    changed: bool,
}

impl NodeVisitor for Project<'_> {
    fn visit(&mut self, nodes: &mut Vec<EmbeddedNode>) -> Flow {
        for node in nodes.iter_mut() {
            if let EmbeddedNode::Action(p) = node {
                if p.id == self.action.id {
                    self.changed |= p.project(self.action);
                }
            }
        }
        Flow::Continue
    }
}

struct Remove<'a> {
    id: &'a str,
    removed: bool,
}

impl NodeVisitor for Remove<'_> {
    fn visit(&mut self, nodes: &mut Vec<EmbeddedNode>) -> Flow {
        let hit = nodes
            .iter()
            .position(|n| matches!(n, EmbeddedNode::Action(p) if p.id == self.id));
        match hit {
            Some(i) => {
                nodes.remove(i);
                self.removed = true;
                Flow::Stop
            }
            None => Flow::Continue,
        }
    }
}

/// Apply changes to a stage document in place. Returns whether it changed.
pub fn apply_to_stage(doc: &mut Document, changes: &[SyncChange], max_depth: usize) -> bool {
    let Document::Stage(stage) = doc else {
        return false;
    };
    let mut changed = false;
    for change in changes {
        match change {
            SyncChange::Upsert(action) => {
                let mut v = Project {
                    action,
                    changed: false,
                };
                for arr in [&mut stage.result, &mut stage.potential_action] {
                    walk(arr, &mut v, 0, max_depth);
                }
                changed |= v.changed;
            }
            SyncChange::Delete(action) => {
                let mut v = Remove {
                    id: &action.id,
                    removed: false,
                };
                for arr in [&mut stage.result, &mut stage.potential_action] {
                    if walk(arr, &mut v, 0, max_depth) == Flow::Stop {
                        break;
                    }
                }
                changed |= v.removed;
            }
        }
    }
    changed
}

/// Propagate action changes into their owning stages, one read-modify-write
/// per distinct stage.
pub async fn sync_workflow(
    writer: &Writer,
    scope: &RequestScope,
    changes: &[SyncChange],
) -> Result<Vec<Document>> {
    let mut by_stage: BTreeMap<&str, Vec<SyncChange>> = BTreeMap::new();
    for change in changes {
        if let Some(stage) = change.action().result_of.as_deref() {
            by_stage.entry(stage).or_default().push(change.clone());
        }
    }

    let mut updated = Vec::new();
    for (stage_id, stage_changes) in by_stage {
        let max_depth = writer.max_depth();
        let res = writer
            .update_raw(scope, stage_id, None, |doc| {
                Ok(apply_to_stage(doc, &stage_changes, max_depth))
            })
            .await;
        match res {
            Ok(doc) => updated.push(doc),
            Err(FolioError::NotFound(_)) => {
                tracing::debug!(stage_id, "stage not found, skipping sync");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{ActionProjection, Offer, Role, Service, Stage};
    use crate::store::{DocumentStore, MemoryStore};
    use crate::types::ActionStatus;
    use crate::unique::MemoryUniqueIndex;
    use crate::write::RetryPolicy;
    use chrono::Utc;
    use std::sync::Arc;

    fn stage_with(nodes: Vec<EmbeddedNode>) -> Document {
        let mut s = Stage::new("stage:1", "graph:1");
        s.result = nodes;
        Document::Stage(s)
    }

    fn review(id: &str) -> Action {
        Action::new(id, "ReviewAction")
            .with_status(ActionStatus::Active)
            .in_stage("graph:1", "stage:1", "tpl:review")
    }

    fn projections(doc: &Document) -> Vec<&ActionProjection> {
        fn collect<'a>(nodes: &'a [EmbeddedNode], out: &mut Vec<&'a ActionProjection>) {
            for n in nodes {
                if let EmbeddedNode::Action(p) = n {
                    out.push(p);
                }
                for c in n.children() {
                    collect(c, out);
                }
            }
        }
        let stage = doc.as_stage().unwrap();
        let mut out = Vec::new();
        collect(&stage.result, &mut out);
        collect(&stage.potential_action, &mut out);
        out
    }

    #[test]
    fn upsert_reaches_nested_offer() {
        let a = review("a1");
        let nested = EmbeddedNode::Service(Service {
            id: "svc:1".into(),
            offers: vec![EmbeddedNode::Offer(Offer {
                id: "offer:1".into(),
                potential_action: vec![EmbeddedNode::Action(ActionProjection::from_action(&a))],
            })],
        });
        let mut doc = stage_with(vec![nested]);

        let mut done = a.clone().with_status(ActionStatus::Completed);
        done.end_time = Some(Utc::now());
        done.agent = Some(Role::new("role:1", "reviewer"));
        assert!(apply_to_stage(&mut doc, &[SyncChange::Upsert(done.clone())], 8));

        let p = projections(&doc)[0];
        assert_eq!(p.action_status, ActionStatus::Completed);
        assert_eq!(p.end_time, done.end_time);
        assert_eq!(p.agent, done.agent);
    }

    #[test]
    fn depth_bound_stops_descent() {
        let a = review("a1");
        let nested = EmbeddedNode::Service(Service {
            id: "svc:1".into(),
            offers: vec![EmbeddedNode::Offer(Offer {
                id: "offer:1".into(),
                potential_action: vec![EmbeddedNode::Action(ActionProjection::from_action(&a))],
            })],
        });
        let mut doc = stage_with(vec![nested]);
        let done = a.with_status(ActionStatus::Completed);
        assert!(!apply_to_stage(&mut doc, &[SyncChange::Upsert(done)], 2));
    }

    #[test]
    fn missing_projection_is_not_invented() {
        let mut doc = stage_with(vec![]);
        assert!(!apply_to_stage(&mut doc, &[SyncChange::Upsert(review("a1"))], 8));
        assert!(projections(&doc).is_empty());
    }

    #[test]
    fn delete_removes_exactly_one_embedding() {
        let a = review("a1");
        let p = ActionProjection::from_action(&a);
        let mut s = Stage::new("stage:1", "graph:1");
        s.result = vec![EmbeddedNode::Action(p.clone())];
        s.potential_action = vec![EmbeddedNode::Action(p)];
        let mut doc = Document::Stage(s);

        assert!(apply_to_stage(&mut doc, &[SyncChange::Delete(a)], 8));
        let stage = doc.as_stage().unwrap();
        assert!(stage.result.is_empty());
        assert_eq!(stage.potential_action.len(), 1);
    }

    #[tokio::test]
    async fn sync_writes_stage_once_and_tolerates_missing_stage() {
        let store = Arc::new(MemoryStore::new());
        let writer = Writer::new(
            store.clone(),
            Arc::new(MemoryUniqueIndex::new()),
            RetryPolicy::default(),
            8,
        );
        let a = review("a1");
        store
            .bulk_write(vec![stage_with(vec![EmbeddedNode::Action(
                ActionProjection::from_action(&a),
            )])])
            .await
            .unwrap();
        let scope = RequestScope::new();

        let mut orphan = review("a2");
        orphan.result_of = Some("stage:missing".into());
        let changes = [
            SyncChange::Upsert(a.with_status(ActionStatus::Staged)),
            SyncChange::Upsert(orphan),
        ];
        let updated = sync_workflow(&writer, &scope, &changes).await.unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].rev(), Some(2));
        assert_eq!(
            projections(&updated[0])[0].action_status,
            ActionStatus::Staged
        );
        assert_eq!(store.write_count(), 2);
    }
}
