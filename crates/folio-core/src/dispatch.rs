//! Worker dispatch.
//!
//! Worker actions are sent to a broker; the send returns once the broker
//! has accepted the message, not when the work is done. In rpc mode the
//! caller additionally waits on the completion topic for the matching
//! terminal action. A timeout is recorded on the action as Failed.
//!
//! A Canceled status already stored for the action wins over whatever the
//! worker reports, since cancellation may race with completion.

use crate::document::{Action, ActionError, Document};
use crate::error::{FolioError, Result};
use crate::orchestrator::{Engine, PostOptions};
use crate::scope::RequestScope;
use crate::types::ActionStatus;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Hand the action to the worker pool. Returns on acknowledgement.
    async fn send(&self, action: &Action) -> Result<()>;

    /// Subscribe to terminal actions reported by workers.
    fn subscribe(&self) -> broadcast::Receiver<Action>;

    /// Announce that a worker action reached a terminal status.
    async fn publish_completion(&self, action: &Action) -> Result<()>;
}

/// In-process broker over two broadcast channels.
pub struct MemoryBroker {
    requests: broadcast::Sender<Action>,
    completions: broadcast::Sender<Action>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(256)
    }
}

impl MemoryBroker {
    pub fn new(capacity: usize) -> Self {
        let (requests, _) = broadcast::channel(capacity);
        let (completions, _) = broadcast::channel(capacity);
        Self {
            requests,
            completions,
        }
    }

    /// Worker side: receive dispatched actions.
    pub fn requests(&self) -> broadcast::Receiver<Action> {
        self.requests.subscribe()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn send(&self, action: &Action) -> Result<()> {
        if self.requests.send(action.clone()).is_err() {
            tracing::debug!(action_id = %action.id, "no worker subscribed; message dropped");
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Action> {
        self.completions.subscribe()
    }

    async fn publish_completion(&self, action: &Action) -> Result<()> {
        // no waiter is fine: rpc callers subscribe before sending
        let _ = self.completions.send(action.clone());
        Ok(())
    }
}

async fn wait_for_completion(
    rx: &mut broadcast::Receiver<Action>,
    id: &str,
) -> Result<Action> {
    loop {
        match rx.recv().await {
            Ok(a) if a.id == id && a.action_status.is_terminal() => return Ok(a),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "completion subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(FolioError::Broker("completion topic closed".to_string()))
            }
        }
    }
}

async fn stored(engine: &Engine, id: &str) -> Result<Option<Action>> {
    Ok(engine
        .store()
        .get_many(&[id.to_string()])
        .await?
        .into_iter()
        .next()
        .and_then(Document::into_action))
}

/// Send `action` to the worker pool. With `rpc`, wait up to the configured
/// timeout for its terminal state and return it.
pub async fn dispatch(engine: &Engine, action: &Action, rpc: bool) -> Result<Option<Action>> {
    let Some(broker) = engine.broker() else {
        return Err(FolioError::Broker("no broker configured".to_string()));
    };
    let mut rx = broker.subscribe();
    broker.send(action).await?;
    tracing::debug!(action_id = %action.id, rpc, "dispatched to worker pool");
    if !rpc {
        return Ok(None);
    }

    let timeout_secs = engine.config().dispatch.rpc_timeout_secs;
    let waited = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        wait_for_completion(&mut rx, &action.id),
    )
    .await;

    match waited {
        Ok(reported) => {
            let reported = reported?;
            match stored(engine, &action.id).await? {
                Some(current) if current.action_status == ActionStatus::Canceled => Ok(Some(current)),
                _ => Ok(Some(reported)),
            }
        }
        Err(_) => record_timeout(engine, action, timeout_secs).await,
    }
}

async fn record_timeout(
    engine: &Engine,
    action: &Action,
    timeout_secs: u64,
) -> Result<Option<Action>> {
    let err = FolioError::UpstreamDispatchTimeout {
        action_id: action.id.clone(),
        timeout_secs,
    };
    let message = err.to_string();
    let now = chrono::Utc::now();
    let scope = Arc::new(RequestScope::new());

    let mut marked_failed = false;
    let doc = engine
        .writer()
        .update(&scope, &action.id, None, |doc| {
            marked_failed = false;
            let Document::Action(a) = doc else {
                return Ok(false);
            };
            if a.action_status.is_terminal() {
                return Ok(false);
            }
            a.action_status = ActionStatus::Failed;
            a.error = Some(ActionError {
                kind: "upstream_dispatch_timeout".to_string(),
                message: message.clone(),
            });
            a.stamp_times(now);
            marked_failed = true;
            Ok(true)
        })
        .await?;
    let Some(current) = doc.into_action() else {
        return Err(err);
    };
    if !marked_failed {
        // the worker or a cancel got there first
        return Ok(Some(current));
    }

    tracing::warn!(action_id = %action.id, timeout_secs, "worker timed out; action failed");
    if let Err(e) = crate::triggers::fire(engine, &scope, &[current], &PostOptions::default(), &[]).await {
        tracing::warn!(action_id = %action.id, error = %e, "triggers after dispatch timeout failed");
    }
    Err(err)
}
