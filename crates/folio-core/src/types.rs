use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ActionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of an action.
///
/// `Potential → Active → Staged → Endorsed → Completed`, with `Canceled` and
/// `Failed` reachable from any non-terminal state. Terminal statuses never
/// change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ActionStatus {
    #[default]
    #[serde(rename = "PotentialActionStatus")]
    Potential,
    #[serde(rename = "ActiveActionStatus")]
    Active,
    #[serde(rename = "StagedActionStatus")]
    Staged,
    #[serde(rename = "EndorsedActionStatus")]
    Endorsed,
    #[serde(rename = "CompletedActionStatus")]
    Completed,
    #[serde(rename = "CanceledActionStatus")]
    Canceled,
    #[serde(rename = "FailedActionStatus")]
    Failed,
}

impl ActionStatus {
    pub fn all() -> &'static [ActionStatus] {
        &[
            ActionStatus::Potential,
            ActionStatus::Active,
            ActionStatus::Staged,
            ActionStatus::Endorsed,
            ActionStatus::Completed,
            ActionStatus::Canceled,
            ActionStatus::Failed,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionStatus::Potential => "PotentialActionStatus",
            ActionStatus::Active => "ActiveActionStatus",
            ActionStatus::Staged => "StagedActionStatus",
            ActionStatus::Endorsed => "EndorsedActionStatus",
            ActionStatus::Completed => "CompletedActionStatus",
            ActionStatus::Canceled => "CanceledActionStatus",
            ActionStatus::Failed => "FailedActionStatus",
        }
    }

    /// Position along the escalation path. All terminal statuses share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            ActionStatus::Potential => 0,
            ActionStatus::Active => 1,
            ActionStatus::Staged => 2,
            ActionStatus::Endorsed => 3,
            ActionStatus::Completed | ActionStatus::Canceled | ActionStatus::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 4
    }

    /// Completed or Canceled: the states that release a blocking dependency.
    pub fn is_resolved(self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Canceled)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ActionStatus {
    type Err = crate::error::FolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Accept both the full schema name and the short form ("Completed").
        ActionStatus::all()
            .iter()
            .copied()
            .find(|st| {
                let full = st.as_str();
                full == s || full.trim_end_matches("ActionStatus").eq_ignore_ascii_case(s)
            })
            .ok_or_else(|| crate::error::FolioError::InvalidStatus(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// TriggerType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TriggerType {
    OnObjectActiveActionStatus,
    OnObjectStagedActionStatus,
    OnObjectCompletedActionStatus,
    OnObjectFailedActionStatus,
    OnWorkflowStageEnd,
    OnWorkerEnd,
    OnEndorsed,
}

impl TriggerType {
    pub fn all() -> &'static [TriggerType] {
        &[
            TriggerType::OnObjectActiveActionStatus,
            TriggerType::OnObjectStagedActionStatus,
            TriggerType::OnObjectCompletedActionStatus,
            TriggerType::OnObjectFailedActionStatus,
            TriggerType::OnWorkflowStageEnd,
            TriggerType::OnWorkerEnd,
            TriggerType::OnEndorsed,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::OnObjectActiveActionStatus => "OnObjectActiveActionStatus",
            TriggerType::OnObjectStagedActionStatus => "OnObjectStagedActionStatus",
            TriggerType::OnObjectCompletedActionStatus => "OnObjectCompletedActionStatus",
            TriggerType::OnObjectFailedActionStatus => "OnObjectFailedActionStatus",
            TriggerType::OnWorkflowStageEnd => "OnWorkflowStageEnd",
            TriggerType::OnWorkerEnd => "OnWorkerEnd",
            TriggerType::OnEndorsed => "OnEndorsed",
        }
    }

    /// Which reference on the *registered* action a trigger of this type
    /// is resolved against.
    pub fn subject(self) -> TriggerSubject {
        match self {
            TriggerType::OnObjectActiveActionStatus
            | TriggerType::OnObjectStagedActionStatus
            | TriggerType::OnObjectCompletedActionStatus
            | TriggerType::OnObjectFailedActionStatus
            | TriggerType::OnWorkerEnd => TriggerSubject::Object,
            TriggerType::OnWorkflowStageEnd => TriggerSubject::Stage,
            TriggerType::OnEndorsed => TriggerSubject::SelfId,
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerType {
    type Err = crate::error::FolioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TriggerType::all()
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| crate::error::FolioError::InvalidTriggerType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSubject {
    /// The action's `object`.
    Object,
    /// The action's `resultOf` stage.
    Stage,
    /// The action itself.
    SelfId,
}

// ---------------------------------------------------------------------------
// TriggerSlot
// ---------------------------------------------------------------------------

/// The three declaration slots an action can carry, ordered by precedence
/// (`CompleteOn` wins when several fire at once).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerSlot {
    ActivateOn,
    EndorseOn,
    CompleteOn,
}

impl TriggerSlot {
    pub fn target_status(self) -> ActionStatus {
        match self {
            TriggerSlot::ActivateOn => ActionStatus::Active,
            TriggerSlot::EndorseOn => ActionStatus::Endorsed,
            TriggerSlot::CompleteOn => ActionStatus::Completed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TriggerSlot::ActivateOn => "activateOn",
            TriggerSlot::EndorseOn => "endorseOn",
            TriggerSlot::CompleteOn => "completeOn",
        }
    }
}

impl fmt::Display for TriggerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
