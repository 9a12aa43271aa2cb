//! Approval ladder data model

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// =============================================================================
// STATUSES
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    /// Current stage handed to a delegate; still decidable
    Delegated,
    /// Parked after an earlier stage was reset; re-activated in sequence
    Reset,
}

impl StageStatus {
    /// The stage a ladder is currently waiting on
    pub fn is_active(&self) -> bool {
        matches!(self, StageStatus::InProgress | StageStatus::Delegated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InProgress => "in_progress",
            StageStatus::Approved => "approved",
            StageStatus::Rejected => "rejected",
            StageStatus::Delegated => "delegated",
            StageStatus::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Queued,
    Processing,
    Ready,
    Retrying,
    Failed,
    Expired,
}

impl ArtifactStatus {
    pub fn can_start_packaging(&self) -> bool {
        matches!(self, ArtifactStatus::Queued | ArtifactStatus::Retrying)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Approve,
    Reject,
    Delegate,
    Reset,
    Comment,
    Escalate,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Reject => "reject",
        }
    }
}

// =============================================================================
// BLUEPRINT
// =============================================================================

/// One stage definition used to seed a ladder
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StageBlueprint {
    #[validate(length(min = 1, max = 120, message = "Stage name must be 1-120 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 64, message = "Required role must be 1-64 characters"))]
    pub required_role: String,
    #[validate(range(min = 1, max = 720, message = "SLA must be between 1 and 720 hours"))]
    pub sla_hours: Option<u32>,
    pub assignee_id: Option<Uuid>,
    pub delegate_id: Option<Uuid>,
}

// =============================================================================
// STAGE
// =============================================================================

/// A checkpoint in an approval ladder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalStage {
    pub id: Uuid,
    pub artifact_id: Uuid,
    pub sequence_index: usize,
    pub name: String,
    pub required_role: String,
    pub status: StageStatus,
    pub sla_hours: Option<u32>,
    pub due_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub assignee_id: Option<Uuid>,
    pub delegated_to_id: Option<Uuid>,
    pub overdue_notified_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

impl ApprovalStage {
    pub fn from_blueprint(artifact_id: Uuid, sequence_index: usize, blueprint: &StageBlueprint) -> Self {
        Self {
            id: Uuid::new_v4(),
            artifact_id,
            sequence_index,
            name: blueprint.name.clone(),
            required_role: blueprint.required_role.clone(),
            status: StageStatus::Pending,
            sla_hours: blueprint.sla_hours,
            due_at: None,
            started_at: None,
            completed_at: None,
            assignee_id: blueprint.assignee_id,
            delegated_to_id: blueprint.delegate_id,
            overdue_notified_at: None,
            metadata: serde_json::json!({}),
        }
    }

    /// Make this the stage the ladder waits on, with a fresh deadline
    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.status = StageStatus::InProgress;
        self.started_at = Some(now);
        self.due_at = self.sla_hours.map(|h| now + Duration::hours(i64::from(h)));
        self.completed_at = None;
        self.overdue_notified_at = None;
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_active() && self.due_at.is_some_and(|due| due < now)
    }
}

// =============================================================================
// ACTION (audit row)
// =============================================================================

/// Append-only record of one decision on a stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalAction {
    pub id: Uuid,
    pub artifact_id: Uuid,
    pub stage_id: Uuid,
    pub kind: ActionKind,
    /// `None` for system actions (SLA escalation)
    pub actor_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub notes: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// GATED ARTIFACT
// =============================================================================

/// The narrative export protected by a ladder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatedArtifact {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub approval_status: ApprovalStatus,
    pub current_stage_id: Option<Uuid>,
    pub approval_stage_count: usize,
    pub approval_completed_at: Option<DateTime<Utc>>,
    pub artifact_status: ArtifactStatus,
    pub packaging_attempts: u32,
    pub requested_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GatedArtifact {
    pub fn new(execution_id: Uuid, requested_by: Option<Uuid>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            approval_status: ApprovalStatus::Pending,
            current_stage_id: None,
            approval_stage_count: 0,
            approval_completed_at: None,
            artifact_status: ArtifactStatus::Queued,
            packaging_attempts: 0,
            requested_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// Packaging may proceed only once every stage has signed off
    pub fn is_release_ready(&self) -> bool {
        self.approval_status == ApprovalStatus::Approved && self.current_stage_id.is_none()
    }
}

/// Read view of an artifact and its ordered stages
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ladder {
    pub artifact: GatedArtifact,
    pub stages: Vec<ApprovalStage>,
}

impl Ladder {
    pub fn current_stage(&self) -> Option<&ApprovalStage> {
        let id = self.artifact.current_stage_id?;
        self.stages.iter().find(|s| s.id == id)
    }
}
