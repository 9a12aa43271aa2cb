//! Override data models
//!
//! Overrides are corrective actions applied to a governance baseline. Each
//! one carries the exact baseline fields it replaced so a reversal can put
//! them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Corrective action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideKind {
    /// Add a reviewer to the baseline
    Reassign,
    /// Put the baseline into a cooling-down period
    Cooldown,
    /// Escalate the baseline, optionally pulling in a reviewer
    Escalate,
}

impl OverrideKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideKind::Reassign => "reassign",
            OverrideKind::Cooldown => "cooldown",
            OverrideKind::Escalate => "escalate",
        }
    }
}

/// Override lifecycle: accepted -> executed -> reversed, or accepted -> declined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideStatus {
    Accepted,
    Declined,
    Executed,
    Reversed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineStatus {
    Published,
    CoolingDown,
    Escalated,
}

/// Versioned governance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceBaseline {
    pub id: Uuid,
    pub name: String,
    pub reviewer_ids: Vec<Uuid>,
    pub status: BaselineStatus,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

impl GovernanceBaseline {
    pub fn fields(&self) -> BaselineFields {
        BaselineFields {
            reviewer_ids: self.reviewer_ids.clone(),
            status: self.status,
        }
    }

    /// Overwrite the mutable fields and bump the version
    pub fn apply(&mut self, fields: &BaselineFields, now: DateTime<Utc>) {
        self.reviewer_ids = fields.reviewer_ids.clone();
        self.status = fields.status;
        self.version += 1;
        self.updated_at = now;
    }
}

/// The baseline fields an override may change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineFields {
    pub reviewer_ids: Vec<Uuid>,
    pub status: BaselineStatus,
}

impl BaselineFields {
    /// Fields after applying `kind`
    pub fn with_override(&self, kind: OverrideKind, target_reviewer_id: Option<Uuid>) -> Self {
        let mut next = self.clone();
        match kind {
            OverrideKind::Reassign => {
                if let Some(reviewer) = target_reviewer_id {
                    if !next.reviewer_ids.contains(&reviewer) {
                        next.reviewer_ids.push(reviewer);
                    }
                }
            }
            OverrideKind::Cooldown => next.status = BaselineStatus::CoolingDown,
            OverrideKind::Escalate => {
                next.status = BaselineStatus::Escalated;
                if let Some(reviewer) = target_reviewer_id {
                    if !next.reviewer_ids.contains(&reviewer) {
                        next.reviewer_ids.push(reviewer);
                    }
                }
            }
        }
        next
    }

    /// Per-field differences, `before` taken from `self`
    pub fn diff(&self, other: &BaselineFields) -> Vec<FieldDiff> {
        let mut diffs = Vec::new();
        if self.reviewer_ids != other.reviewer_ids {
            diffs.push(FieldDiff {
                key: "reviewer_ids".to_string(),
                before: serde_json::json!(self.reviewer_ids),
                after: serde_json::json!(other.reviewer_ids),
            });
        }
        if self.status != other.status {
            diffs.push(FieldDiff {
                key: "status".to_string(),
                before: serde_json::json!(self.status),
                after: serde_json::json!(other.status),
            });
        }
        diffs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub key: String,
    pub before: serde_json::Value,
    pub after: serde_json::Value,
}

/// Provenance justifying an override. Snapshots are stored, never interpreted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideLineage {
    pub scenario_id: Option<Uuid>,
    pub scenario_snapshot: Option<serde_json::Value>,
    pub notebook_entry_id: Option<Uuid>,
    pub notebook_snapshot: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
    pub captured_at: DateTime<Utc>,
}

/// Lineage as supplied by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageInput {
    pub scenario_id: Option<Uuid>,
    pub scenario_snapshot: Option<serde_json::Value>,
    pub notebook_entry_id: Option<Uuid>,
    pub notebook_snapshot: Option<serde_json::Value>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl LineageInput {
    pub fn is_empty(&self) -> bool {
        self.scenario_id.is_none()
            && self.scenario_snapshot.is_none()
            && self.notebook_entry_id.is_none()
            && self.notebook_snapshot.is_none()
    }

    pub fn capture(self, now: DateTime<Utc>) -> OverrideLineage {
        OverrideLineage {
            scenario_id: self.scenario_id,
            scenario_snapshot: self.scenario_snapshot,
            notebook_entry_id: self.notebook_entry_id,
            notebook_snapshot: self.notebook_snapshot,
            metadata: self.metadata.unwrap_or_else(|| serde_json::json!({})),
            captured_at: now,
        }
    }
}

/// Audit record of one completed reversal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideReversalEvent {
    pub id: Uuid,
    pub diffs: Vec<FieldDiff>,
    pub actor_id: Uuid,
    pub notes: Option<String>,
    pub cooldown_expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Caller input shared by `accept` and `execute`
#[derive(Debug, Clone)]
pub struct OverrideRequest {
    pub recommendation_id: String,
    pub execution_id: Uuid,
    pub rule_key: Option<String>,
    pub action: OverrideKind,
    pub baseline_id: Option<Uuid>,
    pub target_reviewer_id: Option<Uuid>,
    pub lineage: Option<LineageInput>,
    pub actor_id: Uuid,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideAction {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub recommendation_id: String,
    pub rule_key: Option<String>,
    pub action: OverrideKind,
    pub status: OverrideStatus,
    pub baseline_id: Option<Uuid>,
    pub target_reviewer_id: Option<Uuid>,
    pub actor_id: Uuid,
    pub notes: Option<String>,
    pub reversible: bool,
    pub execution_hash: String,
    pub prior_state: Option<BaselineFields>,
    pub applied_state: Option<BaselineFields>,
    #[serde(skip_serializing)]
    pub reversal_lock_token: Option<Uuid>,
    pub reversal_lock_tier: Option<String>,
    pub reversal_lock_scope: Option<String>,
    pub reversal_lock_actor_id: Option<Uuid>,
    pub reversal_lock_acquired_at: Option<DateTime<Utc>>,
    pub cooldown_expires_at: Option<DateTime<Utc>>,
    pub cooldown_window_minutes: Option<i64>,
    pub lineage: Option<OverrideLineage>,
    pub reversal_events: Vec<OverrideReversalEvent>,
    pub executed_at: Option<DateTime<Utc>>,
    pub reversed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OverrideAction {
    /// True while a reversal lock is held and has not expired
    pub fn is_locked(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        match (self.reversal_lock_token, self.reversal_lock_acquired_at) {
            (Some(_), Some(acquired_at)) => acquired_at + ttl > now,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn release_lock(&mut self) {
        self.reversal_lock_token = None;
        self.reversal_lock_tier = None;
        self.reversal_lock_scope = None;
        self.reversal_lock_actor_id = None;
        self.reversal_lock_acquired_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_reassign_deduplicates_reviewers() {
        let reviewer = Uuid::new_v4();
        let fields = BaselineFields {
            reviewer_ids: vec![reviewer],
            status: BaselineStatus::Published,
        };
        assert_eq!(fields.with_override(OverrideKind::Reassign, Some(reviewer)), fields);
    }

    #[test]
    fn test_escalate_diff_covers_both_fields() {
        let fields = BaselineFields {
            reviewer_ids: vec![],
            status: BaselineStatus::Published,
        };
        let escalated = fields.with_override(OverrideKind::Escalate, Some(Uuid::new_v4()));
        let diffs = fields.diff(&escalated);
        let keys: Vec<_> = diffs.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["reviewer_ids", "status"]);
        assert_eq!(diffs[1].after, serde_json::json!("escalated"));
    }
}
