//! Guardrail simulation data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Readiness of a stage in a snapshot
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    Ready,
    Blocked,
    /// Not yet reachable; counts as "not ready" when compared to a ready baseline
    Pending,
}

/// State of one stage under a given configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageSnapshot {
    pub status: SnapshotStatus,
    pub sla_hours: Option<u32>,
    pub projected_due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub blockers: Vec<String>,
    #[serde(default)]
    pub required_actions: Vec<String>,
    #[serde(default)]
    pub auto_triggers: Vec<String>,
    pub assignee_id: Option<Uuid>,
    pub delegate_id: Option<Uuid>,
}

/// Baseline vs. hypothetical view of one ladder stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageComparison {
    pub index: usize,
    pub name: String,
    pub required_role: String,
    #[serde(default)]
    pub mapped_step_indexes: Vec<usize>,
    #[serde(default)]
    pub gate_keys: Vec<String>,
    pub baseline: StageSnapshot,
    pub simulated: StageSnapshot,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailState {
    Ready,
    Blocked,
}

/// Verdict of one evaluation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SimulationSummary {
    pub state: GuardrailState,
    /// One entry per regression per stage, e.g. `stage_0:sla_increase_hours:2`
    pub reasons: Vec<String>,
    pub regressed_stage_indexes: Vec<usize>,
    pub projected_delay_minutes: i64,
}

/// Immutable record of one evaluator invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailSimulation {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub actor_id: Uuid,
    pub summary: SimulationSummary,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
