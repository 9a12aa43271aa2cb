//! Guardrail Simulation Evaluator
//!
//! Pure comparison of baseline vs. hypothetical per-stage snapshots. No I/O
//! and no state: callers persist the summary themselves.

use crate::approval::{Ladder, StageStatus};
use crate::simulation::models::*;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeSet, HashSet};

/// Evaluate every comparison and fold the regressions into one verdict
pub fn evaluate(comparisons: &[StageComparison]) -> SimulationSummary {
    let mut reasons = Vec::new();
    let mut regressed = BTreeSet::new();
    let mut projected_delay_minutes = 0i64;

    for comparison in comparisons {
        let before = reasons.len();
        let delay = collect_regressions(comparison, &mut reasons);
        projected_delay_minutes += delay;
        if reasons.len() > before {
            regressed.insert(comparison.index);
        }
    }

    let state = if regressed.is_empty() {
        GuardrailState::Ready
    } else {
        GuardrailState::Blocked
    };

    SimulationSummary {
        state,
        reasons,
        regressed_stage_indexes: regressed.into_iter().collect(),
        projected_delay_minutes,
    }
}

/// Push one reason per regression; returns the due-date delay in minutes
fn collect_regressions(comparison: &StageComparison, reasons: &mut Vec<String>) -> i64 {
    let prefix = format!("stage_{}", comparison.index);
    let baseline = &comparison.baseline;
    let simulated = &comparison.simulated;

    if baseline.status == SnapshotStatus::Ready && simulated.status != SnapshotStatus::Ready {
        reasons.push(format!("{}:status_regression", prefix));
    }

    if let (Some(base), Some(sim)) = (baseline.sla_hours, simulated.sla_hours) {
        if sim > base {
            reasons.push(format!("{}:sla_increase_hours:{}", prefix, sim - base));
        }
    }

    let mut delay = 0;
    if let (Some(base), Some(sim)) = (baseline.projected_due_at, simulated.projected_due_at) {
        if sim > base {
            delay = (sim - base).num_minutes();
            reasons.push(format!("{}:due_delay_minutes:{}", prefix, delay));
        }
    }

    let known: HashSet<&str> = baseline.blockers.iter().map(String::as_str).collect();
    let new_blockers: BTreeSet<&str> = simulated
        .blockers
        .iter()
        .map(String::as_str)
        .filter(|b| !known.contains(b))
        .collect();
    if !new_blockers.is_empty() {
        let joined: Vec<&str> = new_blockers.into_iter().collect();
        reasons.push(format!("{}:new_blockers:{}", prefix, joined.join(",")));
    }

    delay
}

/// Project a live ladder into comparisons whose baseline and simulated sides
/// are both the current plan. Callers edit `simulated` to describe the
/// override they are considering.
pub fn project_ladder(ladder: &Ladder, now: DateTime<Utc>) -> Vec<StageComparison> {
    let mut cursor = now;

    ladder
        .stages
        .iter()
        .map(|stage| {
            let (status, projected_due_at, blockers) = match stage.status {
                StageStatus::Approved => (SnapshotStatus::Ready, stage.completed_at, Vec::new()),
                StageStatus::Rejected => (
                    SnapshotStatus::Blocked,
                    None,
                    vec!["stage_rejected".to_string()],
                ),
                StageStatus::InProgress | StageStatus::Delegated => {
                    if let Some(due) = stage.due_at {
                        cursor = cursor.max(due);
                    }
                    (SnapshotStatus::Ready, stage.due_at, Vec::new())
                }
                StageStatus::Pending | StageStatus::Reset => {
                    let due = stage.sla_hours.map(|h| cursor + Duration::hours(i64::from(h)));
                    if let Some(due) = due {
                        cursor = due;
                    }
                    (SnapshotStatus::Ready, due, Vec::new())
                }
            };

            let snapshot = StageSnapshot {
                status,
                sla_hours: stage.sla_hours,
                projected_due_at,
                blockers,
                required_actions: Vec::new(),
                auto_triggers: Vec::new(),
                assignee_id: stage.assignee_id,
                delegate_id: stage.delegated_to_id,
            };

            StageComparison {
                index: stage.sequence_index,
                name: stage.name.clone(),
                required_role: stage.required_role.clone(),
                mapped_step_indexes: Vec::new(),
                gate_keys: Vec::new(),
                baseline: snapshot.clone(),
                simulated: snapshot,
            }
        })
        .collect()
}
