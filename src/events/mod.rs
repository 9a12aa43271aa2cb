//! Governance Event Log
//!
//! Every stage transition, gate block and override mutation lands here as one
//! structured event. Events are scoped to the owning experiment execution and
//! sequenced per execution; downstream dashboards learn of activity only
//! through this stream.

mod log;
mod mirror;

pub use log::{EventLog, GovernanceEvent};
pub use mirror::PgEventMirror;

/// Event type names (stable, consumed by downstream analytics)
pub mod event_types {
    pub const STAGE_ACTIVATED: &str = "approval.stage_activated";
    pub const STAGE_APPROVED: &str = "approval.stage_approved";
    pub const STAGE_REJECTED: &str = "approval.stage_rejected";
    pub const STAGE_DELEGATED: &str = "approval.stage_delegated";
    pub const STAGE_RESET: &str = "approval.stage_reset";
    pub const STAGE_OVERDUE: &str = "approval.stage_overdue";
    pub const COMMENT_ADDED: &str = "approval.comment_added";
    pub const LADDER_COMPLETED: &str = "approval.completed";

    pub const AWAITING_APPROVAL: &str = "packaging.awaiting_approval";
    pub const PACKAGING_CLAIMED: &str = "packaging.claimed";
    pub const PACKAGING_OUTCOME: &str = "packaging.outcome_recorded";

    pub const GUARDRAIL_SIMULATED: &str = "guardrail.simulated";

    pub const OVERRIDE_ACCEPTED: &str = "override.accepted";
    pub const OVERRIDE_DECLINED: &str = "override.declined";
    pub const OVERRIDE_EXECUTED: &str = "override.executed";
    pub const OVERRIDE_REVERSED: &str = "override.reversed";
}
