//! Approval Ladder Module
//!
//! Sequenced, role-based sign-off gating the release of narrative exports:
//! - Ladder: stages created from a blueprint, advanced by decisions
//! - Gate: packaging check run before every attempt
//! - Monitor: periodic SLA scan that re-validates the gate

pub mod gate;
pub mod ladder;
pub mod models;
pub mod monitor;
pub mod store;

pub use gate::{PackagingClaim, PackagingGate, PackagingOutcome};
pub use ladder::{ApprovalLadder, DecisionOutcome};
pub use models::*;
pub use monitor::SlaMonitor;
pub use store::LadderStore;
