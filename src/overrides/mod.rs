//! Override Action Engine module
//!
//! Operator-driven corrective actions on governance baselines with an
//! accept -> execute -> reverse lifecycle.

mod engine;
mod hashing;
pub mod models;
mod store;

pub use engine::{OverrideEngine, ReversalOutcome, MAX_COOLDOWN_MINUTES};
pub use models::*;
pub use store::OverrideStore;
