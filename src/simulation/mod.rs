//! Guardrail Simulation Module
//!
//! Forecasts the effect of staffing/scheduling overrides on an approval
//! ladder before they are applied. Advisory only.

mod evaluator;
pub mod models;
mod service;

pub use models::*;
pub use service::SimulationService;
