//! Application state management
//!
//! Contains shared state accessible across all handlers. The ladder and
//! override stores live in memory; the event log optionally mirrors into
//! PostgreSQL.

use crate::approval::{ApprovalLadder, LadderStore, PackagingGate, SlaMonitor};
use crate::clock::SharedClock;
use crate::config::GovernanceConfig;
use crate::events::EventLog;
use crate::overrides::{OverrideEngine, OverrideStore};
use crate::simulation::SimulationService;
use std::sync::Arc;

/// Application state shared across all handlers
pub struct AppState {
    /// Approval ladder operations
    pub ladder: ApprovalLadder,

    /// Packaging guardrail gate (shared with the SLA monitor)
    pub gate: Arc<PackagingGate>,

    /// Guardrail simulation records
    pub simulations: SimulationService,

    /// Override action engine
    pub overrides: OverrideEngine,

    /// Execution-scoped governance event log
    pub events: Arc<EventLog>,

    /// Engine timing knobs
    pub governance: GovernanceConfig,

    /// JWT secret key for token validation
    pub jwt_secret: String,

    ladder_store: Arc<LadderStore>,
    clock: SharedClock,
}

impl AppState {
    pub fn new(
        events: Arc<EventLog>,
        clock: SharedClock,
        governance: GovernanceConfig,
        jwt_secret: String,
    ) -> Self {
        let ladder_store = Arc::new(LadderStore::new());
        let override_store = Arc::new(OverrideStore::new());

        Self {
            ladder: ApprovalLadder::new(ladder_store.clone(), events.clone(), clock.clone()),
            gate: Arc::new(PackagingGate::new(
                ladder_store.clone(),
                events.clone(),
                clock.clone(),
            )),
            simulations: SimulationService::new(events.clone(), clock.clone()),
            overrides: OverrideEngine::new(
                override_store,
                events.clone(),
                clock.clone(),
                governance.reversal_lock_ttl(),
            ),
            events,
            governance,
            jwt_secret,
            ladder_store,
            clock,
        }
    }

    /// SLA monitor over this state's ladders
    pub fn sla_monitor(&self) -> SlaMonitor {
        SlaMonitor::new(
            self.ladder_store.clone(),
            self.gate.clone(),
            self.events.clone(),
            self.clock.clone(),
            self.governance.sla_scan_interval(),
        )
    }
}

/// Type alias for shared state
pub type SharedState = Arc<AppState>;
