//! Simulation recording
//!
//! Runs the evaluator on behalf of an operator and keeps each invocation as
//! an immutable record. Purely advisory: nothing here touches ladder state.

use crate::approval::Ladder;
use crate::clock::SharedClock;
use crate::error::{validation_error, AppError};
use crate::events::{event_types, EventLog};
use crate::simulation::evaluator::{evaluate, project_ladder};
use crate::simulation::models::*;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

pub struct SimulationService {
    /// Execution ID -> simulations, oldest first
    simulations: RwLock<HashMap<Uuid, Vec<GuardrailSimulation>>>,
    events: Arc<EventLog>,
    clock: SharedClock,
}

impl SimulationService {
    pub fn new(events: Arc<EventLog>, clock: SharedClock) -> Self {
        Self {
            simulations: RwLock::new(HashMap::new()),
            events,
            clock,
        }
    }

    /// Evaluate `comparisons` and persist the result
    pub async fn record(
        &self,
        execution_id: Uuid,
        actor_id: Uuid,
        comparisons: &[StageComparison],
        metadata: Option<serde_json::Value>,
    ) -> Result<GuardrailSimulation, AppError> {
        if comparisons.is_empty() {
            return Err(validation_error("At least one stage comparison is required"));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = comparisons.iter().find(|c| !seen.insert(c.index)) {
            return Err(validation_error(format!(
                "Duplicate comparison for stage index {}",
                dup.index
            )));
        }

        let simulation = GuardrailSimulation {
            id: Uuid::new_v4(),
            execution_id,
            actor_id,
            summary: evaluate(comparisons),
            metadata: metadata.unwrap_or_else(|| json!({})),
            created_at: self.clock.now(),
        };

        let recorded = {
            let mut simulations = self.simulations.write().await;
            simulations.entry(execution_id).or_default().push(simulation.clone());
            self.events
                .append(
                    execution_id,
                    event_types::GUARDRAIL_SIMULATED,
                    Some(actor_id),
                    json!({
                        "simulation_id": simulation.id,
                        "guardrail_state": simulation.summary.state,
                        "projected_delay_minutes": simulation.summary.projected_delay_minutes,
                        "reasons": simulation.summary.reasons,
                        "regressed_stage_indexes": simulation.summary.regressed_stage_indexes,
                    }),
                )
                .await
        };

        info!(
            "🧪 Guardrail simulation {} for execution {}: {:?} ({} reasons, +{}m)",
            simulation.id,
            execution_id,
            simulation.summary.state,
            simulation.summary.reasons.len(),
            simulation.summary.projected_delay_minutes
        );

        self.events.publish(std::slice::from_ref(&recorded)).await;

        Ok(simulation)
    }

    /// Starting comparisons for a live ladder, both sides set to the current
    /// plan as of now
    pub fn project(&self, ladder: &Ladder) -> Vec<StageComparison> {
        project_ladder(ladder, self.clock.now())
    }

    /// Simulations for one execution, newest first
    pub async fn list(&self, execution_id: Uuid) -> Vec<GuardrailSimulation> {
        let simulations = self.simulations.read().await;
        simulations
            .get(&execution_id)
            .map(|list| list.iter().rev().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ladder::tests::{blueprint, setup};
    use crate::approval::Decision;
    use crate::clock::Clock;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_projected_ladder_evaluates_ready() {
        let (ladder, _, events, clock) = setup();
        let service = SimulationService::new(events.clone(), clock.clone());
        let opened = ladder.open(Uuid::new_v4(), None, &blueprint(3)).await.unwrap();
        ladder
            .decide(opened.stages[0].id, Uuid::new_v4(), Decision::Approve, None, None)
            .await
            .unwrap();
        let view = ladder.ladder(opened.artifact.id).await.unwrap();

        let comparisons = service.project(&view);
        assert_eq!(comparisons.len(), 3);
        // Stage 2 is projected after stage 1's deadline
        assert_eq!(
            comparisons[2].baseline.projected_due_at,
            Some(clock.now() + Duration::hours(8))
        );

        let simulation = service
            .record(opened.artifact.execution_id, Uuid::new_v4(), &comparisons, None)
            .await
            .unwrap();
        assert_eq!(simulation.summary.state, GuardrailState::Ready);
    }

    #[tokio::test]
    async fn test_staffing_override_forecast_is_recorded() {
        let (ladder, _, events, clock) = setup();
        let service = SimulationService::new(events.clone(), clock.clone());
        let opened = ladder.open(Uuid::new_v4(), None, &blueprint(2)).await.unwrap();
        let execution_id = opened.artifact.execution_id;

        let mut comparisons = service.project(&opened);
        comparisons[1].simulated.sla_hours = Some(6);
        comparisons[1].simulated.projected_due_at = comparisons[1]
            .baseline
            .projected_due_at
            .map(|due| due + Duration::hours(2));

        let simulation = service
            .record(execution_id, Uuid::new_v4(), &comparisons, Some(json!({ "scenario": "short-staffed" })))
            .await
            .unwrap();

        assert_eq!(simulation.summary.state, GuardrailState::Blocked);
        assert_eq!(simulation.summary.regressed_stage_indexes, vec![1]);
        assert_eq!(simulation.summary.projected_delay_minutes, 120);
        assert_eq!(service.list(execution_id).await.len(), 1);

        let emitted = events.of_type(execution_id, event_types::GUARDRAIL_SIMULATED).await;
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].payload["guardrail_state"], json!("blocked"));
        assert_eq!(emitted[0].payload["projected_delay_minutes"], json!(120));
    }

    #[tokio::test]
    async fn test_duplicate_indexes_rejected() {
        let (ladder, _, events, clock) = setup();
        let service = SimulationService::new(events, clock.clone());
        let opened = ladder.open(Uuid::new_v4(), None, &blueprint(1)).await.unwrap();

        let mut comparisons = service.project(&opened);
        comparisons.push(comparisons[0].clone());

        let result = service
            .record(opened.artifact.execution_id, Uuid::new_v4(), &comparisons, None)
            .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(service.record(Uuid::new_v4(), Uuid::new_v4(), &[], None).await.is_err());
    }
}
