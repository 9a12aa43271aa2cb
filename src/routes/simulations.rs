//! Guardrail simulation route handlers

use crate::auth::{require_role, Claims, Role};
use crate::error::{validation_error, ApiResult};
use crate::models::SuccessResponse;
use crate::simulation::{GuardrailSimulation, StageComparison};
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SimulationRequest {
    #[validate(length(min = 1, max = 64, message = "Provide 1-64 stage comparisons"))]
    pub comparisons: Vec<StageComparison>,
    pub metadata: Option<serde_json::Value>,
}

/// Evaluate a hypothetical ladder configuration and keep the verdict
pub async fn record_simulation(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(execution_id): Path<Uuid>,
    Json(payload): Json<SimulationRequest>,
) -> ApiResult<Json<SuccessResponse<GuardrailSimulation>>> {
    require_role(&claims, Role::Operator)?;
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let simulation = state
        .simulations
        .record(execution_id, claims.sub, &payload.comparisons, payload.metadata)
        .await?;

    info!(
        "User {} simulated execution {}: {:?}",
        claims.sub, execution_id, simulation.summary.state
    );

    Ok(Json(SuccessResponse::with_data("Simulation recorded", simulation)))
}

pub async fn list_simulations(
    State(state): State<SharedState>,
    Extension(_claims): Extension<Claims>,
    Path(execution_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Vec<GuardrailSimulation>>>> {
    let simulations = state.simulations.list(execution_id).await;
    Ok(Json(SuccessResponse::with_data(
        format!("{} simulations", simulations.len()),
        simulations,
    )))
}

/// Current plan of an artifact's ladder as editable comparisons
pub async fn project_artifact(
    State(state): State<SharedState>,
    Extension(_claims): Extension<Claims>,
    Path(artifact_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Vec<StageComparison>>>> {
    let ladder = state.ladder.ladder(artifact_id).await?;
    let comparisons = state.simulations.project(&ladder);
    Ok(Json(SuccessResponse::with_data(
        format!("{} stages projected", comparisons.len()),
        comparisons,
    )))
}
