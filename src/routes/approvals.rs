//! Approval ladder and packaging gate route handlers

use crate::approval::{
    ApprovalAction, ApprovalStage, Decision, DecisionOutcome, GatedArtifact, Ladder,
    PackagingClaim, PackagingOutcome, StageBlueprint,
};
use crate::auth::{require_role, require_stage_role, Claims, Role};
use crate::error::{validation_error, ApiResult};
use crate::events::GovernanceEvent;
use crate::models::SuccessResponse;
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

// ==================== Request/Response Types ====================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateArtifactRequest {
    pub execution_id: Uuid,
    #[validate(length(min = 1, max = 32, message = "A ladder needs 1-32 stages"), nested)]
    pub stages: Vec<StageBlueprint>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub decision: Decision,
    #[validate(length(max = 4096))]
    pub signature: Option<String>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DelegateRequest {
    pub delegate_id: Uuid,
    pub due_at: Option<DateTime<Utc>>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CommentRequest {
    #[validate(length(min = 1, max = 4000, message = "Comment must be 1-4000 characters"))]
    pub notes: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRequest {
    pub outcome: PackagingOutcome,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResponse {
    pub artifact_id: Uuid,
    pub ready: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    pub claimed: bool,
    pub artifact: GatedArtifact,
}

// ==================== Handlers ====================

/// Register an artifact and seed its approval ladder
pub async fn create_artifact(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateArtifactRequest>,
) -> ApiResult<Json<SuccessResponse<Ladder>>> {
    require_role(&claims, Role::Operator)?;
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let ladder = state
        .ladder
        .open(payload.execution_id, Some(claims.sub), &payload.stages)
        .await?;

    info!(
        "User {} opened a {}-stage ladder for execution {}",
        claims.sub,
        ladder.stages.len(),
        payload.execution_id
    );

    Ok(Json(SuccessResponse::with_data("Approval ladder created", ladder)))
}

pub async fn get_artifact(
    State(state): State<SharedState>,
    Extension(_claims): Extension<Claims>,
    Path(artifact_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Ladder>>> {
    let ladder = state.ladder.ladder(artifact_id).await?;
    Ok(Json(SuccessResponse::with_data("Approval ladder", ladder)))
}

pub async fn list_actions(
    State(state): State<SharedState>,
    Extension(_claims): Extension<Claims>,
    Path(artifact_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Vec<ApprovalAction>>>> {
    let actions = state.ladder.actions(artifact_id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("{} approval actions", actions.len()),
        actions,
    )))
}

/// Run the packaging gate without claiming
pub async fn verify_packaging(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(artifact_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<GateResponse>>> {
    require_role(&claims, Role::Operator)?;
    let ready = state.gate.verify_by_id(artifact_id).await?;
    let message = if ready { "Approval complete" } else { "Awaiting approval" };
    Ok(Json(SuccessResponse::with_data(
        message,
        GateResponse { artifact_id, ready },
    )))
}

/// Gate-checked move into `processing`, called by the packaging worker
pub async fn claim_packaging(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(artifact_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<ClaimResponse>>> {
    require_role(&claims, Role::Operator)?;
    let response = match state.gate.claim_for_packaging(artifact_id).await? {
        PackagingClaim::Claimed(artifact) => ClaimResponse { claimed: true, artifact },
        PackagingClaim::Blocked(artifact) => ClaimResponse { claimed: false, artifact },
    };
    debug!("Packaging claim for {}: {}", artifact_id, response.claimed);
    Ok(Json(SuccessResponse::with_data("Packaging claim processed", response)))
}

pub async fn record_outcome(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(artifact_id): Path<Uuid>,
    Json(payload): Json<OutcomeRequest>,
) -> ApiResult<Json<SuccessResponse<GatedArtifact>>> {
    require_role(&claims, Role::Operator)?;
    let artifact = state
        .gate
        .record_packaging_outcome(artifact_id, payload.outcome)
        .await?;
    Ok(Json(SuccessResponse::with_data("Packaging outcome recorded", artifact)))
}

/// Approve or reject the current stage
pub async fn decide_stage(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(stage_id): Path<Uuid>,
    Json(payload): Json<DecisionRequest>,
) -> ApiResult<Json<SuccessResponse<DecisionOutcome>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;
    let stage = state.ladder.stage(stage_id).await?;
    require_stage_role(&claims, &stage.required_role)?;

    let outcome = state
        .ladder
        .decide(stage_id, claims.sub, payload.decision, payload.signature, payload.notes)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        format!("Stage {}", outcome.stage.status.as_str()),
        outcome,
    )))
}

pub async fn delegate_stage(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(stage_id): Path<Uuid>,
    Json(payload): Json<DelegateRequest>,
) -> ApiResult<Json<SuccessResponse<ApprovalStage>>> {
    payload.validate().map_err(|e| validation_error(e.to_string()))?;
    let stage = state.ladder.stage(stage_id).await?;
    require_stage_role(&claims, &stage.required_role)?;

    let stage = state
        .ladder
        .delegate(stage_id, claims.sub, payload.delegate_id, payload.due_at, payload.notes)
        .await?;
    Ok(Json(SuccessResponse::with_data("Stage delegated", stage)))
}

pub async fn reset_stage(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(stage_id): Path<Uuid>,
    Json(payload): Json<ResetRequest>,
) -> ApiResult<Json<SuccessResponse<Ladder>>> {
    require_role(&claims, Role::Operator)?;
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let ladder = state.ladder.reset(stage_id, claims.sub, payload.notes).await?;
    Ok(Json(SuccessResponse::with_data("Stage reset", ladder)))
}

pub async fn comment_stage(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Path(stage_id): Path<Uuid>,
    Json(payload): Json<CommentRequest>,
) -> ApiResult<Json<SuccessResponse<ApprovalAction>>> {
    require_role(&claims, Role::Reviewer)?;
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let action = state.ladder.comment(stage_id, claims.sub, payload.notes).await?;
    Ok(Json(SuccessResponse::with_data("Comment added", action)))
}

/// Execution-scoped event log, in sequence order
pub async fn list_events(
    State(state): State<SharedState>,
    Extension(_claims): Extension<Claims>,
    Path(execution_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<Vec<GovernanceEvent>>>> {
    let events = state.events.for_execution(execution_id).await;
    Ok(Json(SuccessResponse::with_data(
        format!("{} events", events.len()),
        events,
    )))
}
