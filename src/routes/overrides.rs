//! Governance baseline and override route handlers

use crate::auth::{require_role, Claims, Role};
use crate::error::{validation_error, ApiResult};
use crate::models::SuccessResponse;
use crate::overrides::{
    GovernanceBaseline, LineageInput, OverrideAction, OverrideKind, OverrideRequest,
    ReversalOutcome,
};
use crate::state::SharedState;
use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use validator::Validate;

// ==================== Request/Response Types ====================

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PublishBaselineRequest {
    #[validate(length(min = 1, max = 120, message = "Baseline name must be 1-120 characters"))]
    pub name: String,
    #[serde(default)]
    pub reviewer_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct OverridePayload {
    #[validate(length(min = 1, max = 128))]
    pub recommendation_id: String,
    pub execution_id: Uuid,
    #[validate(length(max = 64))]
    pub rule_key: Option<String>,
    pub action: OverrideKind,
    pub baseline_id: Option<Uuid>,
    pub target_reviewer_id: Option<Uuid>,
    pub lineage: Option<LineageInput>,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

impl OverridePayload {
    fn into_request(self, actor_id: Uuid) -> OverrideRequest {
        OverrideRequest {
            recommendation_id: self.recommendation_id,
            execution_id: self.execution_id,
            rule_key: self.rule_key,
            action: self.action,
            baseline_id: self.baseline_id,
            target_reviewer_id: self.target_reviewer_id,
            lineage: self.lineage,
            actor_id,
            notes: self.notes,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DeclineRequest {
    #[validate(length(min = 1, max = 128))]
    pub recommendation_id: String,
    pub execution_id: Uuid,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReverseRequest {
    #[validate(length(min = 1, max = 128))]
    pub recommendation_id: String,
    pub execution_id: Uuid,
    pub baseline_id: Uuid,
    #[validate(length(max = 4000))]
    pub notes: Option<String>,
    #[validate(range(min = 0, max = 10080, message = "Cooldown must be 0-10080 minutes"))]
    pub cooldown_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReversalResponse {
    pub action: OverrideAction,
    pub baseline: GovernanceBaseline,
    pub reversal: crate::overrides::OverrideReversalEvent,
}

impl From<ReversalOutcome> for ReversalResponse {
    fn from(outcome: ReversalOutcome) -> Self {
        Self {
            action: outcome.action,
            baseline: outcome.baseline,
            reversal: outcome.event,
        }
    }
}

// ==================== Handlers ====================

pub async fn publish_baseline(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<PublishBaselineRequest>,
) -> ApiResult<Json<SuccessResponse<GovernanceBaseline>>> {
    require_role(&claims, Role::Admin)?;
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let baseline = state
        .overrides
        .publish_baseline(payload.name, payload.reviewer_ids)
        .await?;
    Ok(Json(SuccessResponse::with_data("Baseline published", baseline)))
}

pub async fn get_baseline(
    State(state): State<SharedState>,
    Extension(_claims): Extension<Claims>,
    Path(baseline_id): Path<Uuid>,
) -> ApiResult<Json<SuccessResponse<GovernanceBaseline>>> {
    let baseline = state.overrides.baseline(baseline_id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("Baseline v{}", baseline.version),
        baseline,
    )))
}

pub async fn accept_override(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<OverridePayload>,
) -> ApiResult<Json<SuccessResponse<OverrideAction>>> {
    require_role(&claims, Role::Operator)?;
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let action = state.overrides.accept(payload.into_request(claims.sub)).await?;
    Ok(Json(SuccessResponse::with_data("Override accepted", action)))
}

pub async fn execute_override(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<OverridePayload>,
) -> ApiResult<Json<SuccessResponse<OverrideAction>>> {
    require_role(&claims, Role::Operator)?;
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let action = state.overrides.execute(payload.into_request(claims.sub)).await?;
    info!("User {} executed override {}", claims.sub, action.recommendation_id);
    Ok(Json(SuccessResponse::with_data("Override executed", action)))
}

pub async fn decline_override(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<DeclineRequest>,
) -> ApiResult<Json<SuccessResponse<OverrideAction>>> {
    require_role(&claims, Role::Operator)?;
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let action = state
        .overrides
        .decline(&payload.recommendation_id, payload.execution_id, claims.sub, payload.notes)
        .await?;
    Ok(Json(SuccessResponse::with_data("Override declined", action)))
}

pub async fn reverse_override(
    State(state): State<SharedState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ReverseRequest>,
) -> ApiResult<Json<SuccessResponse<ReversalResponse>>> {
    require_role(&claims, Role::Operator)?;
    payload.validate().map_err(|e| validation_error(e.to_string()))?;

    let cooldown = payload
        .cooldown_minutes
        .unwrap_or(state.governance.default_cooldown_minutes);
    let outcome = state
        .overrides
        .reverse(
            &payload.recommendation_id,
            payload.execution_id,
            payload.baseline_id,
            claims.sub,
            payload.notes,
            cooldown,
        )
        .await?;
    Ok(Json(SuccessResponse::with_data(
        "Override reversed",
        ReversalResponse::from(outcome),
    )))
}

pub async fn override_history(
    State(state): State<SharedState>,
    Extension(_claims): Extension<Claims>,
    Path(recommendation_id): Path<String>,
) -> ApiResult<Json<SuccessResponse<Vec<OverrideAction>>>> {
    let history = state.overrides.history(&recommendation_id).await?;
    Ok(Json(SuccessResponse::with_data(
        format!("{} override records", history.len()),
        history,
    )))
}
