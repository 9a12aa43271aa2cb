//! Approval Ladder
//!
//! Owns the per-artifact sequence of approval stages and moves it forward or
//! back on operator decisions. Every mutating call re-checks the ladder's
//! current stage inside the same transaction that performs the transition,
//! so the loser of a race fails with `StageNotCurrent` instead of corrupting
//! the sequence.

use crate::approval::models::*;
use crate::approval::store::{LadderStore, LadderTables};
use crate::clock::SharedClock;
use crate::error::{conflict_error, validation_error, AppError};
use crate::events::{event_types, EventLog, GovernanceEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Result of an approve/reject decision
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionOutcome {
    pub stage: ApprovalStage,
    pub artifact: GatedArtifact,
    /// Stage activated as a consequence of an approval
    pub activated: Option<ApprovalStage>,
}

pub struct ApprovalLadder {
    store: Arc<LadderStore>,
    events: Arc<EventLog>,
    clock: SharedClock,
}

impl ApprovalLadder {
    pub fn new(store: Arc<LadderStore>, events: Arc<EventLog>, clock: SharedClock) -> Self {
        Self { store, events, clock }
    }

    /// Register a queued export awaiting its ladder
    pub async fn register_artifact(
        &self,
        execution_id: Uuid,
        requested_by: Option<Uuid>,
    ) -> Result<GatedArtifact, AppError> {
        let artifact = GatedArtifact::new(execution_id, requested_by, self.clock.now());
        let mut tx = self.store.begin().await;
        tx.insert_artifact(artifact.clone());
        Ok(artifact)
    }

    /// Register an artifact and seed its ladder in one call
    pub async fn open(
        &self,
        execution_id: Uuid,
        requested_by: Option<Uuid>,
        blueprint: &[StageBlueprint],
    ) -> Result<Ladder, AppError> {
        if blueprint.is_empty() {
            return Err(AppError::EmptyBlueprint);
        }
        let artifact = self.register_artifact(execution_id, requested_by).await?;
        self.initialise(artifact.id, blueprint).await
    }

    /// Create the ladder's stages and activate stage 0
    pub async fn initialise(
        &self,
        artifact_id: Uuid,
        blueprint: &[StageBlueprint],
    ) -> Result<Ladder, AppError> {
        if blueprint.is_empty() {
            return Err(AppError::EmptyBlueprint);
        }
        let now = self.clock.now();

        let (ladder, recorded) = {
            let mut tx = self.store.begin().await;
            tx.artifact(artifact_id)?;
            if tx.has_ladder(artifact_id) {
                return Err(conflict_error(format!(
                    "Artifact {} already has an approval ladder",
                    artifact_id
                )));
            }

            let mut stages: Vec<ApprovalStage> = blueprint
                .iter()
                .enumerate()
                .map(|(index, bp)| ApprovalStage::from_blueprint(artifact_id, index, bp))
                .collect();
            stages[0].activate(now);
            let first_id = stages[0].id;
            tx.insert_ladder(artifact_id, stages);

            let artifact = tx.artifact_mut(artifact_id)?;
            artifact.approval_stage_count = blueprint.len();
            artifact.current_stage_id = Some(first_id);
            artifact.approval_status = ApprovalStatus::InProgress;
            artifact.approval_completed_at = None;
            artifact.updated_at = now;

            let ladder = tx.ladder_view(artifact_id)?;
            let mut recorded = Vec::new();
            if let Some(first) = ladder.stages.first() {
                recorded.push(
                    self.events
                        .append(
                            ladder.artifact.execution_id,
                            event_types::STAGE_ACTIVATED,
                            ladder.artifact.requested_by,
                            stage_context(first),
                        )
                        .await,
                );
            }
            (ladder, recorded)
        };

        info!(
            "Initialised {}-stage approval ladder for artifact {}",
            ladder.stages.len(),
            artifact_id
        );

        self.events.publish(&recorded).await;

        Ok(ladder)
    }

    /// Approve or reject the ladder's current stage
    pub async fn decide(
        &self,
        stage_id: Uuid,
        actor_id: Uuid,
        decision: Decision,
        signature: Option<String>,
        notes: Option<String>,
    ) -> Result<DecisionOutcome, AppError> {
        let now = self.clock.now();

        let (outcome, recorded) = {
            let mut tx = self.store.begin().await;
            let (artifact_id, index) = ensure_current(&tx, stage_id)?;

            {
                let stage = tx.stage_mut(stage_id)?;
                stage.status = match decision {
                    Decision::Approve => StageStatus::Approved,
                    Decision::Reject => StageStatus::Rejected,
                };
                stage.completed_at = Some(now);
                if let Value::Object(meta) = &mut stage.metadata {
                    meta.insert("decidedBy".to_string(), json!(actor_id));
                    meta.insert("signed".to_string(), json!(signature.is_some()));
                }
            }

            let activated = match decision {
                Decision::Approve => match tx.next_open_stage(artifact_id, index) {
                    Some(next_id) => {
                        let next = tx.stage_mut(next_id)?;
                        next.activate(now);
                        let next = next.clone();

                        let artifact = tx.artifact_mut(artifact_id)?;
                        artifact.current_stage_id = Some(next_id);
                        artifact.approval_status = ApprovalStatus::InProgress;
                        artifact.updated_at = now;
                        Some(next)
                    }
                    None => {
                        let artifact = tx.artifact_mut(artifact_id)?;
                        artifact.current_stage_id = None;
                        artifact.approval_status = ApprovalStatus::Approved;
                        artifact.approval_completed_at = Some(now);
                        artifact.updated_at = now;
                        None
                    }
                },
                Decision::Reject => {
                    let artifact = tx.artifact_mut(artifact_id)?;
                    artifact.current_stage_id = None;
                    artifact.approval_status = ApprovalStatus::Rejected;
                    artifact.updated_at = now;
                    None
                }
            };

            tx.append_action(ApprovalAction {
                id: Uuid::new_v4(),
                artifact_id,
                stage_id,
                kind: match decision {
                    Decision::Approve => ActionKind::Approve,
                    Decision::Reject => ActionKind::Reject,
                },
                actor_id: Some(actor_id),
                signature,
                notes,
                metadata: json!({ "stageIndex": index }),
                created_at: now,
            });

            let outcome = DecisionOutcome {
                stage: tx.stage(stage_id)?.clone(),
                artifact: tx.artifact(artifact_id)?.clone(),
                activated,
            };
            let recorded = self.record_decision(&outcome, decision, actor_id).await;
            (outcome, recorded)
        };

        info!(
            "Stage {} (#{}) {} by {}; artifact {} now {:?}",
            outcome.stage.name,
            outcome.stage.sequence_index,
            decision.as_str(),
            actor_id,
            outcome.artifact.id,
            outcome.artifact.approval_status
        );

        self.events.publish(&recorded).await;

        Ok(outcome)
    }

    /// Hand the current stage to a delegate without advancing the sequence
    pub async fn delegate(
        &self,
        stage_id: Uuid,
        actor_id: Uuid,
        delegate_id: Uuid,
        due_at: Option<DateTime<Utc>>,
        notes: Option<String>,
    ) -> Result<ApprovalStage, AppError> {
        let now = self.clock.now();
        if due_at.is_some_and(|due| due <= now) {
            return Err(validation_error("Delegated due date must be in the future"));
        }

        let (stage, recorded) = {
            let mut tx = self.store.begin().await;
            let (artifact_id, index) = ensure_current(&tx, stage_id)?;

            let stage = tx.stage_mut(stage_id)?;
            stage.status = StageStatus::Delegated;
            stage.delegated_to_id = Some(delegate_id);
            if let Some(due) = due_at {
                stage.due_at = Some(due);
                stage.overdue_notified_at = None;
            }
            let stage = stage.clone();

            tx.append_action(ApprovalAction {
                id: Uuid::new_v4(),
                artifact_id,
                stage_id,
                kind: ActionKind::Delegate,
                actor_id: Some(actor_id),
                signature: None,
                notes,
                metadata: json!({ "stageIndex": index, "delegateId": delegate_id }),
                created_at: now,
            });

            let artifact = tx.artifact_mut(artifact_id)?;
            artifact.updated_at = now;
            let execution_id = artifact.execution_id;

            let mut context = stage_context(&stage);
            context["delegated_to_id"] = json!(delegate_id);
            let recorded = self
                .events
                .append(execution_id, event_types::STAGE_DELEGATED, Some(actor_id), context)
                .await;
            (stage, recorded)
        };

        info!("Stage {} delegated to {} by {}", stage.id, delegate_id, actor_id);
        self.events.publish(std::slice::from_ref(&recorded)).await;

        Ok(stage)
    }

    /// Return a stage to `in_progress` and make it current again.
    ///
    /// Forward-only: approved stages after the target keep their sign-off and
    /// are skipped when the sequence advances again. A stage displaced as
    /// current is parked as `reset` and re-activated in order.
    pub async fn reset(
        &self,
        stage_id: Uuid,
        actor_id: Uuid,
        notes: Option<String>,
    ) -> Result<Ladder, AppError> {
        let now = self.clock.now();

        let (ladder, recorded) = {
            let mut tx = self.store.begin().await;
            let target = tx.stage(stage_id)?.clone();
            let artifact_id = target.artifact_id;

            let blocked_by = tx
                .ladder_stages(artifact_id)
                .into_iter()
                .find(|s| s.sequence_index < target.sequence_index && s.status != StageStatus::Approved)
                .map(|s| s.sequence_index);
            if let Some(index) = blocked_by {
                return Err(conflict_error(format!(
                    "Cannot reset stage #{} while stage #{} is not approved",
                    target.sequence_index, index
                )));
            }

            let displaced = tx
                .artifact(artifact_id)?
                .current_stage_id
                .filter(|id| *id != stage_id);
            if let Some(displaced_id) = displaced {
                tx.stage_mut(displaced_id)?.status = StageStatus::Reset;
            }

            tx.stage_mut(stage_id)?.activate(now);

            let artifact = tx.artifact_mut(artifact_id)?;
            artifact.current_stage_id = Some(stage_id);
            artifact.approval_status = ApprovalStatus::Pending;
            artifact.approval_completed_at = None;
            artifact.updated_at = now;

            tx.append_action(ApprovalAction {
                id: Uuid::new_v4(),
                artifact_id,
                stage_id,
                kind: ActionKind::Reset,
                actor_id: Some(actor_id),
                signature: None,
                notes,
                metadata: json!({
                    "stageIndex": target.sequence_index,
                    "previousStatus": target.status,
                    "displacedStageId": displaced,
                }),
                created_at: now,
            });

            let ladder = tx.ladder_view(artifact_id)?;
            let mut recorded = Vec::new();
            if let Some(stage) = ladder.current_stage() {
                let mut context = stage_context(stage);
                context["approval_status"] = json!(ladder.artifact.approval_status);
                context["displaced_stage_id"] = json!(displaced);
                recorded.push(
                    self.events
                        .append(ladder.artifact.execution_id, event_types::STAGE_RESET, Some(actor_id), context)
                        .await,
                );
            }
            (ladder, recorded)
        };

        info!("Stage {} reset by {}; artifact {} back to pending", stage_id, actor_id, ladder.artifact.id);
        self.events.publish(&recorded).await;

        Ok(ladder)
    }

    /// Attach a note to a stage without changing its state
    pub async fn comment(
        &self,
        stage_id: Uuid,
        actor_id: Uuid,
        notes: String,
    ) -> Result<ApprovalAction, AppError> {
        if notes.trim().is_empty() {
            return Err(validation_error("Comment must not be empty"));
        }
        let now = self.clock.now();

        let (action, recorded) = {
            let mut tx = self.store.begin().await;
            let stage = tx.stage(stage_id)?.clone();
            let execution_id = tx.artifact(stage.artifact_id)?.execution_id;

            let action = ApprovalAction {
                id: Uuid::new_v4(),
                artifact_id: stage.artifact_id,
                stage_id,
                kind: ActionKind::Comment,
                actor_id: Some(actor_id),
                signature: None,
                notes: Some(notes),
                metadata: json!({ "stageIndex": stage.sequence_index }),
                created_at: now,
            };
            tx.append_action(action.clone());
            let recorded = self
                .events
                .append(execution_id, event_types::COMMENT_ADDED, Some(actor_id), stage_context(&stage))
                .await;
            (action, recorded)
        };

        self.events.publish(std::slice::from_ref(&recorded)).await;

        Ok(action)
    }

    pub async fn ladder(&self, artifact_id: Uuid) -> Result<Ladder, AppError> {
        self.store.ladder(artifact_id).await
    }

    pub async fn actions(&self, artifact_id: Uuid) -> Result<Vec<ApprovalAction>, AppError> {
        self.store.actions(artifact_id).await
    }

    pub async fn stage(&self, stage_id: Uuid) -> Result<ApprovalStage, AppError> {
        self.store.stage(stage_id).await
    }

    /// Append the events of one decision; called inside its transaction
    async fn record_decision(
        &self,
        outcome: &DecisionOutcome,
        decision: Decision,
        actor_id: Uuid,
    ) -> Vec<GovernanceEvent> {
        let execution_id = outcome.artifact.execution_id;
        let mut context = stage_context(&outcome.stage);
        context["decision"] = json!(decision.as_str());
        context["approval_status"] = json!(outcome.artifact.approval_status);
        let event_type = match decision {
            Decision::Approve => event_types::STAGE_APPROVED,
            Decision::Reject => event_types::STAGE_REJECTED,
        };

        let mut recorded = vec![
            self.events
                .append(execution_id, event_type, Some(actor_id), context)
                .await,
        ];

        if let Some(next) = &outcome.activated {
            recorded.push(
                self.events
                    .append(execution_id, event_types::STAGE_ACTIVATED, Some(actor_id), stage_context(next))
                    .await,
            );
        } else if outcome.artifact.approval_status == ApprovalStatus::Approved {
            recorded.push(
                self.events
                    .append(
                        execution_id,
                        event_types::LADDER_COMPLETED,
                        Some(actor_id),
                        json!({
                            "artifact_id": outcome.artifact.id,
                            "approval_status": outcome.artifact.approval_status,
                        }),
                    )
                    .await,
            );
        }
        recorded
    }
}

/// The target must be the ladder's current, active stage
fn ensure_current(tables: &LadderTables, stage_id: Uuid) -> Result<(Uuid, usize), AppError> {
    let stage = tables.stage(stage_id)?;
    let artifact = tables.artifact(stage.artifact_id)?;
    if artifact.current_stage_id != Some(stage_id) || !stage.status.is_active() {
        return Err(AppError::StageNotCurrent { stage_id });
    }
    Ok((artifact.id, stage.sequence_index))
}

pub(crate) fn stage_context(stage: &ApprovalStage) -> Value {
    json!({
        "artifact_id": stage.artifact_id,
        "stage_id": stage.id,
        "stage_index": stage.sequence_index,
        "stage_name": stage.name,
        "required_role": stage.required_role,
        "due_at": stage.due_at,
    })
}
