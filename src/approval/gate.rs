//! Packaging Guardrail Gate
//!
//! Read-only check the packaging worker runs immediately before every
//! processing attempt, not only at enqueue time: approval can regress between
//! enqueue and dequeue (SLA monitor, reset). A blocked check is expected
//! behaviour and is reported as telemetry, never as an error.

use crate::approval::models::*;
use crate::approval::store::LadderStore;
use crate::clock::SharedClock;
use crate::error::{conflict_error, AppError};
use crate::events::{event_types, EventLog};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Terminal or retry outcome reported by the packaging worker
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PackagingOutcome {
    Ready,
    Retrying,
    Failed,
    Expired,
}

impl From<PackagingOutcome> for ArtifactStatus {
    fn from(outcome: PackagingOutcome) -> Self {
        match outcome {
            PackagingOutcome::Ready => ArtifactStatus::Ready,
            PackagingOutcome::Retrying => ArtifactStatus::Retrying,
            PackagingOutcome::Failed => ArtifactStatus::Failed,
            PackagingOutcome::Expired => ArtifactStatus::Expired,
        }
    }
}

/// Result of a packaging claim
#[derive(Debug, Clone)]
pub enum PackagingClaim {
    /// Artifact moved to `processing`
    Claimed(GatedArtifact),
    /// Approval incomplete; artifact left untouched for a later retry
    Blocked(GatedArtifact),
}

pub struct PackagingGate {
    store: Arc<LadderStore>,
    events: Arc<EventLog>,
    clock: SharedClock,
}

impl PackagingGate {
    pub fn new(store: Arc<LadderStore>, events: Arc<EventLog>, clock: SharedClock) -> Self {
        Self { store, events, clock }
    }

    /// True iff the ladder is fully approved. On false an `awaiting_approval`
    /// event is emitted for the owning execution; `artifact_status` is never
    /// touched here.
    pub async fn verify(&self, artifact: &GatedArtifact) -> bool {
        if artifact.is_release_ready() {
            debug!("Packaging gate open for artifact {}", artifact.id);
            return true;
        }

        let pending = match artifact.current_stage_id {
            Some(stage_id) => self.store.stage(stage_id).await.ok(),
            None => None,
        };

        info!(
            "Packaging blocked for artifact {} (approval {:?}, pending stage {:?})",
            artifact.id,
            artifact.approval_status,
            pending.as_ref().map(|s| s.sequence_index)
        );

        self.events
            .emit(
                artifact.execution_id,
                event_types::AWAITING_APPROVAL,
                None,
                json!({
                    "artifact_id": artifact.id,
                    "approval_status": artifact.approval_status,
                    "artifact_status": artifact.artifact_status,
                    "pending_stage_id": pending.as_ref().map(|s| s.id),
                    "pending_stage_index": pending.as_ref().map(|s| s.sequence_index),
                    "pending_stage_status": pending.as_ref().map(|s| s.status.as_str()),
                    "pending_stage_due_at": pending.as_ref().and_then(|s| s.due_at),
                }),
            )
            .await;

        false
    }

    /// Verify against freshly loaded state
    pub async fn verify_by_id(&self, artifact_id: Uuid) -> Result<bool, AppError> {
        let artifact = self.store.artifact(artifact_id).await?;
        Ok(self.verify(&artifact).await)
    }

    /// Start one packaging attempt. The gate runs first; the transition to
    /// `processing` re-checks approval in the same transaction so a reset
    /// landing between the two cannot slip through.
    pub async fn claim_for_packaging(&self, artifact_id: Uuid) -> Result<PackagingClaim, AppError> {
        let artifact = self.store.artifact(artifact_id).await?;
        if !self.verify(&artifact).await {
            return Ok(PackagingClaim::Blocked(artifact));
        }

        let now = self.clock.now();
        let claimed = {
            let mut tx = self.store.begin().await;
            let artifact = tx.artifact_mut(artifact_id)?;

            if !artifact.is_release_ready() {
                debug!("Approval regressed for artifact {} during claim", artifact_id);
                None
            } else if !artifact.artifact_status.can_start_packaging() {
                return Err(conflict_error(format!(
                    "Artifact {} cannot start packaging from {:?}",
                    artifact_id, artifact.artifact_status
                )));
            } else {
                artifact.artifact_status = ArtifactStatus::Processing;
                artifact.packaging_attempts += 1;
                artifact.updated_at = now;
                let artifact = artifact.clone();
                let recorded = self
                    .events
                    .append(
                        artifact.execution_id,
                        event_types::PACKAGING_CLAIMED,
                        None,
                        json!({
                            "artifact_id": artifact.id,
                            "artifact_status": artifact.artifact_status,
                            "packaging_attempts": artifact.packaging_attempts,
                        }),
                    )
                    .await;
                Some((artifact, recorded))
            }
        };

        let Some((artifact, recorded)) = claimed else {
            let latest = self.store.artifact(artifact_id).await?;
            self.verify(&latest).await;
            return Ok(PackagingClaim::Blocked(latest));
        };

        info!(
            "Artifact {} claimed for packaging (attempt {})",
            artifact.id, artifact.packaging_attempts
        );
        self.events.publish(std::slice::from_ref(&recorded)).await;

        Ok(PackagingClaim::Claimed(artifact))
    }

    /// Record how a packaging attempt ended
    pub async fn record_packaging_outcome(
        &self,
        artifact_id: Uuid,
        outcome: PackagingOutcome,
    ) -> Result<GatedArtifact, AppError> {
        let now = self.clock.now();
        let (artifact, recorded) = {
            let mut tx = self.store.begin().await;
            let artifact = tx.artifact_mut(artifact_id)?;
            if artifact.artifact_status != ArtifactStatus::Processing {
                return Err(conflict_error(format!(
                    "Artifact {} is not being packaged ({:?})",
                    artifact_id, artifact.artifact_status
                )));
            }
            artifact.artifact_status = outcome.into();
            artifact.updated_at = now;
            let artifact = artifact.clone();
            let recorded = self
                .events
                .append(
                    artifact.execution_id,
                    event_types::PACKAGING_OUTCOME,
                    None,
                    json!({
                        "artifact_id": artifact.id,
                        "artifact_status": artifact.artifact_status,
                        "packaging_attempts": artifact.packaging_attempts,
                        "outcome": outcome,
                    }),
                )
                .await;
            (artifact, recorded)
        };

        self.events.publish(std::slice::from_ref(&recorded)).await;

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ladder::tests::{blueprint, setup};
    use pretty_assertions::assert_eq;

    fn gate_for(
        store: &Arc<LadderStore>,
        events: &Arc<EventLog>,
        clock: &Arc<crate::clock::ManualClock>,
    ) -> PackagingGate {
        PackagingGate::new(store.clone(), events.clone(), clock.clone())
    }

    #[tokio::test]
    async fn test_verify_blocks_pending_ladder_without_mutation() {
        let (ladder, store, events, clock) = setup();
        let gate = gate_for(&store, &events, &clock);
        let opened = ladder.open(Uuid::new_v4(), None, &blueprint(2)).await.unwrap();

        assert!(!gate.verify(&opened.artifact).await);

        let after = store.artifact(opened.artifact.id).await.unwrap();
        assert_eq!(after.artifact_status, ArtifactStatus::Queued);

        let blocked = events
            .of_type(opened.artifact.execution_id, event_types::AWAITING_APPROVAL)
            .await;
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].payload["pending_stage_index"], json!(0));
        assert_eq!(blocked[0].payload["pending_stage_status"], json!("in_progress"));
        assert_eq!(blocked[0].payload["pending_stage_id"], json!(opened.stages[0].id));
    }

    #[tokio::test]
    async fn test_claim_requires_full_approval() {
        let (ladder, store, events, clock) = setup();
        let gate = gate_for(&store, &events, &clock);
        let actor = Uuid::new_v4();
        let opened = ladder.open(Uuid::new_v4(), None, &blueprint(2)).await.unwrap();
        let artifact_id = opened.artifact.id;

        assert!(matches!(
            gate.claim_for_packaging(artifact_id).await.unwrap(),
            PackagingClaim::Blocked(_)
        ));

        for stage in &opened.stages {
            ladder.decide(stage.id, actor, Decision::Approve, None, None).await.unwrap();
        }
        assert!(gate.verify_by_id(artifact_id).await.unwrap());

        let PackagingClaim::Claimed(claimed) = gate.claim_for_packaging(artifact_id).await.unwrap() else {
            panic!("expected claim");
        };
        assert_eq!(claimed.artifact_status, ArtifactStatus::Processing);
        assert_eq!(claimed.packaging_attempts, 1);

        // Already processing
        assert!(matches!(
            gate.claim_for_packaging(artifact_id).await,
            Err(AppError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_reset_between_enqueue_and_dequeue_blocks_retry() {
        let (ladder, store, events, clock) = setup();
        let gate = gate_for(&store, &events, &clock);
        let actor = Uuid::new_v4();
        let opened = ladder.open(Uuid::new_v4(), None, &blueprint(1)).await.unwrap();
        let artifact_id = opened.artifact.id;

        ladder.decide(opened.stages[0].id, actor, Decision::Approve, None, None).await.unwrap();
        gate.claim_for_packaging(artifact_id).await.unwrap();
        gate.record_packaging_outcome(artifact_id, PackagingOutcome::Retrying).await.unwrap();

        ladder.reset(opened.stages[0].id, actor, Some("narrative changed".into())).await.unwrap();

        let claim = gate.claim_for_packaging(artifact_id).await.unwrap();
        let PackagingClaim::Blocked(artifact) = claim else {
            panic!("retry must be blocked after reset");
        };
        assert_eq!(artifact.artifact_status, ArtifactStatus::Retrying);
        assert_eq!(artifact.packaging_attempts, 1);
    }

    #[tokio::test]
    async fn test_outcome_only_from_processing() {
        let (ladder, store, events, clock) = setup();
        let gate = gate_for(&store, &events, &clock);
        let opened = ladder.open(Uuid::new_v4(), None, &blueprint(1)).await.unwrap();

        let result = gate
            .record_packaging_outcome(opened.artifact.id, PackagingOutcome::Ready)
            .await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_status_leaves_queued_only_when_released() {
        let (ladder, store, events, clock) = setup();
        let gate = gate_for(&store, &events, &clock);
        let actor = Uuid::new_v4();
        let opened = ladder.open(Uuid::new_v4(), None, &blueprint(3)).await.unwrap();
        let artifact_id = opened.artifact.id;

        for (i, stage) in opened.stages.iter().enumerate() {
            let _ = gate.claim_for_packaging(artifact_id).await.unwrap();
            let artifact = store.artifact(artifact_id).await.unwrap();
            assert_eq!(artifact.artifact_status, ArtifactStatus::Queued, "after {} approvals", i);
            ladder.decide(stage.id, actor, Decision::Approve, None, None).await.unwrap();
        }

        let claim = gate.claim_for_packaging(artifact_id).await.unwrap();
        assert!(matches!(claim, PackagingClaim::Claimed(_)));
    }
}
