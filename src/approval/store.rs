//! Ladder storage
//!
//! Artifacts, stages and the append-only action log live behind a single
//! lock so that one write guard is one transaction: a stage change and its
//! audit row are always committed together, and current-stage re-checks see
//! the state they are about to mutate.

use crate::approval::models::*;
use crate::error::{not_found_error, AppError};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{RwLock, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Default)]
pub struct LadderTables {
    artifacts: HashMap<Uuid, GatedArtifact>,
    stages: HashMap<Uuid, ApprovalStage>,
    /// Artifact ID -> stage IDs ordered by sequence index
    ladders: HashMap<Uuid, Vec<Uuid>>,
    actions: Vec<ApprovalAction>,
}

impl LadderTables {
    pub fn insert_artifact(&mut self, artifact: GatedArtifact) {
        self.artifacts.insert(artifact.id, artifact);
    }

    pub fn artifact(&self, id: Uuid) -> Result<&GatedArtifact, AppError> {
        self.artifacts
            .get(&id)
            .ok_or_else(|| not_found_error(format!("Artifact {} not found", id)))
    }

    pub fn artifact_mut(&mut self, id: Uuid) -> Result<&mut GatedArtifact, AppError> {
        self.artifacts
            .get_mut(&id)
            .ok_or_else(|| not_found_error(format!("Artifact {} not found", id)))
    }

    pub fn stage(&self, id: Uuid) -> Result<&ApprovalStage, AppError> {
        self.stages
            .get(&id)
            .ok_or_else(|| not_found_error(format!("Stage {} not found", id)))
    }

    pub fn stage_mut(&mut self, id: Uuid) -> Result<&mut ApprovalStage, AppError> {
        self.stages
            .get_mut(&id)
            .ok_or_else(|| not_found_error(format!("Stage {} not found", id)))
    }

    pub fn has_ladder(&self, artifact_id: Uuid) -> bool {
        self.ladders.get(&artifact_id).is_some_and(|ids| !ids.is_empty())
    }

    /// Insert a full ladder; stages must already be in sequence order
    pub fn insert_ladder(&mut self, artifact_id: Uuid, stages: Vec<ApprovalStage>) {
        let ids = stages.iter().map(|s| s.id).collect();
        for stage in stages {
            self.stages.insert(stage.id, stage);
        }
        self.ladders.insert(artifact_id, ids);
    }

    /// Stages of one ladder in sequence order
    pub fn ladder_stages(&self, artifact_id: Uuid) -> Vec<&ApprovalStage> {
        self.ladders
            .get(&artifact_id)
            .map(|ids| ids.iter().filter_map(|id| self.stages.get(id)).collect())
            .unwrap_or_default()
    }

    /// First stage after `after_index` that still needs a sign-off
    pub fn next_open_stage(&self, artifact_id: Uuid, after_index: usize) -> Option<Uuid> {
        self.ladder_stages(artifact_id)
            .into_iter()
            .find(|s| s.sequence_index > after_index && s.status != StageStatus::Approved)
            .map(|s| s.id)
    }

    pub fn overdue_stage_ids(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.stages
            .values()
            .filter(|s| s.is_overdue(now) && s.overdue_notified_at.is_none())
            .map(|s| s.id)
            .collect()
    }

    /// Append an audit row; rows are never updated or removed
    pub fn append_action(&mut self, action: ApprovalAction) {
        self.actions.push(action);
    }

    pub fn actions_for(&self, artifact_id: Uuid) -> Vec<ApprovalAction> {
        self.actions
            .iter()
            .filter(|a| a.artifact_id == artifact_id)
            .cloned()
            .collect()
    }

    pub fn ladder_view(&self, artifact_id: Uuid) -> Result<Ladder, AppError> {
        Ok(Ladder {
            artifact: self.artifact(artifact_id)?.clone(),
            stages: self.ladder_stages(artifact_id).into_iter().cloned().collect(),
        })
    }
}

/// Thread-safe ladder store
pub struct LadderStore {
    tables: RwLock<LadderTables>,
}

impl LadderStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(LadderTables::default()),
        }
    }

    /// Open a write transaction
    pub async fn begin(&self) -> RwLockWriteGuard<'_, LadderTables> {
        self.tables.write().await
    }

    pub async fn artifact(&self, id: Uuid) -> Result<GatedArtifact, AppError> {
        let tables = self.tables.read().await;
        tables.artifact(id).cloned()
    }

    pub async fn stage(&self, id: Uuid) -> Result<ApprovalStage, AppError> {
        let tables = self.tables.read().await;
        tables.stage(id).cloned()
    }

    pub async fn ladder(&self, artifact_id: Uuid) -> Result<Ladder, AppError> {
        let tables = self.tables.read().await;
        tables.ladder_view(artifact_id)
    }

    pub async fn actions(&self, artifact_id: Uuid) -> Result<Vec<ApprovalAction>, AppError> {
        let tables = self.tables.read().await;
        tables.artifact(artifact_id)?;
        Ok(tables.actions_for(artifact_id))
    }
}

impl Default for LadderStore {
    fn default() -> Self {
        Self::new()
    }
}
