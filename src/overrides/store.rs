//! Override storage
//!
//! Baselines and override actions share one lock so an override execution
//! and its baseline mutation commit together.

use crate::error::{not_found_error, AppError};
use crate::overrides::models::{GovernanceBaseline, OverrideAction};
use std::collections::HashMap;
use tokio::sync::{RwLock, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Default)]
pub struct OverrideTables {
    baselines: HashMap<Uuid, GovernanceBaseline>,
    actions: HashMap<Uuid, OverrideAction>,
    /// Unique index over (recommendation_id, execution_hash)
    by_key: HashMap<(String, String), Uuid>,
}

impl OverrideTables {
    pub fn insert_baseline(&mut self, baseline: GovernanceBaseline) {
        self.baselines.insert(baseline.id, baseline);
    }

    pub fn baseline(&self, id: Uuid) -> Result<&GovernanceBaseline, AppError> {
        self.baselines
            .get(&id)
            .ok_or_else(|| not_found_error(format!("Baseline {} not found", id)))
    }

    pub fn baseline_mut(&mut self, id: Uuid) -> Result<&mut GovernanceBaseline, AppError> {
        self.baselines
            .get_mut(&id)
            .ok_or_else(|| not_found_error(format!("Baseline {} not found", id)))
    }

    /// Existing row for the idempotency key, if any
    pub fn find(&self, recommendation_id: &str, execution_hash: &str) -> Option<Uuid> {
        self.by_key
            .get(&(recommendation_id.to_string(), execution_hash.to_string()))
            .copied()
    }

    /// Insert unless the key is taken; returns the id of the stored row
    pub fn fetch_or_insert(&mut self, action: OverrideAction) -> Uuid {
        let key = (action.recommendation_id.clone(), action.execution_hash.clone());
        if let Some(existing) = self.by_key.get(&key) {
            return *existing;
        }
        let id = action.id;
        self.by_key.insert(key, id);
        self.actions.insert(id, action);
        id
    }

    pub fn action(&self, id: Uuid) -> Result<&OverrideAction, AppError> {
        self.actions
            .get(&id)
            .ok_or_else(|| not_found_error(format!("Override {} not found", id)))
    }

    pub fn action_mut(&mut self, id: Uuid) -> Result<&mut OverrideAction, AppError> {
        self.actions
            .get_mut(&id)
            .ok_or_else(|| not_found_error(format!("Override {} not found", id)))
    }

    /// Newest row for this recommendation and execution that satisfies
    /// `actionable`, falling back to the newest row of any status so the
    /// caller can report why nothing was actionable
    pub fn target(
        &self,
        recommendation_id: &str,
        execution_id: Uuid,
        actionable: impl Fn(&OverrideAction) -> bool,
    ) -> Option<Uuid> {
        let rows = || {
            self.actions
                .values()
                .filter(move |a| a.recommendation_id == recommendation_id && a.execution_id == execution_id)
        };
        rows()
            .filter(|a| actionable(*a))
            .max_by_key(|a| (a.created_at, a.executed_at))
            .or_else(|| rows().max_by_key(|a| (a.created_at, a.executed_at)))
            .map(|a| a.id)
    }

    /// Latest cooldown expiry recorded against a baseline
    pub fn cooldown_until(&self, baseline_id: Uuid) -> Option<chrono::DateTime<chrono::Utc>> {
        self.actions
            .values()
            .filter(|a| a.baseline_id == Some(baseline_id))
            .filter_map(|a| a.cooldown_expires_at)
            .max()
    }

    /// All rows for a recommendation, oldest first
    pub fn history(&self, recommendation_id: &str) -> Vec<OverrideAction> {
        let mut rows: Vec<_> = self
            .actions
            .values()
            .filter(|a| a.recommendation_id == recommendation_id)
            .cloned()
            .collect();
        rows.sort_by_key(|a| a.created_at);
        rows
    }
}

/// Thread-safe override store
#[derive(Default)]
pub struct OverrideStore {
    tables: RwLock<OverrideTables>,
}

impl OverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a write transaction
    pub async fn begin(&self) -> RwLockWriteGuard<'_, OverrideTables> {
        self.tables.write().await
    }

    pub async fn baseline(&self, id: Uuid) -> Result<GovernanceBaseline, AppError> {
        let tables = self.tables.read().await;
        tables.baseline(id).cloned()
    }

    #[cfg(test)]
    pub async fn action(&self, id: Uuid) -> Result<OverrideAction, AppError> {
        let tables = self.tables.read().await;
        tables.action(id).cloned()
    }

    pub async fn history(&self, recommendation_id: &str) -> Vec<OverrideAction> {
        let tables = self.tables.read().await;
        tables.history(recommendation_id)
    }
}
