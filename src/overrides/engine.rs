//! Override Action Engine
//!
//! Accept, execute and reverse corrective actions against governance
//! baselines. Execution is idempotent on `(recommendation_id,
//! execution_hash)`; reversal is serialised by an advisory lock with expiry
//! and rate-limited by a per-baseline cooldown.

use crate::clock::SharedClock;
use crate::error::{conflict_error, validation_error, AppError};
use crate::events::{event_types, EventLog, GovernanceEvent};
use crate::overrides::hashing::execution_hash;
use crate::overrides::models::*;
use crate::overrides::store::{OverrideStore, OverrideTables};
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Rule key and baseline reference, e.g. `sla-breach:4f1c...`
static RECOMMENDATION_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.:\-]{0,127}$").expect("valid regex"));

const REVERSAL_LOCK_TIER: &str = "override_reversal";

/// One week
pub const MAX_COOLDOWN_MINUTES: i64 = 10_080;

/// Result of a successful reversal
#[derive(Debug, Clone)]
pub struct ReversalOutcome {
    pub action: OverrideAction,
    pub baseline: GovernanceBaseline,
    pub event: OverrideReversalEvent,
}

pub struct OverrideEngine {
    store: Arc<OverrideStore>,
    events: Arc<EventLog>,
    clock: SharedClock,
    lock_ttl: Duration,
}

impl OverrideEngine {
    pub fn new(
        store: Arc<OverrideStore>,
        events: Arc<EventLog>,
        clock: SharedClock,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            store,
            events,
            clock,
            lock_ttl,
        }
    }

    /// Publish a new baseline at version 1
    pub async fn publish_baseline(
        &self,
        name: String,
        reviewer_ids: Vec<Uuid>,
    ) -> Result<GovernanceBaseline, AppError> {
        if name.trim().is_empty() {
            return Err(validation_error("Baseline name must not be empty"));
        }
        let mut reviewers = Vec::with_capacity(reviewer_ids.len());
        for reviewer in reviewer_ids {
            if !reviewers.contains(&reviewer) {
                reviewers.push(reviewer);
            }
        }

        let baseline = GovernanceBaseline {
            id: Uuid::new_v4(),
            name,
            reviewer_ids: reviewers,
            status: BaselineStatus::Published,
            version: 1,
            updated_at: self.clock.now(),
        };

        let mut tx = self.store.begin().await;
        tx.insert_baseline(baseline.clone());
        info!("📐 Published baseline '{}' ({})", baseline.name, baseline.id);
        Ok(baseline)
    }

    pub async fn baseline(&self, id: Uuid) -> Result<GovernanceBaseline, AppError> {
        self.store.baseline(id).await
    }

    /// Record an operator's acceptance. No baseline mutation.
    pub async fn accept(&self, request: OverrideRequest) -> Result<OverrideAction, AppError> {
        validate_request(&request)?;
        let hash = hash_request(&request);
        let now = self.clock.now();

        let (action, recorded) = {
            let mut tx = self.store.begin().await;
            if let Some(baseline_id) = request.baseline_id {
                tx.baseline(baseline_id)?;
            }
            match tx.find(&request.recommendation_id, &hash) {
                Some(existing) => (tx.action(existing)?.clone(), None),
                None => {
                    let action = new_action(request, hash, now)?;
                    tx.fetch_or_insert(action.clone());
                    let recorded = self
                        .events
                        .append(
                            action.execution_id,
                            event_types::OVERRIDE_ACCEPTED,
                            Some(action.actor_id),
                            override_context(&action),
                        )
                        .await;
                    (action, Some(recorded))
                }
            }
        };

        if let Some(recorded) = recorded {
            info!(
                "Override {} accepted ({} on {:?})",
                action.recommendation_id,
                action.action.as_str(),
                action.baseline_id
            );
            self.events.publish(std::slice::from_ref(&recorded)).await;
        }

        Ok(action)
    }

    /// Apply the override to its baseline.
    ///
    /// Calling again with identical inputs returns the executed row unchanged
    /// and emits nothing.
    pub async fn execute(&self, request: OverrideRequest) -> Result<OverrideAction, AppError> {
        validate_request(&request)?;
        let hash = hash_request(&request);
        let now = self.clock.now();
        let actor_id = request.actor_id;

        let (action, baseline_version, recorded) = {
            let mut tx = self.store.begin().await;

            let id = match tx.find(&request.recommendation_id, &hash) {
                Some(existing) => existing,
                None => {
                    if let Some(baseline_id) = request.baseline_id {
                        tx.baseline(baseline_id)?;
                    }
                    tx.fetch_or_insert(new_action(request, hash, now)?)
                }
            };

            let existing = tx.action(id)?.clone();
            match existing.status {
                OverrideStatus::Executed => return Ok(existing),
                OverrideStatus::Declined | OverrideStatus::Reversed => {
                    return Err(conflict_error(format!(
                        "Override {} is {:?} and cannot be executed",
                        existing.recommendation_id, existing.status
                    )));
                }
                OverrideStatus::Accepted => {}
            }

            let baseline_id = existing
                .baseline_id
                .ok_or_else(|| validation_error("Override has no baseline to act on"))?;
            let baseline = tx.baseline_mut(baseline_id)?;
            let prior = baseline.fields();
            let applied = prior.with_override(existing.action, existing.target_reviewer_id);
            baseline.apply(&applied, now);
            let baseline_version = baseline.version;

            let action = tx.action_mut(id)?;
            action.status = OverrideStatus::Executed;
            action.reversible = true;
            action.prior_state = Some(prior);
            action.applied_state = Some(applied);
            action.executed_at = Some(now);
            action.updated_at = now;
            let action = action.clone();

            let mut context = override_context(&action);
            context["baseline_version"] = json!(baseline_version);
            let recorded = self
                .events
                .append(action.execution_id, event_types::OVERRIDE_EXECUTED, Some(actor_id), context)
                .await;
            (action, baseline_version, recorded)
        };

        info!(
            "⚙️  Override {} executed; baseline {:?} now v{}",
            action.recommendation_id, action.baseline_id, baseline_version
        );
        self.events.publish(std::slice::from_ref(&recorded)).await;

        Ok(action)
    }

    /// Decline an accepted override. When several rows share the
    /// recommendation and execution, the newest accepted one is declined.
    pub async fn decline(
        &self,
        recommendation_id: &str,
        execution_id: Uuid,
        actor_id: Uuid,
        notes: Option<String>,
    ) -> Result<OverrideAction, AppError> {
        let now = self.clock.now();

        let (action, recorded) = {
            let mut tx = self.store.begin().await;
            let id = tx
                .target(recommendation_id, execution_id, |a| a.status == OverrideStatus::Accepted)
                .ok_or_else(|| not_found(recommendation_id))?;
            let action = tx.action_mut(id)?;
            match action.status {
                OverrideStatus::Declined => return Ok(action.clone()),
                OverrideStatus::Accepted => {}
                other => {
                    return Err(conflict_error(format!(
                        "Override {} is {:?} and cannot be declined",
                        recommendation_id, other
                    )));
                }
            }
            action.status = OverrideStatus::Declined;
            if notes.is_some() {
                action.notes = notes;
            }
            action.updated_at = now;
            let action = action.clone();

            let recorded = self
                .events
                .append(
                    execution_id,
                    event_types::OVERRIDE_DECLINED,
                    Some(actor_id),
                    override_context(&action),
                )
                .await;
            (action, recorded)
        };

        self.events.publish(std::slice::from_ref(&recorded)).await;

        Ok(action)
    }

    /// Undo an executed override, restoring the baseline fields it replaced.
    /// When several executed rows share the recommendation and execution, the
    /// newest still-reversible one on `baseline_id` is undone first.
    pub async fn reverse(
        &self,
        recommendation_id: &str,
        execution_id: Uuid,
        baseline_id: Uuid,
        actor_id: Uuid,
        notes: Option<String>,
        cooldown_minutes: i64,
    ) -> Result<ReversalOutcome, AppError> {
        if !(0..=MAX_COOLDOWN_MINUTES).contains(&cooldown_minutes) {
            return Err(validation_error(format!(
                "Cooldown must be between 0 and {} minutes",
                MAX_COOLDOWN_MINUTES
            )));
        }

        let (id, token) = self
            .acquire_reversal_lock(recommendation_id, execution_id, baseline_id, actor_id)
            .await?;

        let (outcome, recorded) = match self
            .apply_reversal(id, token, baseline_id, actor_id, notes, cooldown_minutes)
            .await
        {
            Ok(applied) => applied,
            Err(err) => {
                warn!("Reversal of {} failed, releasing lock: {}", recommendation_id, err);
                self.release_reversal_lock(id, token).await;
                return Err(err);
            }
        };

        info!(
            "↩️  Override {} reversed by {}; baseline {} back to v{} ({} fields)",
            recommendation_id,
            actor_id,
            baseline_id,
            outcome.baseline.version,
            outcome.event.diffs.len()
        );
        self.events.publish(std::slice::from_ref(&recorded)).await;

        Ok(outcome)
    }

    /// Every override row recorded for a recommendation
    pub async fn history(&self, recommendation_id: &str) -> Result<Vec<OverrideAction>, AppError> {
        let rows = self.store.history(recommendation_id).await;
        if rows.is_empty() {
            return Err(not_found(recommendation_id));
        }
        Ok(rows)
    }

    /// Check reversibility, lock and cooldown, then take the lock, all in one
    /// transaction
    async fn acquire_reversal_lock(
        &self,
        recommendation_id: &str,
        execution_id: Uuid,
        baseline_id: Uuid,
        actor_id: Uuid,
    ) -> Result<(Uuid, Uuid), AppError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await;

        let id = tx
            .target(recommendation_id, execution_id, |a| {
                a.status == OverrideStatus::Executed
                    && a.reversible
                    && a.baseline_id == Some(baseline_id)
            })
            .ok_or_else(|| not_found(recommendation_id))?;
        let action = tx.action(id)?;

        if action.baseline_id != Some(baseline_id) {
            return Err(validation_error(format!(
                "Override {} does not target baseline {}",
                recommendation_id, baseline_id
            )));
        }
        if !action.reversible || action.status != OverrideStatus::Executed {
            return Err(AppError::NotReversible {
                recommendation_id: recommendation_id.to_string(),
            });
        }
        if action.is_locked(now, self.lock_ttl) {
            return Err(AppError::AlreadyLocked {
                recommendation_id: recommendation_id.to_string(),
            });
        }
        if let Some(until) = tx.cooldown_until(baseline_id).filter(|until| *until > now) {
            return Err(AppError::CoolingDown { baseline_id, until });
        }

        let token = Uuid::new_v4();
        let action = tx.action_mut(id)?;
        action.reversal_lock_token = Some(token);
        action.reversal_lock_tier = Some(REVERSAL_LOCK_TIER.to_string());
        action.reversal_lock_scope = Some(format!("baseline:{}", baseline_id));
        action.reversal_lock_actor_id = Some(actor_id);
        action.reversal_lock_acquired_at = Some(now);
        Ok((id, token))
    }

    /// Restore prior fields, record the reversal and release the lock. The
    /// `override.reversed` event is sequenced inside the same transaction and
    /// handed back for publishing.
    async fn apply_reversal(
        &self,
        id: Uuid,
        token: Uuid,
        baseline_id: Uuid,
        actor_id: Uuid,
        notes: Option<String>,
        cooldown_minutes: i64,
    ) -> Result<(ReversalOutcome, GovernanceEvent), AppError> {
        let now = self.clock.now();
        let mut tx = self.store.begin().await;

        let action = tx.action(id)?;
        ensure_lock_holder(action, token)?;
        let (prior, applied) = match (&action.prior_state, &action.applied_state) {
            (Some(prior), Some(applied)) => (prior.clone(), applied.clone()),
            _ => {
                return Err(AppError::NotReversible {
                    recommendation_id: action.recommendation_id.clone(),
                })
            }
        };

        let diffs = prior.diff(&applied);
        let baseline = restore_fields(&mut tx, baseline_id, &prior, &diffs, now)?;

        let event = OverrideReversalEvent {
            id: Uuid::new_v4(),
            diffs,
            actor_id,
            notes: notes.clone(),
            cooldown_expires_at: now + Duration::minutes(cooldown_minutes),
            created_at: now,
        };

        let action = tx.action_mut(id)?;
        action.status = OverrideStatus::Reversed;
        action.reversible = false;
        action.reversed_at = Some(now);
        action.cooldown_expires_at = Some(event.cooldown_expires_at);
        action.cooldown_window_minutes = Some(cooldown_minutes);
        if notes.is_some() {
            action.notes = notes;
        }
        action.reversal_events.push(event.clone());
        action.release_lock();
        action.updated_at = now;
        let action = action.clone();

        let mut context = override_context(&action);
        context["reversal"] = json!(true);
        context["baseline_version"] = json!(baseline.version);
        context["diff_keys"] = json!(event.diffs.iter().map(|d| &d.key).collect::<Vec<_>>());
        context["cooldown_expires_at"] = json!(event.cooldown_expires_at);
        let recorded = self
            .events
            .append(action.execution_id, event_types::OVERRIDE_REVERSED, Some(actor_id), context)
            .await;

        Ok((
            ReversalOutcome {
                action,
                baseline,
                event,
            },
            recorded,
        ))
    }

    async fn release_reversal_lock(&self, id: Uuid, token: Uuid) {
        let mut tx = self.store.begin().await;
        if let Ok(action) = tx.action_mut(id) {
            if action.reversal_lock_token == Some(token) {
                action.release_lock();
            }
        }
    }
}

/// Put back only the fields the override changed
fn restore_fields(
    tx: &mut OverrideTables,
    baseline_id: Uuid,
    prior: &BaselineFields,
    diffs: &[FieldDiff],
    now: DateTime<Utc>,
) -> Result<GovernanceBaseline, AppError> {
    let baseline = tx.baseline_mut(baseline_id)?;
    let mut restored = baseline.fields();
    for diff in diffs {
        match diff.key.as_str() {
            "reviewer_ids" => restored.reviewer_ids = prior.reviewer_ids.clone(),
            "status" => restored.status = prior.status,
            _ => {}
        }
    }
    baseline.apply(&restored, now);
    Ok(baseline.clone())
}

fn ensure_lock_holder(action: &OverrideAction, token: Uuid) -> Result<(), AppError> {
    if action.reversal_lock_token != Some(token) {
        return Err(AppError::AlreadyLocked {
            recommendation_id: action.recommendation_id.clone(),
        });
    }
    Ok(())
}

fn validate_request(request: &OverrideRequest) -> Result<(), AppError> {
    if !RECOMMENDATION_ID.is_match(&request.recommendation_id) {
        return Err(validation_error(format!(
            "Invalid recommendation id '{}'",
            request.recommendation_id
        )));
    }
    if request.baseline_id.is_none() {
        return Err(validation_error(format!(
            "{} overrides require a baseline_id",
            request.action.as_str()
        )));
    }
    if request.action == OverrideKind::Reassign && request.target_reviewer_id.is_none() {
        return Err(validation_error("reassign overrides require a target_reviewer_id"));
    }
    Ok(())
}

fn hash_request(request: &OverrideRequest) -> String {
    execution_hash(
        &request.recommendation_id,
        request.execution_id,
        request.action,
        request.baseline_id,
        request.target_reviewer_id,
    )
}

fn new_action(
    request: OverrideRequest,
    execution_hash: String,
    now: DateTime<Utc>,
) -> Result<OverrideAction, AppError> {
    let lineage = request
        .lineage
        .filter(|l| !l.is_empty())
        .ok_or_else(|| validation_error("Override lineage (scenario or notebook) is required"))?;

    Ok(OverrideAction {
        id: Uuid::new_v4(),
        execution_id: request.execution_id,
        recommendation_id: request.recommendation_id,
        rule_key: request.rule_key,
        action: request.action,
        status: OverrideStatus::Accepted,
        baseline_id: request.baseline_id,
        target_reviewer_id: request.target_reviewer_id,
        actor_id: request.actor_id,
        notes: request.notes,
        reversible: false,
        execution_hash,
        prior_state: None,
        applied_state: None,
        reversal_lock_token: None,
        reversal_lock_tier: None,
        reversal_lock_scope: None,
        reversal_lock_actor_id: None,
        reversal_lock_acquired_at: None,
        cooldown_expires_at: None,
        cooldown_window_minutes: None,
        lineage: Some(lineage.capture(now)),
        reversal_events: Vec::new(),
        executed_at: None,
        reversed_at: None,
        created_at: now,
        updated_at: now,
    })
}

fn override_context(action: &OverrideAction) -> Value {
    json!({
        "override_id": action.id,
        "recommendation_id": action.recommendation_id,
        "action": action.action.as_str(),
        "baseline_id": action.baseline_id,
        "target_reviewer_id": action.target_reviewer_id,
        "execution_hash": action.execution_hash,
    })
}

fn not_found(recommendation_id: &str) -> AppError {
    AppError::NotFound(format!("No override recorded for {}", recommendation_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use pretty_assertions::assert_eq;
    use tokio_test::assert_ok;

    struct Harness {
        engine: Arc<OverrideEngine>,
        store: Arc<OverrideStore>,
        events: Arc<EventLog>,
        clock: Arc<ManualClock>,
        baseline: GovernanceBaseline,
        reviewer: Uuid,
    }

    async fn harness() -> Harness {
        let clock = ManualClock::new(Utc::now());
        let events = Arc::new(EventLog::new(clock.clone()));
        let store = Arc::new(OverrideStore::new());
        let engine = Arc::new(OverrideEngine::new(
            store.clone(),
            events.clone(),
            clock.clone(),
            Duration::minutes(5),
        ));
        let reviewer = Uuid::new_v4();
        let baseline = engine
            .publish_baseline("Assay release".to_string(), vec![reviewer])
            .await
            .unwrap();
        Harness {
            engine,
            store,
            events,
            clock,
            baseline,
            reviewer,
        }
    }

    fn request(baseline_id: Uuid, execution_id: Uuid, action: OverrideKind) -> OverrideRequest {
        OverrideRequest {
            recommendation_id: format!("sla-breach:{}", baseline_id),
            execution_id,
            rule_key: Some("sla-breach".to_string()),
            action,
            baseline_id: Some(baseline_id),
            target_reviewer_id: match action {
                OverrideKind::Reassign => Some(Uuid::new_v4()),
                _ => None,
            },
            lineage: Some(LineageInput {
                scenario_id: Some(Uuid::new_v4()),
                scenario_snapshot: Some(json!({ "queueDepth": 14 })),
                ..Default::default()
            }),
            actor_id: Uuid::new_v4(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_accept_requires_lineage_and_targets() {
        let h = harness().await;
        let execution_id = Uuid::new_v4();

        let mut missing_lineage = request(h.baseline.id, execution_id, OverrideKind::Cooldown);
        missing_lineage.lineage = Some(LineageInput::default());
        assert!(matches!(
            h.engine.accept(missing_lineage).await,
            Err(AppError::Validation(_))
        ));

        let mut missing_target = request(h.baseline.id, execution_id, OverrideKind::Reassign);
        missing_target.target_reviewer_id = None;
        assert!(matches!(
            h.engine.accept(missing_target).await,
            Err(AppError::Validation(_))
        ));

        let mut bad_id = request(h.baseline.id, execution_id, OverrideKind::Cooldown);
        bad_id.recommendation_id = "drop table; --".to_string();
        assert!(h.engine.accept(bad_id).await.is_err());

        let accepted = h
            .engine
            .accept(request(h.baseline.id, execution_id, OverrideKind::Cooldown))
            .await
            .unwrap();
        assert_eq!(accepted.status, OverrideStatus::Accepted);
        assert!(accepted.lineage.is_some());
        // Acceptance leaves the baseline alone
        assert_eq!(h.engine.baseline(h.baseline.id).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_execute_is_idempotent() {
        let h = harness().await;
        let execution_id = Uuid::new_v4();
        let req = request(h.baseline.id, execution_id, OverrideKind::Reassign);

        let first = h.engine.execute(req.clone()).await.unwrap();
        let baseline_after_first = h.engine.baseline(h.baseline.id).await.unwrap();
        let second = h.engine.execute(req).await.unwrap();
        let baseline_after_second = h.engine.baseline(h.baseline.id).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, OverrideStatus::Executed);
        assert_eq!(baseline_after_first.version, 2);
        assert_eq!(baseline_after_second.version, 2);
        assert_eq!(baseline_after_first.reviewer_ids, baseline_after_second.reviewer_ids);
        assert_eq!(baseline_after_second.reviewer_ids.len(), 2);
        assert_eq!(
            h.events.of_type(execution_id, event_types::OVERRIDE_EXECUTED).await.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_accept_then_execute_reuses_row() {
        let h = harness().await;
        let execution_id = Uuid::new_v4();
        let req = request(h.baseline.id, execution_id, OverrideKind::Escalate);

        let accepted = h.engine.accept(req.clone()).await.unwrap();
        let executed = h.engine.execute(req).await.unwrap();

        assert_eq!(accepted.id, executed.id);
        let baseline = h.engine.baseline(h.baseline.id).await.unwrap();
        assert_eq!(baseline.status, BaselineStatus::Escalated);
        assert_eq!(h.engine.history(&accepted.recommendation_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_declined_override_cannot_execute() {
        let h = harness().await;
        let execution_id = Uuid::new_v4();
        let req = request(h.baseline.id, execution_id, OverrideKind::Cooldown);

        h.engine.accept(req.clone()).await.unwrap();
        let declined = h
            .engine
            .decline(&req.recommendation_id, execution_id, req.actor_id, Some("not now".into()))
            .await
            .unwrap();
        assert_eq!(declined.status, OverrideStatus::Declined);

        assert!(matches!(h.engine.execute(req).await, Err(AppError::Conflict(_))));
        assert_eq!(h.engine.baseline(h.baseline.id).await.unwrap().status, BaselineStatus::Published);
    }

    #[tokio::test]
    async fn test_reverse_restores_prior_values() {
        let h = harness().await;
        let execution_id = Uuid::new_v4();
        let mut req = request(h.baseline.id, execution_id, OverrideKind::Escalate);
        req.target_reviewer_id = Some(Uuid::new_v4());

        let before = h.engine.baseline(h.baseline.id).await.unwrap();
        h.engine.execute(req.clone()).await.unwrap();
        let executed = h.engine.baseline(h.baseline.id).await.unwrap();

        let outcome = h
            .engine
            .reverse(&req.recommendation_id, execution_id, h.baseline.id, req.actor_id, None, 30)
            .await
            .unwrap();
        let after = h.engine.baseline(h.baseline.id).await.unwrap();

        assert_eq!(after.reviewer_ids, before.reviewer_ids);
        assert_eq!(after.reviewer_ids, vec![h.reviewer]);
        assert_eq!(after.status, before.status);
        assert_eq!(after.version, 3);

        let current = serde_json::to_value(&after).unwrap();
        let post_execute = serde_json::to_value(&executed).unwrap();
        let camel = |key: &str| match key {
            "reviewer_ids" => "reviewerIds".to_string(),
            other => other.to_string(),
        };
        assert_eq!(outcome.event.diffs.len(), 2);
        for diff in &outcome.event.diffs {
            assert_eq!(diff.before, current[camel(&diff.key)]);
            assert_eq!(diff.after, post_execute[camel(&diff.key)]);
        }

        assert_eq!(outcome.action.status, OverrideStatus::Reversed);
        assert!(outcome.action.reversal_lock_token.is_none());
        assert_eq!(
            outcome.event.cooldown_expires_at,
            h.clock.now() + Duration::minutes(30)
        );

        let reversed = h.events.of_type(execution_id, event_types::OVERRIDE_REVERSED).await;
        assert_eq!(reversed.len(), 1);
        assert_eq!(reversed[0].payload["reversal"], json!(true));

        // Terminal
        assert!(matches!(
            h.engine
                .reverse(&req.recommendation_id, execution_id, h.baseline.id, req.actor_id, None, 30)
                .await,
            Err(AppError::NotReversible { .. })
        ));
    }

    #[tokio::test]
    async fn test_accepted_override_is_not_reversible() {
        let h = harness().await;
        let execution_id = Uuid::new_v4();
        let req = request(h.baseline.id, execution_id, OverrideKind::Cooldown);
        h.engine.accept(req.clone()).await.unwrap();

        assert!(matches!(
            h.engine
                .reverse(&req.recommendation_id, execution_id, h.baseline.id, req.actor_id, None, 0)
                .await,
            Err(AppError::NotReversible { .. })
        ));
    }

    #[tokio::test]
    async fn test_held_lock_blocks_reversal_until_expiry() {
        let h = harness().await;
        let execution_id = Uuid::new_v4();
        let req = request(h.baseline.id, execution_id, OverrideKind::Cooldown);
        let executed = h.engine.execute(req.clone()).await.unwrap();

        {
            let mut tx = h.store.begin().await;
            let action = tx.action_mut(executed.id).unwrap();
            action.reversal_lock_token = Some(Uuid::new_v4());
            action.reversal_lock_acquired_at = Some(h.clock.now());
        }

        let blocked = h
            .engine
            .reverse(&req.recommendation_id, execution_id, h.baseline.id, req.actor_id, None, 0)
            .await;
        assert!(matches!(blocked, Err(AppError::AlreadyLocked { .. })));
        // The failed attempt must not have touched the foreign lock or baseline
        assert!(h.store.action(executed.id).await.unwrap().reversal_lock_token.is_some());
        assert_eq!(h.engine.baseline(h.baseline.id).await.unwrap().status, BaselineStatus::CoolingDown);

        h.clock.advance(Duration::minutes(6));
        assert_ok!(
            h.engine
                .reverse(&req.recommendation_id, execution_id, h.baseline.id, req.actor_id, None, 0)
                .await
        );
    }

    #[tokio::test]
    async fn test_second_reverser_is_locked_out_while_first_holds_lock() {
        let h = harness().await;
        let execution_id = Uuid::new_v4();
        let req = request(h.baseline.id, execution_id, OverrideKind::Cooldown);
        h.engine.execute(req.clone()).await.unwrap();

        // First reverser takes the lock and stalls before applying
        let holder = Uuid::new_v4();
        let (id, token) = h
            .engine
            .acquire_reversal_lock(&req.recommendation_id, execution_id, h.baseline.id, holder)
            .await
            .unwrap();

        let rival = Uuid::new_v4();
        assert!(matches!(
            h.engine
                .reverse(&req.recommendation_id, execution_id, h.baseline.id, rival, None, 10)
                .await,
            Err(AppError::AlreadyLocked { .. })
        ));
        assert!(matches!(
            h.engine
                .apply_reversal(id, Uuid::new_v4(), h.baseline.id, rival, None, 10)
                .await,
            Err(AppError::AlreadyLocked { .. })
        ));
        assert_eq!(h.engine.baseline(h.baseline.id).await.unwrap().version, 2);
        assert!(h
            .events
            .of_type(execution_id, event_types::OVERRIDE_REVERSED)
            .await
            .is_empty());

        let (outcome, recorded) = h
            .engine
            .apply_reversal(id, token, h.baseline.id, holder, None, 10)
            .await
            .unwrap();
        assert_eq!(outcome.action.status, OverrideStatus::Reversed);
        assert_eq!(outcome.event.actor_id, holder);
        assert_eq!(recorded.event_type, event_types::OVERRIDE_REVERSED);
        assert_eq!(h.engine.baseline(h.baseline.id).await.unwrap().version, 3);

        // The rival retrying after release finds nothing left to reverse
        assert!(matches!(
            h.engine
                .reverse(&req.recommendation_id, execution_id, h.baseline.id, rival, None, 10)
                .await,
            Err(AppError::NotReversible { .. })
        ));
        assert_eq!(
            h.events.of_type(execution_id, event_types::OVERRIDE_REVERSED).await.len(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_reversals_apply_once() {
        let h = harness().await;
        let execution_id = Uuid::new_v4();
        let req = request(h.baseline.id, execution_id, OverrideKind::Cooldown);
        h.engine.execute(req.clone()).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = h.engine.clone();
                let rid = req.recommendation_id.clone();
                let baseline = h.baseline.id;
                tokio::spawn(async move {
                    engine.reverse(&rid, execution_id, baseline, Uuid::new_v4(), None, 0).await
                })
            })
            .collect();

        let mut succeeded = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(AppError::AlreadyLocked { .. }) | Err(AppError::NotReversible { .. }) => {}
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }
        assert_eq!(succeeded, 1);
        assert_eq!(h.engine.baseline(h.baseline.id).await.unwrap().version, 3);
        assert_eq!(
            h.events.of_type(execution_id, event_types::OVERRIDE_REVERSED).await.len(),
            1
        );
    }

    #[tokio::test]
    async fn test_reverse_reaches_every_executed_row_of_an_execution() {
        let h = harness().await;
        let execution_id = Uuid::new_v4();
        let first = request(h.baseline.id, execution_id, OverrideKind::Reassign);
        let second = request(h.baseline.id, execution_id, OverrideKind::Reassign);
        assert_eq!(first.recommendation_id, second.recommendation_id);

        let a = h.engine.execute(first.clone()).await.unwrap();
        h.clock.advance(Duration::minutes(1));
        let b = h.engine.execute(second.clone()).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(h.engine.baseline(h.baseline.id).await.unwrap().reviewer_ids.len(), 3);

        let newest = h
            .engine
            .reverse(&first.recommendation_id, execution_id, h.baseline.id, first.actor_id, None, 0)
            .await
            .unwrap();
        assert_eq!(newest.action.id, b.id);

        let oldest = h
            .engine
            .reverse(&first.recommendation_id, execution_id, h.baseline.id, first.actor_id, None, 0)
            .await
            .unwrap();
        assert_eq!(oldest.action.id, a.id);

        let baseline = h.engine.baseline(h.baseline.id).await.unwrap();
        assert_eq!(baseline.reviewer_ids, vec![h.reviewer]);
        assert_eq!(baseline.version, 5);
        assert!(h
            .engine
            .history(&first.recommendation_id)
            .await
            .unwrap()
            .iter()
            .all(|row| row.status == OverrideStatus::Reversed));

        assert!(matches!(
            h.engine
                .reverse(&first.recommendation_id, execution_id, h.baseline.id, first.actor_id, None, 0)
                .await,
            Err(AppError::NotReversible { .. })
        ));
    }

    #[tokio::test]
    async fn test_decline_skips_executed_sibling() {
        let h = harness().await;
        let execution_id = Uuid::new_v4();
        let pending = request(h.baseline.id, execution_id, OverrideKind::Reassign);
        let applied = request(h.baseline.id, execution_id, OverrideKind::Reassign);

        let accepted = h.engine.accept(pending.clone()).await.unwrap();
        h.clock.advance(Duration::minutes(1));
        let executed = h.engine.execute(applied).await.unwrap();

        let declined = h
            .engine
            .decline(&pending.recommendation_id, execution_id, pending.actor_id, None)
            .await
            .unwrap();
        assert_eq!(declined.id, accepted.id);
        assert_eq!(declined.status, OverrideStatus::Declined);
        assert_eq!(
            h.store.action(executed.id).await.unwrap().status,
            OverrideStatus::Executed
        );
    }

    #[tokio::test]
    async fn test_reverse_bounds_cooldown() {
        let h = harness().await;
        let execution_id = Uuid::new_v4();
        let req = request(h.baseline.id, execution_id, OverrideKind::Cooldown);
        h.engine.execute(req.clone()).await.unwrap();

        for minutes in [-1, MAX_COOLDOWN_MINUTES + 1, i64::MAX] {
            assert!(matches!(
                h.engine
                    .reverse(&req.recommendation_id, execution_id, h.baseline.id, req.actor_id, None, minutes)
                    .await,
                Err(AppError::Validation(_))
            ));
        }
        assert_ok!(
            h.engine
                .reverse(
                    &req.recommendation_id,
                    execution_id,
                    h.baseline.id,
                    req.actor_id,
                    None,
                    MAX_COOLDOWN_MINUTES
                )
                .await
        );
    }

    #[tokio::test]
    async fn test_cooldown_window_rate_limits_baseline() {
        let h = harness().await;
        let first_exec = Uuid::new_v4();
        let second_exec = Uuid::new_v4();
        let first = request(h.baseline.id, first_exec, OverrideKind::Reassign);
        let second = request(h.baseline.id, second_exec, OverrideKind::Cooldown);

        h.engine.execute(first.clone()).await.unwrap();
        h.engine.execute(second.clone()).await.unwrap();

        h.engine
            .reverse(&first.recommendation_id, first_exec, h.baseline.id, first.actor_id, None, 30)
            .await
            .unwrap();

        h.clock.advance(Duration::minutes(10));
        match h
            .engine
            .reverse(&second.recommendation_id, second_exec, h.baseline.id, second.actor_id, None, 30)
            .await
        {
            Err(AppError::CoolingDown { until, .. }) => {
                assert_eq!(until, h.clock.now() + Duration::minutes(20));
            }
            other => panic!("expected CoolingDown, got {:?}", other),
        }
        // Rejection released nothing it did not own and left the row reversible
        let row = h.store.history(&second.recommendation_id).await;
        assert!(row.iter().any(|a| a.reversible && a.reversal_lock_token.is_none()));

        h.clock.advance(Duration::minutes(21));
        let outcome = h
            .engine
            .reverse(&second.recommendation_id, second_exec, h.baseline.id, second.actor_id, None, 30)
            .await
            .unwrap();
        assert_eq!(outcome.baseline.status, BaselineStatus::Published);
    }

    #[tokio::test]
    async fn test_reverse_rejects_mismatched_baseline() {
        let h = harness().await;
        let execution_id = Uuid::new_v4();
        let req = request(h.baseline.id, execution_id, OverrideKind::Cooldown);
        h.engine.execute(req.clone()).await.unwrap();

        let other = h.engine.publish_baseline("Other".into(), vec![]).await.unwrap();
        assert!(matches!(
            h.engine
                .reverse(&req.recommendation_id, execution_id, other.id, req.actor_id, None, 0)
                .await,
            Err(AppError::Validation(_))
        ));
    }
}
