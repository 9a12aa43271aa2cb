//! SLA Monitor
//!
//! Periodic task, independent of request traffic, that flags active stages
//! past their deadline and re-runs the packaging gate for their artifacts so
//! that an export queued while still pending is re-checked without any human
//! interaction.

use crate::approval::gate::PackagingGate;
use crate::approval::ladder::stage_context;
use crate::approval::models::*;
use crate::approval::store::LadderStore;
use crate::clock::SharedClock;
use crate::events::{event_types, EventLog};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What one scan did
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorReport {
    pub flagged_stage_ids: Vec<Uuid>,
    /// Artifact ID -> gate verdict after the scan
    pub gate_results: Vec<(Uuid, bool)>,
}

pub struct SlaMonitor {
    store: Arc<LadderStore>,
    gate: Arc<PackagingGate>,
    events: Arc<EventLog>,
    clock: SharedClock,
    interval: Duration,
}

impl SlaMonitor {
    pub fn new(
        store: Arc<LadderStore>,
        gate: Arc<PackagingGate>,
        events: Arc<EventLog>,
        clock: SharedClock,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            gate,
            events,
            clock,
            interval,
        }
    }

    /// One scan: flag every active, overdue, not-yet-notified stage
    pub async fn run_once(&self) -> MonitorReport {
        let now = self.clock.now();

        let (flagged, recorded) = {
            let mut tx = self.store.begin().await;
            let mut flagged: Vec<(ApprovalStage, GatedArtifact)> = Vec::new();
            let mut recorded = Vec::new();

            for stage_id in tx.overdue_stage_ids(now) {
                let Ok(stage) = tx.stage_mut(stage_id) else {
                    continue;
                };
                stage.overdue_notified_at = Some(now);
                let stage = stage.clone();

                tx.append_action(ApprovalAction {
                    id: Uuid::new_v4(),
                    artifact_id: stage.artifact_id,
                    stage_id,
                    kind: ActionKind::Escalate,
                    actor_id: None,
                    signature: None,
                    notes: Some("SLA deadline passed".to_string()),
                    metadata: json!({
                        "stageIndex": stage.sequence_index,
                        "dueAt": stage.due_at,
                    }),
                    created_at: now,
                });

                match tx.artifact(stage.artifact_id) {
                    Ok(artifact) => {
                        let artifact = artifact.clone();
                        let mut context = stage_context(&stage);
                        context["overdue_since"] = json!(stage.due_at);
                        recorded.push(
                            self.events
                                .append(artifact.execution_id, event_types::STAGE_OVERDUE, None, context)
                                .await,
                        );
                        flagged.push((stage, artifact));
                    }
                    Err(e) => warn!("Overdue stage {} has no artifact: {}", stage_id, e),
                }
            }
            (flagged, recorded)
        };

        self.events.publish(&recorded).await;

        let mut report = MonitorReport::default();
        let mut artifacts = BTreeSet::new();

        for (stage, artifact) in &flagged {
            warn!(
                "⏰ Stage '{}' (#{}) of artifact {} overdue since {:?}",
                stage.name, stage.sequence_index, artifact.id, stage.due_at
            );

            report.flagged_stage_ids.push(stage.id);
            artifacts.insert(artifact.id);
        }

        for artifact_id in artifacts {
            match self.gate.verify_by_id(artifact_id).await {
                Ok(open) => report.gate_results.push((artifact_id, open)),
                Err(e) => warn!("Gate re-check failed for artifact {}: {}", artifact_id, e),
            }
        }

        if report.flagged_stage_ids.is_empty() {
            debug!("SLA scan found no overdue stages");
        } else {
            info!("SLA scan flagged {} overdue stage(s)", report.flagged_stage_ids.len());
        }
        report
    }

    /// Run on a fixed cadence until `shutdown` flips to true
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("SLA monitor started (every {:?})", self.interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("SLA monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ladder::tests::{blueprint, setup};
    use crate::clock::ManualClock;
    use chrono::Duration as ChronoDuration;
    use pretty_assertions::assert_eq;

    fn monitor_for(
        store: &Arc<LadderStore>,
        events: &Arc<EventLog>,
        clock: &Arc<ManualClock>,
    ) -> SlaMonitor {
        let gate = Arc::new(PackagingGate::new(store.clone(), events.clone(), clock.clone()));
        SlaMonitor::new(
            store.clone(),
            gate,
            events.clone(),
            clock.clone(),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn test_overdue_stage_flagged_once() {
        let (ladder, store, events, clock) = setup();
        let monitor = monitor_for(&store, &events, &clock);
        let opened = ladder.open(Uuid::new_v4(), None, &blueprint(2)).await.unwrap();
        let execution_id = opened.artifact.execution_id;

        assert!(monitor.run_once().await.flagged_stage_ids.is_empty());

        clock.advance(ChronoDuration::hours(5));
        let report = monitor.run_once().await;
        assert_eq!(report.flagged_stage_ids, vec![opened.stages[0].id]);
        assert_eq!(report.gate_results, vec![(opened.artifact.id, false)]);

        let stage = store.stage(opened.stages[0].id).await.unwrap();
        assert!(stage.overdue_notified_at.is_some());

        // Already notified: nothing new on the next pass
        assert!(monitor.run_once().await.flagged_stage_ids.is_empty());
        assert_eq!(events.of_type(execution_id, event_types::STAGE_OVERDUE).await.len(), 1);
        assert_eq!(events.of_type(execution_id, event_types::AWAITING_APPROVAL).await.len(), 1);

        let actions = ladder.actions(opened.artifact.id).await.unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].kind, ActionKind::Escalate);
        assert!(actions[0].actor_id.is_none());
    }

    #[tokio::test]
    async fn test_next_stage_gets_its_own_deadline() {
        let (ladder, store, events, clock) = setup();
        let monitor = monitor_for(&store, &events, &clock);
        let opened = ladder.open(Uuid::new_v4(), None, &blueprint(2)).await.unwrap();

        clock.advance(ChronoDuration::hours(5));
        monitor.run_once().await;
        ladder
            .decide(opened.stages[0].id, Uuid::new_v4(), Decision::Approve, None, None)
            .await
            .unwrap();

        clock.advance(ChronoDuration::hours(3));
        assert!(monitor.run_once().await.flagged_stage_ids.is_empty());

        clock.advance(ChronoDuration::hours(2));
        assert_eq!(monitor.run_once().await.flagged_stage_ids, vec![opened.stages[1].id]);
    }

    #[tokio::test]
    async fn test_delegated_stage_still_monitored() {
        let (ladder, store, events, clock) = setup();
        let monitor = monitor_for(&store, &events, &clock);
        let opened = ladder.open(Uuid::new_v4(), None, &blueprint(1)).await.unwrap();

        ladder
            .delegate(opened.stages[0].id, Uuid::new_v4(), Uuid::new_v4(), None, None)
            .await
            .unwrap();
        clock.advance(ChronoDuration::hours(5));

        assert_eq!(monitor.run_once().await.flagged_stage_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_monitor_stops_on_shutdown() {
        let (_, store, events, clock) = setup();
        let monitor = Arc::new(monitor_for(&store, &events, &clock));
        let (tx, rx) = watch::channel(false);

        let handle = monitor.spawn(rx);
        tx.send(true).unwrap();

        tokio_test::assert_ok!(handle.await);
    }
}
