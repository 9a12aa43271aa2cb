//! In-process event log with optional durable mirror

use crate::clock::SharedClock;
use crate::events::PgEventMirror;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Context keys that may surface in event payloads
const ALLOWED_CONTEXT_KEYS: &[&str] = &[
    // approval ladder
    "artifact_id",
    "stage_id",
    "stage_index",
    "stage_name",
    "required_role",
    "decision",
    "due_at",
    "overdue_since",
    "delegated_to_id",
    "displaced_stage_id",
    "approval_status",
    // packaging gate
    "artifact_status",
    "packaging_attempts",
    "outcome",
    "pending_stage_id",
    "pending_stage_index",
    "pending_stage_status",
    "pending_stage_due_at",
    // guardrail simulation
    "simulation_id",
    "guardrail_state",
    "projected_delay_minutes",
    "reasons",
    "regressed_stage_indexes",
    // overrides
    "override_id",
    "recommendation_id",
    "action",
    "baseline_id",
    "baseline_version",
    "target_reviewer_id",
    "execution_hash",
    "reversal",
    "diff_keys",
    "cooldown_expires_at",
];

/// Keys that must never leave the process, even if allow-listed by mistake
static SECRET_KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(secret|token|password|signature|credential)").expect("static regex")
});

/// One immutable telemetry record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceEvent {
    pub id: Uuid,
    pub execution_id: Uuid,
    /// Per-execution sequence, starting at 1 with no gaps
    pub sequence: u64,
    pub event_type: String,
    pub payload: Value,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Append-only, execution-scoped event log
pub struct EventLog {
    events: RwLock<HashMap<Uuid, Vec<GovernanceEvent>>>,
    mirror: Option<PgEventMirror>,
    clock: SharedClock,
}

impl EventLog {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            events: RwLock::new(HashMap::new()),
            mirror: None,
            clock,
        }
    }

    /// Mirror every appended event into Postgres
    pub fn with_mirror(mut self, mirror: PgEventMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    /// Append and mirror one event in a single call
    pub async fn emit(
        &self,
        execution_id: Uuid,
        event_type: &str,
        actor_id: Option<Uuid>,
        context: Value,
    ) -> GovernanceEvent {
        let event = self.append(execution_id, event_type, actor_id, context).await;
        self.publish(std::slice::from_ref(&event)).await;
        event
    }

    /// Assign the next sequence number and append in memory only.
    ///
    /// Callers mutating a store append while still holding its write guard,
    /// so sequence order matches transition order, then `publish` once the
    /// guard is released. The payload is reduced to allow-listed context.
    pub async fn append(
        &self,
        execution_id: Uuid,
        event_type: &str,
        actor_id: Option<Uuid>,
        context: Value,
    ) -> GovernanceEvent {
        let payload = sanitize_payload(context);

        let mut events = self.events.write().await;
        let stream = events.entry(execution_id).or_default();
        let event = GovernanceEvent {
            id: Uuid::new_v4(),
            execution_id,
            sequence: stream.len() as u64 + 1,
            event_type: event_type.to_string(),
            payload,
            actor_id,
            created_at: self.clock.now(),
        };
        stream.push(event.clone());

        debug!(
            "Event #{} {} for execution {}",
            event.sequence, event.event_type, execution_id
        );
        event
    }

    /// Hand appended events to the durable mirror, if any
    pub async fn publish(&self, events: &[GovernanceEvent]) {
        let Some(mirror) = &self.mirror else {
            return;
        };
        for event in events {
            if let Err(e) = mirror.record(event).await {
                warn!(
                    "Failed to mirror event {} ({}) to database: {}",
                    event.id, event.event_type, e
                );
            }
        }
    }

    /// All events for one execution, oldest first
    pub async fn for_execution(&self, execution_id: Uuid) -> Vec<GovernanceEvent> {
        let events = self.events.read().await;
        events.get(&execution_id).cloned().unwrap_or_default()
    }

    /// Events of a single type for one execution
    #[cfg(test)]
    pub async fn of_type(&self, execution_id: Uuid, event_type: &str) -> Vec<GovernanceEvent> {
        let events = self.events.read().await;
        events
            .get(&execution_id)
            .map(|stream| {
                stream
                    .iter()
                    .filter(|e| e.event_type == event_type)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn sanitize_payload(context: Value) -> Value {
    let Value::Object(map) = context else {
        return Value::Object(Map::new());
    };

    let mut clean = Map::new();
    for (key, value) in map {
        if SECRET_KEY_PATTERN.is_match(&key) || !ALLOWED_CONTEXT_KEYS.contains(&key.as_str()) {
            debug!("Dropping non-surfaced event context key '{}'", key);
            continue;
        }
        clean.insert(key, value);
    }
    Value::Object(clean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sequences_are_per_execution() {
        let log = EventLog::new(Arc::new(SystemClock));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        log.emit(a, "x", None, json!({})).await;
        log.emit(b, "x", None, json!({})).await;
        let second = log.emit(a, "y", None, json!({})).await;

        assert_eq!(second.sequence, 2);
        assert_eq!(log.for_execution(b).await.len(), 1);
        assert_eq!(log.of_type(a, "y").await.len(), 1);
    }

    #[tokio::test]
    async fn test_append_is_visible_before_publish() {
        let log = EventLog::new(Arc::new(SystemClock));
        let execution = Uuid::new_v4();

        let first = log.append(execution, "x", None, json!({ "stage_index": 0 })).await;
        let second = log.append(execution, "y", None, json!({ "stage_index": 1 })).await;
        assert_eq!((first.sequence, second.sequence), (1, 2));
        assert_eq!(log.for_execution(execution).await.len(), 2);

        // Without a mirror publishing is a no-op and never re-sequences
        log.publish(&[first, second]).await;
        let stream = log.for_execution(execution).await;
        assert_eq!(stream.len(), 2);
        assert_eq!(stream[1].payload, json!({ "stage_index": 1 }));
    }

    #[test]
    fn test_payload_is_allow_listed() {
        let payload = sanitize_payload(json!({
            "guardrail_state": "blocked",
            "reversal_lock_token": "abc",
            "signature": "s3cr3t",
            "free_text": "whatever",
        }));

        assert_eq!(payload, json!({ "guardrail_state": "blocked" }));
    }

    #[test]
    fn test_non_object_payload_becomes_empty() {
        assert_eq!(sanitize_payload(json!(["a"])), json!({}));
    }
}
