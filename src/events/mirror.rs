//! Durable mirror of the event log
//!
//! Insert-only: rows in `governance_events` are never updated or deleted.

use crate::error::AppError;
use crate::events::GovernanceEvent;
use deadpool_postgres::Pool;
use postgres_types::Json;
use tracing::info;

pub struct PgEventMirror {
    pool: Pool,
}

impl PgEventMirror {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create the event table if it doesn't exist
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        let client = self.pool.get().await?;

        client
            .execute(
                "CREATE TABLE IF NOT EXISTS governance_events (
                    id UUID PRIMARY KEY,
                    execution_id UUID NOT NULL,
                    sequence BIGINT NOT NULL,
                    event_type VARCHAR(100) NOT NULL,
                    payload JSONB NOT NULL DEFAULT '{}'::jsonb,
                    actor_id UUID,
                    created_at TIMESTAMPTZ NOT NULL,
                    UNIQUE (execution_id, sequence)
                )",
                &[],
            )
            .await?;

        client
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_governance_events_type
                 ON governance_events(execution_id, event_type)",
                &[],
            )
            .await?;

        info!("✅ governance_events table ready");
        Ok(())
    }

    pub async fn record(&self, event: &GovernanceEvent) -> Result<(), AppError> {
        let client = self.pool.get().await?;
        let sequence = i64::try_from(event.sequence)
            .map_err(|_| AppError::Internal(format!("Event sequence overflow: {}", event.sequence)))?;

        client
            .execute(
                "INSERT INTO governance_events
                    (id, execution_id, sequence, event_type, payload, actor_id, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (id) DO NOTHING",
                &[
                    &event.id,
                    &event.execution_id,
                    &sequence,
                    &event.event_type,
                    &Json(&event.payload),
                    &event.actor_id,
                    &event.created_at,
                ],
            )
            .await?;

        Ok(())
    }
}
