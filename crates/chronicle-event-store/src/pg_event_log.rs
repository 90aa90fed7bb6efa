//! `PostgreSQL` implementation of the `EventLog` trait.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use chronicle_core::error::DomainError;
use chronicle_core::store::{EventLog, LocalLogEntry};

/// Writes observed broker events to `local_event_log`, a table kept apart
/// from `domain_events`.
#[derive(Debug, Clone)]
pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    /// Creates a new `PgEventLog`.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn append(&self, entry: &LocalLogEntry) -> Result<(), DomainError> {
        let result = sqlx::query(
            "INSERT INTO local_event_log (event_id, event_name, event_version, aggregate_id, body, observed_at) \
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (event_id) DO NOTHING",
        )
        .bind(entry.event_id)
        .bind(&entry.event_name)
        .bind(entry.event_version)
        .bind(entry.aggregate_id)
        .bind(&entry.body)
        .bind(entry.observed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| DomainError::Infrastructure(e.to_string()))?;

        if result.rows_affected() == 0 {
            tracing::debug!(event_id = %entry.event_id, "event already in local log");
        }
        Ok(())
    }

    async fn contains(&self, event_id: Uuid) -> Result<bool, DomainError> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM local_event_log WHERE event_id = $1)")
            .bind(event_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| DomainError::Infrastructure(e.to_string()))
    }
}
