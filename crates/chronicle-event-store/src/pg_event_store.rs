//! `PostgreSQL` implementation of the `EventStore` trait.
//!
//! Appends run in one transaction holding a per-aggregate advisory lock, so
//! the read of the latest version, the comparison with the caller's expected
//! version, and the inserts form a single atomic unit. The
//! `UNIQUE (aggregate_id, version)` constraint backs the lock up; a unique
//! violation is reported as a concurrency conflict.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use chronicle_core::error::DomainError;
use chronicle_core::registry::EventTypeRegistry;
use chronicle_core::store::{EventStore, PageRequest, Snapshot, StoredEvent, validate_batch};

const EVENT_COLUMNS: &str = "event_id, aggregate_id, aggregate_type, event_type, schema_version, \
     payload, metadata, version, occurred_at, user_id, correlation_id, causation_id";

/// PostgreSQL-backed event store.
#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
    registry: Arc<EventTypeRegistry>,
}

impl PgEventStore {
    /// Creates a new `PgEventStore` that accepts the event types in
    /// `registry`.
    #[must_use]
    pub fn new(pool: PgPool, registry: Arc<EventTypeRegistry>) -> Self {
        Self { pool, registry }
    }

    /// The connection pool backing this store.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn decode_rows(&self, rows: &[PgRow], checked: bool) -> Result<Vec<StoredEvent>, DomainError> {
        let events = rows
            .iter()
            .map(event_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(infrastructure)?;
        if checked {
            for event in &events {
                self.registry.check(event)?;
            }
        }
        Ok(events)
    }

    async fn fetch_page(&self, column: &str, filter: Filter<'_>, page: PageRequest) -> Result<Vec<StoredEvent>, DomainError> {
        let (limit, offset) = page.limit_offset()?;
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM domain_events WHERE {column} = $1 \
             ORDER BY occurred_at DESC, event_id DESC LIMIT $2 OFFSET $3"
        );
        let query = match filter {
            Filter::Text(text) => sqlx::query(&sql).bind(text),
            Filter::Id(id) => sqlx::query(&sql).bind(id),
        };
        let rows = query
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .map_err(infrastructure)?;
        self.decode_rows(&rows, false)
    }

    async fn conflict(&self, aggregate_id: Uuid, expected: i64) -> DomainError {
        match self.get_latest_version(aggregate_id).await {
            Ok(actual) => DomainError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            },
            Err(err) => err,
        }
    }
}

/// Filter value for the paged audit queries.
enum Filter<'a> {
    Text(&'a str),
    Id(Uuid),
}

fn infrastructure(err: sqlx::Error) -> DomainError {
    DomainError::Infrastructure(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn event_from_row(row: &PgRow) -> Result<StoredEvent, sqlx::Error> {
    Ok(StoredEvent {
        event_id: row.try_get("event_id")?,
        aggregate_id: row.try_get("aggregate_id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        event_type: row.try_get("event_type")?,
        schema_version: row.try_get("schema_version")?,
        payload: row.try_get("payload")?,
        metadata: row.try_get("metadata")?,
        version: row.try_get("version")?,
        occurred_at: row.try_get("occurred_at")?,
        user_id: row.try_get("user_id")?,
        correlation_id: row.try_get("correlation_id")?,
        causation_id: row.try_get("causation_id")?,
    })
}

fn snapshot_from_row(row: &PgRow) -> Result<Snapshot, sqlx::Error> {
    Ok(Snapshot {
        aggregate_id: row.try_get("aggregate_id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        version: row.try_get("version")?,
        state: row.try_get("state")?,
        taken_at: row.try_get("taken_at")?,
    })
}

async fn insert_event<'e, E>(executor: E, event: &StoredEvent) -> Result<(), sqlx::Error>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO domain_events (event_id, aggregate_id, aggregate_type, event_type, schema_version, \
         payload, metadata, version, occurred_at, user_id, correlation_id, causation_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(event.event_id)
    .bind(event.aggregate_id)
    .bind(&event.aggregate_type)
    .bind(&event.event_type)
    .bind(event.schema_version)
    .bind(&event.payload)
    .bind(&event.metadata)
    .bind(event.version)
    .bind(event.occurred_at)
    .bind(event.user_id)
    .bind(event.correlation_id)
    .bind(event.causation_id)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn get_events(&self, aggregate_id: Uuid, from_version: i64) -> Result<Vec<StoredEvent>, DomainError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM domain_events \
             WHERE aggregate_id = $1 AND version > $2 ORDER BY version ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(aggregate_id)
            .bind(from_version)
            .fetch_all(&self.pool)
            .await
            .map_err(infrastructure)?;
        self.decode_rows(&rows, true)
    }

    async fn get_events_since(
        &self,
        aggregate_id: Uuid,
        from: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM domain_events \
             WHERE aggregate_id = $1 AND occurred_at >= $2 ORDER BY occurred_at ASC, version ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(aggregate_id)
            .bind(from)
            .fetch_all(&self.pool)
            .await
            .map_err(infrastructure)?;
        self.decode_rows(&rows, true)
    }

    async fn get_events_by_type(&self, event_type: &str, page: PageRequest) -> Result<Vec<StoredEvent>, DomainError> {
        self.fetch_page("event_type", Filter::Text(event_type), page).await
    }

    async fn get_events_by_aggregate_type(
        &self,
        aggregate_type: &str,
        page: PageRequest,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        self.fetch_page("aggregate_type", Filter::Text(aggregate_type), page).await
    }

    async fn get_events_by_user(&self, user_id: Uuid, page: PageRequest) -> Result<Vec<StoredEvent>, DomainError> {
        self.fetch_page("user_id", Filter::Id(user_id), page).await
    }

    async fn get_events_by_correlation_id(&self, correlation_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM domain_events WHERE correlation_id = $1 \
             ORDER BY occurred_at ASC, version ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(correlation_id)
            .fetch_all(&self.pool)
            .await
            .map_err(infrastructure)?;
        self.decode_rows(&rows, false)
    }

    #[tracing::instrument(skip(self, events), fields(count = events.len()))]
    async fn save_events(
        &self,
        aggregate_id: Uuid,
        events: &[StoredEvent],
        expected_version: i64,
    ) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }
        validate_batch(aggregate_id, expected_version, events)?;
        for event in events {
            self.registry.check(event)?;
        }

        let mut tx = self.pool.begin().await.map_err(infrastructure)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
            .bind(aggregate_id)
            .execute(&mut *tx)
            .await
            .map_err(infrastructure)?;

        let actual: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM domain_events WHERE aggregate_id = $1")
                .bind(aggregate_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(infrastructure)?;

        if actual != expected_version {
            tracing::debug!(actual, "expected version is stale");
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }

        for event in events {
            if let Err(err) = insert_event(&mut *tx, event).await {
                if is_unique_violation(&err) {
                    drop(tx);
                    return Err(self.conflict(aggregate_id, expected_version).await);
                }
                return Err(infrastructure(err));
            }
        }

        tx.commit().await.map_err(infrastructure)?;
        let new_version = events.last().map_or(expected_version, |e| e.version);
        tracing::debug!(new_version, "events appended");
        Ok(())
    }

    async fn save_event(&self, event: &StoredEvent) -> Result<(), DomainError> {
        self.registry.check(event)?;
        match insert_event(&self.pool, event).await {
            Ok(()) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(self.conflict(event.aggregate_id, event.version - 1).await),
            Err(err) => Err(infrastructure(err)),
        }
    }

    async fn get_snapshot(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        let row = sqlx::query(
            "SELECT aggregate_id, aggregate_type, version, state, taken_at FROM aggregate_snapshots \
             WHERE aggregate_id = $1 ORDER BY version DESC LIMIT 1",
        )
        .bind(aggregate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(infrastructure)?;
        row.as_ref().map(snapshot_from_row).transpose().map_err(infrastructure)
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO aggregate_snapshots (aggregate_id, aggregate_type, version, state, taken_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (aggregate_id, version) DO UPDATE SET state = EXCLUDED.state, taken_at = EXCLUDED.taken_at",
        )
        .bind(snapshot.aggregate_id)
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.version)
        .bind(&snapshot.state)
        .bind(snapshot.taken_at)
        .execute(&self.pool)
        .await
        .map_err(infrastructure)?;
        Ok(())
    }

    async fn event_exists(&self, event_id: Uuid) -> Result<bool, DomainError> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM domain_events WHERE event_id = $1)")
            .bind(event_id)
            .fetch_one(&self.pool)
            .await
            .map_err(infrastructure)
    }

    async fn get_latest_version(&self, aggregate_id: Uuid) -> Result<i64, DomainError> {
        sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM domain_events WHERE aggregate_id = $1")
            .bind(aggregate_id)
            .fetch_one(&self.pool)
            .await
            .map_err(infrastructure)
    }
}
