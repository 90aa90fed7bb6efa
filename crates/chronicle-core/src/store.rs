//! Event store abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Stored representation of a domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Aggregate this event belongs to.
    pub aggregate_id: Uuid,
    /// Aggregate type name for type-filtered queries.
    pub aggregate_type: String,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Schema version of the payload.
    pub schema_version: i32,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Serialized extension metadata.
    pub metadata: serde_json::Value,
    /// Aggregate version produced by this event.
    pub version: i64,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
    /// Acting user, if any.
    pub user_id: Option<Uuid>,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Causation ID linking to the causing event/command.
    pub causation_id: Uuid,
}

/// Cached aggregate state at a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The aggregate the snapshot was taken of.
    pub aggregate_id: Uuid,
    /// The aggregate's type name.
    pub aggregate_type: String,
    /// The version the snapshot represents.
    pub version: i64,
    /// Serialized aggregate state.
    pub state: serde_json::Value,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

/// One page of an audit query. Page numbers start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Maximum rows per page.
    pub page_size: u32,
    /// 1-based page index.
    pub page_number: u32,
}

impl PageRequest {
    /// Creates a page request.
    #[must_use]
    pub fn new(page_size: u32, page_number: u32) -> Self {
        Self {
            page_size,
            page_number,
        }
    }

    /// Returns the SQL `LIMIT`/`OFFSET` pair for this page.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if either field is zero.
    pub fn limit_offset(&self) -> Result<(i64, i64), DomainError> {
        if self.page_size == 0 {
            return Err(DomainError::Validation("page size must be positive".into()));
        }
        if self.page_number == 0 {
            return Err(DomainError::Validation("page numbers start at 1".into()));
        }
        let limit = i64::from(self.page_size);
        let offset = i64::from(self.page_number - 1) * limit;
        Ok((limit, offset))
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(50, 1)
    }
}

/// Checks a batch before an append: every event belongs to `aggregate_id`
/// and versions run contiguously from `expected_version + 1`.
///
/// # Errors
///
/// Returns `DomainError::Validation` describing the first offending event.
pub fn validate_batch(
    aggregate_id: Uuid,
    expected_version: i64,
    events: &[StoredEvent],
) -> Result<(), DomainError> {
    for (next, event) in (expected_version + 1..).zip(events) {
        if event.aggregate_id != aggregate_id {
            return Err(DomainError::Validation(format!(
                "event {} belongs to aggregate {}, not {aggregate_id}",
                event.event_id, event.aggregate_id
            )));
        }
        if event.version != next {
            return Err(DomainError::Validation(format!(
                "event {} has version {}, expected {next}",
                event.event_id, event.version
            )));
        }
    }
    Ok(())
}

/// Append-only event persistence with optimistic concurrency.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Events with `version > from_version`, ascending by version.
    async fn get_events(&self, aggregate_id: Uuid, from_version: i64) -> Result<Vec<StoredEvent>, DomainError>;

    /// Events with `occurred_at >= from`, ascending by timestamp.
    async fn get_events_since(
        &self,
        aggregate_id: Uuid,
        from: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, DomainError>;

    /// Events of one logical type, newest first.
    async fn get_events_by_type(&self, event_type: &str, page: PageRequest) -> Result<Vec<StoredEvent>, DomainError>;

    /// Events of one aggregate type, newest first.
    async fn get_events_by_aggregate_type(
        &self,
        aggregate_type: &str,
        page: PageRequest,
    ) -> Result<Vec<StoredEvent>, DomainError>;

    /// Events raised by one user, newest first.
    async fn get_events_by_user(&self, user_id: Uuid, page: PageRequest) -> Result<Vec<StoredEvent>, DomainError>;

    /// Every event of one logical operation, ascending by timestamp.
    async fn get_events_by_correlation_id(&self, correlation_id: Uuid) -> Result<Vec<StoredEvent>, DomainError>;

    /// Appends `events` if the aggregate is still at `expected_version`.
    ///
    /// The version check and the append are one atomic unit: on a mismatch
    /// nothing is written and `DomainError::ConcurrencyConflict` is returned.
    async fn save_events(
        &self,
        aggregate_id: Uuid,
        events: &[StoredEvent],
        expected_version: i64,
    ) -> Result<(), DomainError>;

    /// Inserts a single event row.
    async fn save_event(&self, event: &StoredEvent) -> Result<(), DomainError>;

    /// Latest snapshot of an aggregate, if any.
    async fn get_snapshot(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, DomainError>;

    /// Stores a snapshot.
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), DomainError>;

    /// Returns `true` if an event with this ID has been stored.
    async fn event_exists(&self, event_id: Uuid) -> Result<bool, DomainError>;

    /// Highest stored version, or 0 when the aggregate has no events.
    async fn get_latest_version(&self, aggregate_id: Uuid) -> Result<i64, DomainError>;
}

/// A row in the local "observed events" audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalLogEntry {
    /// The observed event.
    pub event_id: Uuid,
    /// Logical event name from the broker header.
    pub event_name: String,
    /// Schema version from the broker header.
    pub event_version: i32,
    /// Aggregate the event belongs to.
    pub aggregate_id: Uuid,
    /// The event as received.
    pub body: serde_json::Value,
    /// When this process observed the event.
    pub observed_at: DateTime<Utc>,
}

/// Durable local record of events this process has observed.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends an entry. Appending an already-logged event is a no-op.
    async fn append(&self, entry: &LocalLogEntry) -> Result<(), DomainError>;

    /// Returns `true` if the event has already been logged.
    async fn contains(&self, event_id: Uuid) -> Result<bool, DomainError>;
}
