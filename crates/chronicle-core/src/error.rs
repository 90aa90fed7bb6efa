//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level error type shared by aggregates, stores, replay, and publishers.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// Optimistic concurrency conflict.
    #[error("concurrency conflict on aggregate {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The aggregate that had the conflict.
        aggregate_id: Uuid,
        /// The expected version.
        expected: i64,
        /// The actual version found.
        actual: i64,
    },

    /// A raised event carries a version that does not follow the aggregate's.
    #[error("event version {found} does not follow aggregate version {current}")]
    VersionConflict {
        /// The aggregate's version before the event.
        current: i64,
        /// The version carried by the event.
        found: i64,
    },

    /// An event was raised on an aggregate it does not belong to.
    #[error("event for aggregate {actual} raised on aggregate {expected}")]
    AggregateMismatch {
        /// The aggregate the event was raised on.
        expected: Uuid,
        /// The aggregate named by the event.
        actual: Uuid,
    },

    /// An event name has no entry in the event type registry.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// An aggregate was asked to apply an event it cannot fold.
    #[error("aggregate {aggregate_type} cannot apply event {event_type}")]
    UnhandledEvent {
        /// The aggregate type that rejected the event.
        aggregate_type: String,
        /// The rejected event type.
        event_type: String,
    },

    /// The stored version sequence of an aggregate has a gap or duplicate.
    #[error("event sequence violation on aggregate {aggregate_id}: expected version {expected}, found {found}")]
    SequenceViolation {
        /// The aggregate whose history is broken.
        aggregate_id: Uuid,
        /// The version that should have come next.
        expected: i64,
        /// The version actually found.
        found: i64,
    },

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An event or snapshot could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Returns `true` when the caller may reload the aggregate and retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::Infrastructure(_)
        )
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
