//! Domain event abstractions.
//!
//! A [`DomainEvent`] pairs provenance [`EventMetadata`] with a payload drawn
//! from a closed [`EventKind`] enum. Each aggregate type owns exactly one
//! `EventKind`; the enum's variants are the business facts that aggregate can
//! record.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::clock::{Clock, ensure_not_in_future};
use crate::error::DomainError;
use crate::registry::EventDescriptor;
use crate::store::StoredEvent;

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Logical event name used for registry lookups.
    pub event_type: String,
    /// Schema version of the payload shape.
    pub schema_version: i32,
    /// Aggregate/stream this event belongs to.
    pub aggregate_id: Uuid,
    /// Name of the owning aggregate type.
    pub aggregate_type: String,
    /// Aggregate version produced by this event. Zero until assigned.
    pub version: i64,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
    /// User on whose behalf the event was raised, if any.
    pub user_id: Option<Uuid>,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Uuid,
    /// Causation ID linking this event to the event/command that caused it.
    pub causation_id: Uuid,
    /// Free-form extension data; never interpreted by the core.
    pub attributes: Map<String, Value>,
}

/// Provenance supplied by a use-case handler when it raises events.
#[derive(Debug, Clone, PartialEq)]
pub struct EventContext {
    /// Correlation ID of the logical operation.
    pub correlation_id: Uuid,
    /// Event or command that caused the raised events.
    pub causation_id: Uuid,
    /// Acting user, if known.
    pub user_id: Option<Uuid>,
    /// Extension data copied onto every raised event.
    pub attributes: Map<String, Value>,
}

impl EventContext {
    /// Creates a context whose causation ID equals its correlation ID.
    #[must_use]
    pub fn new(correlation_id: Uuid) -> Self {
        Self {
            correlation_id,
            causation_id: correlation_id,
            user_id: None,
            attributes: Map::new(),
        }
    }

    /// Sets the causation ID.
    #[must_use]
    pub fn caused_by(mut self, causation_id: Uuid) -> Self {
        self.causation_id = causation_id;
        self
    }

    /// Sets the acting user.
    #[must_use]
    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Adds one extension attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// The closed set of business facts recorded by one aggregate type.
///
/// Implementations are plain enums deriving `Serialize`/`Deserialize` whose
/// variants wrap one payload struct each. The payload stored for an event is
/// the variant's inner struct; the variant itself is recovered through the
/// registry from the event's logical name.
pub trait EventKind: Debug + Clone + Send + Sync + 'static {
    /// Name of the aggregate type that owns these events.
    const AGGREGATE_TYPE: &'static str;

    /// Returns the logical event name of this variant.
    fn event_type(&self) -> &'static str;

    /// Returns the schema version of this variant's payload.
    fn schema_version(&self) -> i32 {
        1
    }

    /// Serializes this variant's payload to JSON.
    ///
    /// # Errors
    ///
    /// Returns the serde error if the payload cannot be represented as JSON.
    fn to_payload(&self) -> Result<Value, serde_json::Error>;

    /// Lists every variant's name, schema version, and decoder.
    fn descriptors() -> Vec<EventDescriptor<Self>>;
}

/// Domain event envelope: metadata plus a typed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent<K> {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: K,
}

impl<K: EventKind> DomainEvent<K> {
    /// Creates an event occurring now, with its version left unassigned.
    #[must_use]
    pub fn new(aggregate_id: Uuid, kind: K, context: &EventContext, clock: &dyn Clock) -> Self {
        Self::build(aggregate_id, kind, context, clock.now())
    }

    /// Creates an event with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if `occurred_at` is in the future.
    pub fn at(
        aggregate_id: Uuid,
        kind: K,
        context: &EventContext,
        occurred_at: DateTime<Utc>,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        ensure_not_in_future(clock, occurred_at)?;
        Ok(Self::build(aggregate_id, kind, context, occurred_at))
    }

    fn build(aggregate_id: Uuid, kind: K, context: &EventContext, occurred_at: DateTime<Utc>) -> Self {
        Self {
            metadata: EventMetadata {
                event_id: Uuid::now_v7(),
                event_type: kind.event_type().to_owned(),
                schema_version: kind.schema_version(),
                aggregate_id,
                aggregate_type: K::AGGREGATE_TYPE.to_owned(),
                version: 0,
                occurred_at,
                user_id: context.user_id,
                correlation_id: context.correlation_id,
                causation_id: context.causation_id,
                attributes: context.attributes.clone(),
            },
            kind,
        }
    }

    /// Sets the aggregate version carried by this event.
    #[must_use]
    pub fn with_version(mut self, version: i64) -> Self {
        self.metadata.version = version;
        self
    }

    /// Returns the logical event name.
    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.metadata.event_type
    }

    /// Returns the aggregate version produced by this event.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.metadata.version
    }

    /// Converts this event into its persisted shape.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    pub fn to_stored(&self) -> Result<StoredEvent, DomainError> {
        let meta = &self.metadata;
        Ok(StoredEvent {
            event_id: meta.event_id,
            aggregate_id: meta.aggregate_id,
            aggregate_type: meta.aggregate_type.clone(),
            event_type: meta.event_type.clone(),
            schema_version: meta.schema_version,
            payload: self.kind.to_payload()?,
            metadata: Value::Object(meta.attributes.clone()),
            version: meta.version,
            occurred_at: meta.occurred_at,
            user_id: meta.user_id,
            correlation_id: meta.correlation_id,
            causation_id: meta.causation_id,
        })
    }
}

impl EventMetadata {
    /// Rebuilds metadata from a stored row.
    #[must_use]
    pub fn from_stored(stored: &StoredEvent) -> Self {
        let attributes = match &stored.metadata {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        Self {
            event_id: stored.event_id,
            event_type: stored.event_type.clone(),
            schema_version: stored.schema_version,
            aggregate_id: stored.aggregate_id,
            aggregate_type: stored.aggregate_type.clone(),
            version: stored.version,
            occurred_at: stored.occurred_at,
            user_id: stored.user_id,
            correlation_id: stored.correlation_id,
            causation_id: stored.causation_id,
            attributes,
        }
    }
}
