//! Event replay service.
//!
//! Rebuilds aggregates from the event store at their latest state, at a
//! version cut-off, or at a point in time, and checks that a stored history
//! is the contiguous sequence 1, 2, 3, …

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use chronicle_core::aggregate::{AggregateRoot, SnapshotAggregate};
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainEvent;
use chronicle_core::registry::EventTypeRegistry;
use chronicle_core::store::{EventStore, StoredEvent};

/// Which slice of an aggregate's history to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRange {
    /// Every stored event.
    All,
    /// Events with `from <= version <= to`.
    Versions {
        /// First version, inclusive.
        from: i64,
        /// Last version, inclusive.
        to: i64,
    },
    /// Events with `from <= occurred_at <= to`.
    Timestamps {
        /// Earliest timestamp, inclusive.
        from: DateTime<Utc>,
        /// Latest timestamp, inclusive.
        to: DateTime<Utc>,
    },
}

/// The first place a stored history departs from 1, 2, 3, …
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceViolation {
    /// The version that should have come next.
    pub expected: i64,
    /// The version actually stored there.
    pub found: i64,
}

/// Result of checking an aggregate's stored version sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceReport {
    /// The aggregate checked.
    pub aggregate_id: Uuid,
    /// Number of stored events.
    pub event_count: usize,
    /// Highest stored version, 0 when there are none.
    pub latest_version: i64,
    /// The first gap or duplicate, if any.
    pub violation: Option<SequenceViolation>,
}

impl SequenceReport {
    /// Returns `true` when the history is contiguous from version 1.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.violation.is_none()
    }
}

/// Rebuilds aggregates from the event store.
#[derive(Clone)]
pub struct EventReplayService {
    store: Arc<dyn EventStore>,
    registry: Arc<EventTypeRegistry>,
}

impl std::fmt::Debug for EventReplayService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReplayService")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl EventReplayService {
    /// Creates a replay service reading from `store` and decoding through
    /// `registry`.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, registry: Arc<EventTypeRegistry>) -> Self {
        Self { store, registry }
    }

    /// Rebuilds an aggregate from its full history. An aggregate with no
    /// events comes back as `T::default()`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if loading, decoding, or applying an event fails.
    #[tracing::instrument(skip(self), fields(aggregate_type = T::aggregate_type()))]
    pub async fn replay_aggregate<T: AggregateRoot>(&self, aggregate_id: Uuid) -> Result<T, DomainError> {
        let stored = self.store.get_events(aggregate_id, 0).await?;
        self.fold(&stored)
    }

    /// Rebuilds an aggregate from the events with `version <= version`. A
    /// cut-off past the latest version yields the latest state.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a negative cut-off, or any error
    /// from loading and applying events.
    pub async fn replay_aggregate_to_version<T: AggregateRoot>(
        &self,
        aggregate_id: Uuid,
        version: i64,
    ) -> Result<T, DomainError> {
        if version < 0 {
            return Err(DomainError::Validation(format!("cannot replay to negative version {version}")));
        }
        let mut stored = self.store.get_events(aggregate_id, 0).await?;
        stored.retain(|e| e.version <= version);
        self.fold(&stored)
    }

    /// Rebuilds an aggregate from the events with `occurred_at <= timestamp`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if loading, decoding, or applying an event fails.
    pub async fn replay_aggregate_to_timestamp<T: AggregateRoot>(
        &self,
        aggregate_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<T, DomainError> {
        let mut stored = self.store.get_events(aggregate_id, 0).await?;
        stored.retain(|e| e.occurred_at <= timestamp);
        self.fold(&stored)
    }

    /// Loads an aggregate starting from its latest snapshot and applying only
    /// newer events. Falls back to a full replay when there is no snapshot or
    /// the snapshot cannot be restored.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if loading, decoding, or applying an event fails.
    pub async fn load_aggregate<T: SnapshotAggregate>(&self, aggregate_id: Uuid) -> Result<T, DomainError> {
        if let Some(snapshot) = self.store.get_snapshot(aggregate_id).await? {
            match T::from_snapshot(&snapshot) {
                Ok(mut aggregate) => {
                    let newer = self.store.get_events(aggregate_id, snapshot.version).await?;
                    let events = self.decode::<T>(&newer)?;
                    aggregate.load_from_history(&events)?;
                    tracing::debug!(
                        %aggregate_id,
                        snapshot_version = snapshot.version,
                        applied = events.len(),
                        "aggregate loaded from snapshot"
                    );
                    return Ok(aggregate);
                }
                Err(err) => {
                    tracing::warn!(%aggregate_id, error = %err, "snapshot unusable, replaying full history");
                }
            }
        }
        self.replay_aggregate(aggregate_id).await
    }

    /// Returns raw stored events for a slice of an aggregate's history.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for an inverted range, or any store
    /// error.
    pub async fn get_event_history(
        &self,
        aggregate_id: Uuid,
        range: HistoryRange,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        match range {
            HistoryRange::All => self.store.get_events(aggregate_id, 0).await,
            HistoryRange::Versions { from, to } => {
                if from > to {
                    return Err(DomainError::Validation(format!("version range {from}..={to} is inverted")));
                }
                let mut events = self.store.get_events(aggregate_id, from.saturating_sub(1)).await?;
                events.retain(|e| e.version <= to);
                Ok(events)
            }
            HistoryRange::Timestamps { from, to } => {
                if from > to {
                    return Err(DomainError::Validation(format!("time range {from}..={to} is inverted")));
                }
                let mut events = self.store.get_events_since(aggregate_id, from).await?;
                events.retain(|e| e.occurred_at <= to);
                Ok(events)
            }
        }
    }

    /// Checks that the stored versions run 1, 2, 3, … with no gaps or
    /// duplicates.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` only if the store cannot be read.
    pub async fn validate_event_sequence(&self, aggregate_id: Uuid) -> Result<SequenceReport, DomainError> {
        let events = self.store.get_events(aggregate_id, 0).await?;
        let violation = (1_i64..)
            .zip(&events)
            .find(|(expected, event)| event.version != *expected)
            .map(|(expected, event)| SequenceViolation {
                expected,
                found: event.version,
            });
        Ok(SequenceReport {
            aggregate_id,
            event_count: events.len(),
            latest_version: events.iter().map(|e| e.version).max().unwrap_or(0),
            violation,
        })
    }

    /// Like [`Self::validate_event_sequence`], but a broken sequence is an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SequenceViolation` on the first gap or duplicate.
    pub async fn ensure_valid_sequence(&self, aggregate_id: Uuid) -> Result<SequenceReport, DomainError> {
        let report = self.validate_event_sequence(aggregate_id).await?;
        if let Some(violation) = report.violation {
            return Err(DomainError::SequenceViolation {
                aggregate_id,
                expected: violation.expected,
                found: violation.found,
            });
        }
        Ok(report)
    }

    /// The aggregate's public state as of `version`, with `aggregate_id`
    /// and `version` keys added.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if replay fails or the state does not serialize
    /// to a JSON object.
    pub async fn get_aggregate_state_at_version<T>(
        &self,
        aggregate_id: Uuid,
        version: i64,
    ) -> Result<BTreeMap<String, Value>, DomainError>
    where
        T: AggregateRoot + Serialize,
    {
        let aggregate: T = self.replay_aggregate_to_version(aggregate_id, version).await?;
        state_map(&aggregate)
    }

    /// The aggregate's public state as of `timestamp`, with `aggregate_id`
    /// and `version` keys added.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if replay fails or the state does not serialize
    /// to a JSON object.
    pub async fn get_aggregate_state_at_timestamp<T>(
        &self,
        aggregate_id: Uuid,
        timestamp: DateTime<Utc>,
    ) -> Result<BTreeMap<String, Value>, DomainError>
    where
        T: AggregateRoot + Serialize,
    {
        let aggregate: T = self.replay_aggregate_to_timestamp(aggregate_id, timestamp).await?;
        state_map(&aggregate)
    }

    fn decode<T: AggregateRoot>(&self, stored: &[StoredEvent]) -> Result<Vec<DomainEvent<T::Event>>, DomainError> {
        self.registry.decode_all::<T::Event>(stored)
    }

    fn fold<T: AggregateRoot>(&self, stored: &[StoredEvent]) -> Result<T, DomainError> {
        let events = self.decode::<T>(stored)?;
        let mut aggregate = T::default();
        aggregate.load_from_history(&events)?;
        Ok(aggregate)
    }
}

fn state_map<T: AggregateRoot + Serialize>(aggregate: &T) -> Result<BTreeMap<String, Value>, DomainError> {
    let Value::Object(fields) = serde_json::to_value(aggregate)? else {
        return Err(DomainError::Serialization(format!(
            "{} state is not a JSON object",
            T::aggregate_type()
        )));
    };
    let mut state: BTreeMap<String, Value> = fields.into_iter().collect();
    state.insert(
        "aggregate_id".to_owned(),
        aggregate.aggregate_id().map_or(Value::Null, |id| Value::String(id.to_string())),
    );
    state.insert("version".to_owned(), Value::from(aggregate.version()));
    Ok(state)
}
