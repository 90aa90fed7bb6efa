//! Aggregate root abstraction.
//!
//! Concrete aggregates embed an [`AggregateCore`] for identity, version, and
//! pending events, and implement only [`AggregateRoot::apply`]. Raising,
//! history loading, replay, and commit bookkeeping are provided methods so
//! every aggregate follows the same rules.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::{DomainEvent, EventKind};
use crate::store::Snapshot;

/// Identity, version, and uncommitted events of one aggregate instance.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCore<K> {
    id: Option<Uuid>,
    version: i64,
    uncommitted: Vec<DomainEvent<K>>,
}

impl<K> Default for AggregateCore<K> {
    fn default() -> Self {
        Self {
            id: None,
            version: 0,
            uncommitted: Vec::new(),
        }
    }
}

impl<K> AggregateCore<K> {
    /// Creates a core for an aggregate with a known identifier.
    #[must_use]
    pub fn with_id(id: Uuid) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Returns the aggregate identifier, if assigned.
    #[must_use]
    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    /// Returns the current version.
    #[must_use]
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Returns events raised since the last commit.
    #[must_use]
    pub fn uncommitted(&self) -> &[DomainEvent<K>] {
        &self.uncommitted
    }

    /// Restores identity and version after loading a snapshot.
    pub fn restore(&mut self, id: Uuid, version: i64) {
        self.id = Some(id);
        self.version = version;
        self.uncommitted.clear();
    }
}

/// Trait for aggregate roots that reconstitute from event history.
pub trait AggregateRoot: Default + Send + Sync {
    /// The event type this aggregate produces and consumes.
    type Event: EventKind;

    /// Shared bookkeeping.
    fn core(&self) -> &AggregateCore<Self::Event>;

    /// Shared bookkeeping, mutably.
    fn core_mut(&mut self) -> &mut AggregateCore<Self::Event>;

    /// Folds one event into in-memory state. Must not perform I/O.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnhandledEvent` for events this aggregate does
    /// not recognise.
    fn apply(&mut self, event: &DomainEvent<Self::Event>) -> Result<(), DomainError>;

    /// Name of this aggregate type.
    #[must_use]
    fn aggregate_type() -> &'static str {
        <Self::Event as EventKind>::AGGREGATE_TYPE
    }

    /// Returns the aggregate identifier, if assigned.
    fn aggregate_id(&self) -> Option<Uuid> {
        self.core().id()
    }

    /// Returns the current version, including uncommitted events.
    fn version(&self) -> i64 {
        self.core().version()
    }

    /// Returns the version already durable in the store.
    fn committed_version(&self) -> i64 {
        #[allow(clippy::cast_possible_wrap)]
        let pending = self.core().uncommitted().len() as i64;
        self.version() - pending
    }

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[DomainEvent<Self::Event>] {
        self.core().uncommitted()
    }

    /// Applies a new event and queues it for persistence.
    ///
    /// An unassigned version (0) becomes `version + 1`; an assigned one must
    /// equal it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateMismatch` if the event names another
    /// aggregate, `DomainError::VersionConflict` for an out-of-order version,
    /// or whatever `apply` rejects. The aggregate is unchanged on error.
    fn raise_event(&mut self, mut event: DomainEvent<Self::Event>) -> Result<(), DomainError> {
        if let Some(id) = self.aggregate_id() {
            if id != event.metadata.aggregate_id {
                return Err(DomainError::AggregateMismatch {
                    expected: id,
                    actual: event.metadata.aggregate_id,
                });
            }
        }
        let next = self.version() + 1;
        match event.metadata.version {
            0 => event.metadata.version = next,
            v if v == next => {}
            found => {
                return Err(DomainError::VersionConflict {
                    current: self.version(),
                    found,
                });
            }
        }

        self.apply(&event)?;

        let core = self.core_mut();
        core.id.get_or_insert(event.metadata.aggregate_id);
        core.version = next;
        core.uncommitted.push(event);
        Ok(())
    }

    /// Applies persisted events in ascending version order.
    ///
    /// Nothing is queued for persistence.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateMismatch` if an event names another
    /// aggregate, or whatever `apply` rejects.
    fn load_from_history(&mut self, events: &[DomainEvent<Self::Event>]) -> Result<(), DomainError> {
        let mut ordered: Vec<&DomainEvent<Self::Event>> = events.iter().collect();
        ordered.sort_by_key(|e| e.metadata.version);

        for event in ordered {
            if let Some(id) = self.aggregate_id() {
                if id != event.metadata.aggregate_id {
                    return Err(DomainError::AggregateMismatch {
                        expected: id,
                        actual: event.metadata.aggregate_id,
                    });
                }
            }
            self.apply(event)?;
            let core = self.core_mut();
            core.id.get_or_insert(event.metadata.aggregate_id);
            core.version = event.metadata.version;
        }
        Ok(())
    }

    /// Resets to the default state, then loads `events`.
    ///
    /// # Errors
    ///
    /// See [`load_from_history`](Self::load_from_history).
    fn replay_events(&mut self, events: &[DomainEvent<Self::Event>]) -> Result<(), DomainError> {
        *self = Self::default();
        self.load_from_history(events)
    }

    /// Clears uncommitted events after persistence.
    fn mark_events_as_committed(&mut self) {
        self.core_mut().uncommitted.clear();
    }
}

/// Aggregates whose state can be captured in a snapshot.
///
/// The serialized form must skip the [`AggregateCore`]; identity and version
/// travel on the [`Snapshot`] itself.
pub trait SnapshotAggregate: AggregateRoot + Serialize + DeserializeOwned {
    /// Captures the committed state of this aggregate.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the aggregate has no identity or
    /// holds uncommitted events, or `DomainError::Serialization` on encoding
    /// failure.
    fn to_snapshot(&self, taken_at: DateTime<Utc>) -> Result<Snapshot, DomainError> {
        let aggregate_id = self
            .aggregate_id()
            .ok_or_else(|| DomainError::Validation("cannot snapshot an aggregate without an id".into()))?;
        if !self.uncommitted_events().is_empty() {
            return Err(DomainError::Validation(
                "cannot snapshot an aggregate with uncommitted events".into(),
            ));
        }
        Ok(Snapshot {
            aggregate_id,
            aggregate_type: Self::aggregate_type().to_owned(),
            version: self.version(),
            state: serde_json::to_value(self)?,
            taken_at,
        })
    }

    /// Rebuilds an aggregate from a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the snapshot belongs to another
    /// aggregate type, or `DomainError::Serialization` if its state does not
    /// decode.
    fn from_snapshot(snapshot: &Snapshot) -> Result<Self, DomainError> {
        if snapshot.aggregate_type != Self::aggregate_type() {
            return Err(DomainError::Validation(format!(
                "snapshot of {} cannot restore {}",
                snapshot.aggregate_type,
                Self::aggregate_type()
            )));
        }
        let mut aggregate: Self = serde_json::from_value(snapshot.state.clone())?;
        aggregate.core_mut().restore(snapshot.aggregate_id, snapshot.version);
        Ok(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::event::EventContext;
    use crate::testing::{FixedClock, Other, Probe, ProbeAggregate, ProbeKind, fixed_now};

    fn touched(aggregate_id: Uuid, label: &str) -> DomainEvent<ProbeKind> {
        DomainEvent::new(
            aggregate_id,
            ProbeKind::Touched(Probe { label: label.into() }),
            &EventContext::new(Uuid::new_v4()),
            &FixedClock(fixed_now()),
        )
    }

    #[test]
    fn test_raise_event_assigns_next_version_and_queues_event() {
        // Arrange
        let id = Uuid::new_v4();
        let mut probe = ProbeAggregate::default();

        // Act
        probe.raise_event(touched(id, "a")).unwrap();
        probe.raise_event(touched(id, "b")).unwrap();

        // Assert
        assert_eq!(probe.aggregate_id(), Some(id));
        assert_eq!(probe.version(), 2);
        assert_eq!(probe.committed_version(), 0);
        assert_eq!(probe.labels, vec!["a", "b"]);
        let versions: Vec<i64> = probe.uncommitted_events().iter().map(DomainEvent::version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[test]
    fn test_raise_event_rejects_foreign_aggregate_id() {
        let mut probe = ProbeAggregate::default();
        probe.raise_event(touched(Uuid::new_v4(), "a")).unwrap();

        let result = probe.raise_event(touched(Uuid::new_v4(), "b"));

        assert!(matches!(result, Err(DomainError::AggregateMismatch { .. })));
        assert_eq!(probe.version(), 1);
        assert_eq!(probe.uncommitted_events().len(), 1);
    }

    #[test]
    fn test_raise_event_rejects_skipped_version() {
        let id = Uuid::new_v4();
        let mut probe = ProbeAggregate::default();

        let result = probe.raise_event(touched(id, "a").with_version(2));

        match result {
            Err(DomainError::VersionConflict { current, found }) => {
                assert_eq!(current, 0);
                assert_eq!(found, 2);
            }
            other => panic!("expected VersionConflict, got {other:?}"),
        }
        assert!(probe.uncommitted_events().is_empty());
    }

    #[test]
    fn test_apply_failure_leaves_aggregate_untouched() {
        let id = Uuid::new_v4();
        let mut probe = ProbeAggregate::default();
        probe.raise_event(touched(id, "a")).unwrap();
        let mut foreign = DomainEvent::new(
            id,
            ProbeKind::Reset(Other {}),
            &EventContext::new(Uuid::new_v4()),
            &FixedClock(fixed_now()),
        );
        foreign.metadata.aggregate_type = "somebody_else".into();

        let result = probe.raise_event(foreign);

        assert!(matches!(result, Err(DomainError::UnhandledEvent { .. })));
        assert_eq!(probe.version(), 1);
        assert_eq!(probe.labels, vec!["a"]);
    }

    #[test]
    fn test_load_from_history_sorts_and_does_not_queue() {
        let id = Uuid::new_v4();
        let history = vec![
            touched(id, "second").with_version(2),
            touched(id, "first").with_version(1),
        ];
        let mut probe = ProbeAggregate::default();

        probe.load_from_history(&history).unwrap();

        assert_eq!(probe.version(), 2);
        assert_eq!(probe.labels, vec!["first", "second"]);
        assert!(probe.uncommitted_events().is_empty());
    }

    #[test]
    fn test_replay_events_is_idempotent() {
        let id = Uuid::new_v4();
        let history = vec![
            touched(id, "a").with_version(1),
            touched(id, "b").with_version(2),
            touched(id, "c").with_version(3),
        ];
        let mut probe = ProbeAggregate::default();

        probe.replay_events(&history).unwrap();
        let first = probe.labels.clone();
        probe.replay_events(&history).unwrap();

        assert_eq!(probe.labels, first);
        assert_eq!(probe.version(), 3);
    }

    #[test]
    fn test_mark_events_as_committed_is_idempotent() {
        let mut probe = ProbeAggregate::default();
        probe.raise_event(touched(Uuid::new_v4(), "a")).unwrap();

        probe.mark_events_as_committed();
        probe.mark_events_as_committed();

        assert!(probe.uncommitted_events().is_empty());
        assert_eq!(probe.version(), 1);
        assert_eq!(probe.committed_version(), 1);
    }

    #[test]
    fn test_snapshot_round_trip_restores_state_and_version() {
        let id = Uuid::new_v4();
        let mut probe = ProbeAggregate::default();
        probe.raise_event(touched(id, "a")).unwrap();
        probe.raise_event(touched(id, "b")).unwrap();
        probe.mark_events_as_committed();

        let snapshot = probe.to_snapshot(fixed_now()).unwrap();
        let restored = ProbeAggregate::from_snapshot(&snapshot).unwrap();

        assert_eq!(snapshot.version, 2);
        assert_eq!(restored.aggregate_id(), Some(id));
        assert_eq!(restored.version(), 2);
        assert_eq!(restored.labels, probe.labels);
    }

    #[test]
    fn test_snapshot_requires_committed_state() {
        let mut probe = ProbeAggregate::default();
        probe.raise_event(touched(Uuid::new_v4(), "a")).unwrap();

        assert!(matches!(
            probe.to_snapshot(fixed_now()),
            Err(DomainError::Validation(_))
        ));
    }
}
