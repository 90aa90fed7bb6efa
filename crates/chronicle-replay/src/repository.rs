//! Load / save / publish helper for use-case handlers.
//!
//! A handler loads an aggregate, calls a business method, and hands the
//! aggregate back to [`AggregateRepository::save`], which appends the
//! uncommitted events under the aggregate's committed version, marks them
//! committed, takes a snapshot when the policy says so, and publishes each
//! event to the broker.

use std::sync::Arc;

use uuid::Uuid;

use chronicle_core::aggregate::SnapshotAggregate;
use chronicle_core::clock::Clock;
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainEvent;
use chronicle_core::publish::EventPublisher;
use chronicle_core::registry::EventTypeRegistry;
use chronicle_core::store::{EventStore, StoredEvent};

use crate::replay::EventReplayService;

/// When [`AggregateRepository::save`] stores a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotPolicy {
    /// Never snapshot.
    #[default]
    Never,
    /// Snapshot whenever a save crosses a multiple of this many versions.
    Every(u32),
}

impl SnapshotPolicy {
    /// Returns `true` if moving from `before` to `after` crosses a snapshot
    /// boundary.
    #[must_use]
    pub fn should_snapshot(self, before: i64, after: i64) -> bool {
        match self {
            Self::Never | Self::Every(0) => false,
            Self::Every(n) => {
                let n = i64::from(n);
                after / n > before / n
            }
        }
    }
}

/// Loads and saves aggregates of any registered type.
pub struct AggregateRepository {
    store: Arc<dyn EventStore>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    replay: EventReplayService,
    snapshots: SnapshotPolicy,
}

impl std::fmt::Debug for AggregateRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateRepository")
            .field("snapshots", &self.snapshots)
            .finish_non_exhaustive()
    }
}

impl AggregateRepository {
    /// Creates a repository. Snapshots are off until
    /// [`Self::with_snapshot_policy`] is called.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        registry: Arc<EventTypeRegistry>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            replay: EventReplayService::new(Arc::clone(&store), registry),
            store,
            publisher,
            clock,
            snapshots: SnapshotPolicy::Never,
        }
    }

    /// Sets the snapshot policy.
    #[must_use]
    pub fn with_snapshot_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.snapshots = policy;
        self
    }

    /// The replay service this repository loads through.
    #[must_use]
    pub fn replay(&self) -> &EventReplayService {
        &self.replay
    }

    /// Loads an aggregate, starting from its latest snapshot if there is one.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` if the aggregate has no
    /// events, or any error from loading and applying them.
    pub async fn load<T: SnapshotAggregate>(&self, aggregate_id: Uuid) -> Result<T, DomainError> {
        let aggregate: T = self.replay.load_aggregate(aggregate_id).await?;
        if aggregate.version() == 0 {
            return Err(DomainError::AggregateNotFound(aggregate_id));
        }
        Ok(aggregate)
    }

    /// Persists and publishes the aggregate's uncommitted events, returning
    /// them in stored form. Saving an aggregate with nothing pending is a
    /// no-op.
    ///
    /// The events are marked committed as soon as the append succeeds, so a
    /// publish failure leaves the aggregate consistent with the store.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if another writer got there
    /// first, or the publisher's error if the broker does not acknowledge.
    #[tracing::instrument(skip(self, aggregate), fields(aggregate_type = T::aggregate_type()))]
    pub async fn save<T: SnapshotAggregate>(&self, aggregate: &mut T) -> Result<Vec<StoredEvent>, DomainError> {
        let stored = aggregate
            .uncommitted_events()
            .iter()
            .map(DomainEvent::to_stored)
            .collect::<Result<Vec<_>, _>>()?;
        if stored.is_empty() {
            return Ok(stored);
        }
        let aggregate_id = aggregate
            .aggregate_id()
            .ok_or_else(|| DomainError::Validation("cannot save an aggregate without an id".into()))?;
        let expected_version = aggregate.committed_version();

        self.store.save_events(aggregate_id, &stored, expected_version).await?;
        aggregate.mark_events_as_committed();
        tracing::info!(%aggregate_id, version = aggregate.version(), count = stored.len(), "events saved");

        if self.snapshots.should_snapshot(expected_version, aggregate.version()) {
            self.snapshot(aggregate).await;
        }

        self.publisher.publish_all(&stored).await?;
        Ok(stored)
    }

    async fn snapshot<T: SnapshotAggregate>(&self, aggregate: &T) {
        let result = match aggregate.to_snapshot(self.clock.now()) {
            Ok(snapshot) => self.store.save_snapshot(&snapshot).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            tracing::warn!(error = %err, "snapshot not saved");
        }
    }
}

#[cfg(test)]
mod tests {
    use chronicle_core::aggregate::AggregateRoot;
    use chronicle_test_support::{FailingPublisher, FixedClock, InMemoryEventStore, RecordingPublisher, fixed_now};

    use super::*;
    use crate::fixtures::{Tally, registry};

    struct Harness {
        store: Arc<InMemoryEventStore>,
        publisher: Arc<RecordingPublisher>,
        repository: AggregateRepository,
    }

    fn harness(policy: SnapshotPolicy) -> Harness {
        let registry = registry();
        let store = Arc::new(InMemoryEventStore::new(Arc::clone(&registry)));
        let publisher = Arc::new(RecordingPublisher::new());
        let repository = AggregateRepository::new(
            store.clone(),
            registry,
            publisher.clone(),
            Arc::new(FixedClock(fixed_now())),
        )
        .with_snapshot_policy(policy);
        Harness {
            store,
            publisher,
            repository,
        }
    }

    #[test]
    fn test_snapshot_policy_boundaries() {
        assert!(!SnapshotPolicy::Never.should_snapshot(0, 100));
        assert!(!SnapshotPolicy::Every(0).should_snapshot(0, 100));
        assert!(SnapshotPolicy::Every(3).should_snapshot(2, 3));
        assert!(SnapshotPolicy::Every(3).should_snapshot(1, 7));
        assert!(!SnapshotPolicy::Every(3).should_snapshot(3, 5));
    }

    #[tokio::test]
    async fn test_save_persists_publishes_and_commits() {
        // Arrange
        let h = harness(SnapshotPolicy::Never);
        let clock = FixedClock(fixed_now());
        let id = Uuid::new_v4();
        let mut tally = Tally::open(id, "beans", &clock).unwrap();
        tally.add(2, &clock).unwrap();

        // Act
        let saved = h.repository.save(&mut tally).await.unwrap();

        // Assert
        assert_eq!(saved.len(), 2);
        assert!(tally.uncommitted_events().is_empty());
        assert_eq!(tally.committed_version(), 2);
        assert_eq!(h.store.get_latest_version(id).await.unwrap(), 2);
        assert_eq!(h.publisher.published(), saved);
        let batches = h.store.saved_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1, 0);
    }

    #[tokio::test]
    async fn test_save_with_nothing_pending_is_noop() {
        let h = harness(SnapshotPolicy::Never);
        let mut tally = Tally::default();

        let saved = h.repository.save(&mut tally).await.unwrap();

        assert!(saved.is_empty());
        assert!(h.store.saved_batches().is_empty());
        assert!(h.publisher.published().is_empty());
    }

    #[tokio::test]
    async fn test_load_missing_aggregate_is_not_found() {
        let h = harness(SnapshotPolicy::Never);
        let id = Uuid::new_v4();

        let result = h.repository.load::<Tally>(id).await;

        assert!(matches!(result, Err(DomainError::AggregateNotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn test_second_save_uses_committed_version() {
        let h = harness(SnapshotPolicy::Never);
        let clock = FixedClock(fixed_now());
        let id = Uuid::new_v4();
        let mut tally = Tally::open(id, "beans", &clock).unwrap();
        h.repository.save(&mut tally).await.unwrap();

        let mut loaded: Tally = h.repository.load(id).await.unwrap();
        loaded.add(3, &clock).unwrap();
        h.repository.save(&mut loaded).await.unwrap();

        let batches = h.store.saved_batches();
        assert_eq!(batches[1].1, 1);
        assert_eq!(loaded.version(), 2);
    }

    #[tokio::test]
    async fn test_racing_handlers_from_same_version_yield_one_conflict() {
        // Arrange: aggregate at version 2, loaded by two handlers.
        let h = harness(SnapshotPolicy::Never);
        let clock = FixedClock(fixed_now());
        let id = Uuid::new_v4();
        let mut tally = Tally::open(id, "beans", &clock).unwrap();
        tally.add(1, &clock).unwrap();
        h.repository.save(&mut tally).await.unwrap();

        let mut first: Tally = h.repository.load(id).await.unwrap();
        let mut second: Tally = h.repository.load(id).await.unwrap();
        assert_eq!(first.committed_version(), 2);
        assert_eq!(second.committed_version(), 2);
        first.add(10, &clock).unwrap();
        second.add(20, &clock).unwrap();

        // Act
        let (a, b) = tokio::join!(h.repository.save(&mut first), h.repository.save(&mut second));

        // Assert
        assert!(a.is_ok() ^ b.is_ok());
        let loser = if a.is_err() { a } else { b };
        assert!(matches!(
            loser,
            Err(DomainError::ConcurrencyConflict { expected: 2, actual: 3, .. })
        ));
        assert_eq!(h.store.get_latest_version(id).await.unwrap(), 3);
        let report = h.repository.replay().validate_event_sequence(id).await.unwrap();
        assert!(report.is_valid());
        assert_eq!(h.publisher.published().len(), 3);
    }

    #[tokio::test]
    async fn test_snapshot_policy_stores_snapshot_on_boundary() {
        let h = harness(SnapshotPolicy::Every(2));
        let clock = FixedClock(fixed_now());
        let id = Uuid::new_v4();
        let mut tally = Tally::open(id, "beans", &clock).unwrap();
        h.repository.save(&mut tally).await.unwrap();
        assert!(h.store.snapshots().is_empty());

        tally.add(4, &clock).unwrap();
        h.repository.save(&mut tally).await.unwrap();

        let snapshots = h.store.snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].version, 2);
        assert_eq!(snapshots[0].taken_at, fixed_now());
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported_after_commit() {
        let registry = registry();
        let store = Arc::new(InMemoryEventStore::new(Arc::clone(&registry)));
        let repository = AggregateRepository::new(
            store.clone(),
            registry,
            Arc::new(FailingPublisher),
            Arc::new(FixedClock(fixed_now())),
        );
        let id = Uuid::new_v4();
        let mut tally = Tally::open(id, "beans", &FixedClock(fixed_now())).unwrap();

        let result = repository.save(&mut tally).await;

        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
        assert_eq!(store.get_latest_version(id).await.unwrap(), 1);
        assert!(tally.uncommitted_events().is_empty());
    }
}
