//! Test stores — `EventStore` implementations for tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronicle_core::error::DomainError;
use chronicle_core::registry::EventTypeRegistry;
use chronicle_core::store::{EventStore, PageRequest, Snapshot, StoredEvent, validate_batch};
use uuid::Uuid;

#[derive(Debug, Default)]
struct State {
    events: Vec<StoredEvent>,
    snapshots: Vec<Snapshot>,
    saved_batches: Vec<(Uuid, i64, Vec<StoredEvent>)>,
}

impl State {
    fn latest_version(&self, aggregate_id: Uuid) -> i64 {
        self.events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(0)
    }
}

/// An in-memory event store with the same append semantics as the
/// PostgreSQL store: the version check and the append happen under one lock,
/// so racing writers from the same expected version see exactly one success.
#[derive(Debug)]
pub struct InMemoryEventStore {
    registry: Arc<EventTypeRegistry>,
    state: Mutex<State>,
}

impl InMemoryEventStore {
    /// Creates an empty store that accepts the event types in `registry`.
    #[must_use]
    pub fn new(registry: Arc<EventTypeRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(State::default()),
        }
    }

    /// Inserts a row without any version or registry check. Used to build
    /// deliberately broken histories.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn insert_unchecked(&self, event: StoredEvent) {
        self.state.lock().unwrap().events.push(event);
    }

    /// Returns every successful `save_events` call as
    /// `(aggregate_id, expected_version, events)`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn saved_batches(&self) -> Vec<(Uuid, i64, Vec<StoredEvent>)> {
        self.state.lock().unwrap().saved_batches.clone()
    }

    /// Returns every stored snapshot in insertion order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.state.lock().unwrap().snapshots.clone()
    }

    fn select<F>(&self, filter: F) -> Vec<StoredEvent>
    where
        F: Fn(&StoredEvent) -> bool,
    {
        self.state
            .lock()
            .unwrap()
            .events
            .iter()
            .filter(|e| filter(e))
            .cloned()
            .collect()
    }

    fn check_registered(&self, rows: &[StoredEvent]) -> Result<(), DomainError> {
        for row in rows {
            self.registry.check(row)?;
        }
        Ok(())
    }

    fn page(mut rows: Vec<StoredEvent>, page: PageRequest) -> Result<Vec<StoredEvent>, DomainError> {
        let (limit, offset) = page.limit_offset()?;
        rows.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn get_events(&self, aggregate_id: Uuid, from_version: i64) -> Result<Vec<StoredEvent>, DomainError> {
        let mut rows = self.select(|e| e.aggregate_id == aggregate_id && e.version > from_version);
        rows.sort_by_key(|e| e.version);
        self.check_registered(&rows)?;
        Ok(rows)
    }

    async fn get_events_since(
        &self,
        aggregate_id: Uuid,
        from: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        let mut rows = self.select(|e| e.aggregate_id == aggregate_id && e.occurred_at >= from);
        rows.sort_by_key(|e| (e.occurred_at, e.version));
        self.check_registered(&rows)?;
        Ok(rows)
    }

    async fn get_events_by_type(&self, event_type: &str, page: PageRequest) -> Result<Vec<StoredEvent>, DomainError> {
        Self::page(self.select(|e| e.event_type == event_type), page)
    }

    async fn get_events_by_aggregate_type(
        &self,
        aggregate_type: &str,
        page: PageRequest,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Self::page(self.select(|e| e.aggregate_type == aggregate_type), page)
    }

    async fn get_events_by_user(&self, user_id: Uuid, page: PageRequest) -> Result<Vec<StoredEvent>, DomainError> {
        Self::page(self.select(|e| e.user_id == Some(user_id)), page)
    }

    async fn get_events_by_correlation_id(&self, correlation_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        let mut rows = self.select(|e| e.correlation_id == correlation_id);
        rows.sort_by_key(|e| e.occurred_at);
        Ok(rows)
    }

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
        self.check_registered(events)?;

        let mut state = self.state.lock().unwrap();
        let actual = state.latest_version(aggregate_id);
        if actual != expected_version {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id,
                expected: expected_version,
                actual,
            });
        }
        state.events.extend_from_slice(events);
        state
            .saved_batches
            .push((aggregate_id, expected_version, events.to_vec()));
        Ok(())
    }

    async fn save_event(&self, event: &StoredEvent) -> Result<(), DomainError> {
        self.registry.check(event)?;
        let mut state = self.state.lock().unwrap();
        let taken = state
            .events
            .iter()
            .any(|e| e.event_id == event.event_id || (e.aggregate_id == event.aggregate_id && e.version == event.version));
        if taken {
            return Err(DomainError::ConcurrencyConflict {
                aggregate_id: event.aggregate_id,
                expected: event.version - 1,
                actual: state.latest_version(event.aggregate_id),
            });
        }
        state.events.push(event.clone());
        Ok(())
    }

    async fn get_snapshot(&self, aggregate_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .snapshots
            .iter()
            .filter(|s| s.aggregate_id == aggregate_id)
            .max_by_key(|s| s.version)
            .cloned())
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), DomainError> {
        self.state.lock().unwrap().snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn event_exists(&self, event_id: Uuid) -> Result<bool, DomainError> {
        Ok(self.state.lock().unwrap().events.iter().any(|e| e.event_id == event_id))
    }

    async fn get_latest_version(&self, aggregate_id: Uuid) -> Result<i64, DomainError> {
        Ok(self.state.lock().unwrap().latest_version(aggregate_id))
    }
}

/// An event store that replays a fixed history and records every append
/// without checking versions. Useful for asserting what a command handler
/// wrote.
#[derive(Debug)]
pub struct RecordingEventStore {
    history: Vec<StoredEvent>,
    appended: Mutex<Vec<(Uuid, i64, Vec<StoredEvent>)>>,
}

impl RecordingEventStore {
    /// Creates a store whose reads return `history`.
    #[must_use]
    pub fn new(history: Vec<StoredEvent>) -> Self {
        Self {
            history,
            appended: Mutex::new(Vec::new()),
        }
    }

    /// Returns every `save_events` call as `(aggregate_id, expected_version, events)`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn appended_events(&self) -> Vec<(Uuid, i64, Vec<StoredEvent>)> {
        self.appended.lock().unwrap().clone()
    }

    fn matching<F>(&self, filter: F) -> Vec<StoredEvent>
    where
        F: Fn(&StoredEvent) -> bool,
    {
        self.history.iter().filter(|e| filter(e)).cloned().collect()
    }
}

#[async_trait]
impl EventStore for RecordingEventStore {
    async fn get_events(&self, aggregate_id: Uuid, from_version: i64) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(self.matching(|e| e.aggregate_id == aggregate_id && e.version > from_version))
    }

    async fn get_events_since(
        &self,
        aggregate_id: Uuid,
        from: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(self.matching(|e| e.aggregate_id == aggregate_id && e.occurred_at >= from))
    }

    async fn get_events_by_type(&self, event_type: &str, page: PageRequest) -> Result<Vec<StoredEvent>, DomainError> {
        InMemoryEventStore::page(self.matching(|e| e.event_type == event_type), page)
    }

    async fn get_events_by_aggregate_type(
        &self,
        aggregate_type: &str,
        page: PageRequest,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        InMemoryEventStore::page(self.matching(|e| e.aggregate_type == aggregate_type), page)
    }

    async fn get_events_by_user(&self, user_id: Uuid, page: PageRequest) -> Result<Vec<StoredEvent>, DomainError> {
        InMemoryEventStore::page(self.matching(|e| e.user_id == Some(user_id)), page)
    }

    async fn get_events_by_correlation_id(&self, correlation_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(self.matching(|e| e.correlation_id == correlation_id))
    }

    async fn save_events(
        &self,
        aggregate_id: Uuid,
        events: &[StoredEvent],
        expected_version: i64,
    ) -> Result<(), DomainError> {
        self.appended
            .lock()
            .unwrap()
            .push((aggregate_id, expected_version, events.to_vec()));
        Ok(())
    }

    async fn save_event(&self, event: &StoredEvent) -> Result<(), DomainError> {
        self.appended
            .lock()
            .unwrap()
            .push((event.aggregate_id, event.version - 1, vec![event.clone()]));
        Ok(())
    }

    async fn get_snapshot(&self, _aggregate_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        Ok(None)
    }

    async fn save_snapshot(&self, _snapshot: &Snapshot) -> Result<(), DomainError> {
        Ok(())
    }

    async fn event_exists(&self, event_id: Uuid) -> Result<bool, DomainError> {
        Ok(self.history.iter().any(|e| e.event_id == event_id))
    }

    async fn get_latest_version(&self, aggregate_id: Uuid) -> Result<i64, DomainError> {
        Ok(self
            .history
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(0))
    }
}

/// An event store that holds nothing and silently accepts writes. Useful for
/// "aggregate not found" scenarios.
#[derive(Debug)]
pub struct EmptyEventStore;

#[async_trait]
impl EventStore for EmptyEventStore {
    async fn get_events(&self, _aggregate_id: Uuid, _from_version: i64) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(vec![])
    }

    async fn get_events_since(
        &self,
        _aggregate_id: Uuid,
        _from: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(vec![])
    }

    async fn get_events_by_type(&self, _event_type: &str, _page: PageRequest) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(vec![])
    }

    async fn get_events_by_aggregate_type(
        &self,
        _aggregate_type: &str,
        _page: PageRequest,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(vec![])
    }

    async fn get_events_by_user(&self, _user_id: Uuid, _page: PageRequest) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(vec![])
    }

    async fn get_events_by_correlation_id(&self, _correlation_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(vec![])
    }

    async fn save_events(
        &self,
        _aggregate_id: Uuid,
        _events: &[StoredEvent],
        _expected_version: i64,
    ) -> Result<(), DomainError> {
        Ok(())
    }

    async fn save_event(&self, _event: &StoredEvent) -> Result<(), DomainError> {
        Ok(())
    }

    async fn get_snapshot(&self, _aggregate_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        Ok(None)
    }

    async fn save_snapshot(&self, _snapshot: &Snapshot) -> Result<(), DomainError> {
        Ok(())
    }

    async fn event_exists(&self, _event_id: Uuid) -> Result<bool, DomainError> {
        Ok(false)
    }

    async fn get_latest_version(&self, _aggregate_id: Uuid) -> Result<i64, DomainError> {
        Ok(0)
    }
}

/// An event store that always returns an infrastructure error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventStore;

fn refused<T>() -> Result<T, DomainError> {
    Err(DomainError::Infrastructure("connection refused".into()))
}

#[async_trait]
impl EventStore for FailingEventStore {
    async fn get_events(&self, _aggregate_id: Uuid, _from_version: i64) -> Result<Vec<StoredEvent>, DomainError> {
        refused()
    }

    async fn get_events_since(
        &self,
        _aggregate_id: Uuid,
        _from: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        refused()
    }

    async fn get_events_by_type(&self, _event_type: &str, _page: PageRequest) -> Result<Vec<StoredEvent>, DomainError> {
        refused()
    }

    async fn get_events_by_aggregate_type(
        &self,
        _aggregate_type: &str,
        _page: PageRequest,
    ) -> Result<Vec<StoredEvent>, DomainError> {
        refused()
    }

    async fn get_events_by_user(&self, _user_id: Uuid, _page: PageRequest) -> Result<Vec<StoredEvent>, DomainError> {
        refused()
    }

    async fn get_events_by_correlation_id(&self, _correlation_id: Uuid) -> Result<Vec<StoredEvent>, DomainError> {
        refused()
    }

    async fn save_events(
        &self,
        _aggregate_id: Uuid,
        _events: &[StoredEvent],
        _expected_version: i64,
    ) -> Result<(), DomainError> {
        refused()
    }

    async fn save_event(&self, _event: &StoredEvent) -> Result<(), DomainError> {
        refused()
    }

    async fn get_snapshot(&self, _aggregate_id: Uuid) -> Result<Option<Snapshot>, DomainError> {
        refused()
    }

    async fn save_snapshot(&self, _snapshot: &Snapshot) -> Result<(), DomainError> {
        refused()
    }

    async fn event_exists(&self, _event_id: Uuid) -> Result<bool, DomainError> {
        refused()
    }

    async fn get_latest_version(&self, _aggregate_id: Uuid) -> Result<i64, DomainError> {
        refused()
    }
}
