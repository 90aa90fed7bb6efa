//! Command handlers for the Journal context.
//!
//! Each handler loads the aggregate, runs one domain method, and saves the
//! resulting events through the [`AggregateRepository`], which appends them
//! under the version the aggregate was loaded at and publishes them.

use chronicle_core::clock::Clock;
use chronicle_core::command::Command;
use chronicle_core::error::DomainError;
use chronicle_core::store::StoredEvent;
use chronicle_replay::AggregateRepository;

use crate::domain::aggregates::Journal;
use crate::domain::commands::{ArchiveJournal, CreateJournal, UpdateJournalData};

/// Handles the `CreateJournal` command.
///
/// # Errors
///
/// Returns `DomainError::Validation` for a bad title and
/// `DomainError::ConcurrencyConflict` if a journal with this ID already
/// exists.
#[tracing::instrument(skip_all, fields(journal_id = %command.journal_id, correlation_id = %command.correlation_id))]
pub async fn handle_create_journal(
    command: &CreateJournal,
    clock: &dyn Clock,
    repository: &AggregateRepository,
) -> Result<Vec<StoredEvent>, DomainError> {
    let mut journal = Journal::create(
        command.journal_id,
        &command.title,
        command.data.clone(),
        &command.event_context(),
        clock,
    )?;
    repository.save(&mut journal).await
}

/// Handles the `UpdateJournalData` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for an unknown journal,
/// `DomainError::Validation` if the journal is archived or the update is
/// empty, and `DomainError::ConcurrencyConflict` if another writer saved
/// first.
#[tracing::instrument(skip_all, fields(journal_id = %command.journal_id, correlation_id = %command.correlation_id))]
pub async fn handle_update_journal_data(
    command: &UpdateJournalData,
    clock: &dyn Clock,
    repository: &AggregateRepository,
) -> Result<Vec<StoredEvent>, DomainError> {
    let mut journal: Journal = repository.load(command.journal_id).await?;
    journal.update_data(command.data.clone(), command.replace, &command.event_context(), clock)?;
    repository.save(&mut journal).await
}

/// Handles the `ArchiveJournal` command.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` for an unknown journal and
/// `DomainError::Validation` if it is already archived.
#[tracing::instrument(skip_all, fields(journal_id = %command.journal_id, correlation_id = %command.correlation_id))]
pub async fn handle_archive_journal(
    command: &ArchiveJournal,
    clock: &dyn Clock,
    repository: &AggregateRepository,
) -> Result<Vec<StoredEvent>, DomainError> {
    let mut journal: Journal = repository.load(command.journal_id).await?;
    journal.archive(command.reason.clone(), &command.event_context(), clock)?;
    repository.save(&mut journal).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chronicle_core::aggregate::AggregateRoot;
    use chronicle_core::event::DomainEvent;
    use chronicle_core::registry::EventTypeRegistry;
    use chronicle_core::store::EventStore;
    use chronicle_test_support::{
        EmptyEventStore, FailingPublisher, FixedClock, InMemoryEventStore, RecordingEventStore, RecordingPublisher,
        fixed_now,
    };
    use serde_json::{Map, Value, json};
    use uuid::Uuid;

    use super::*;
    use crate::domain::events::{JournalCreated, JournalEventKind};

    fn registry() -> Arc<EventTypeRegistry> {
        let mut registry = EventTypeRegistry::new();
        crate::register_events(&mut registry).unwrap();
        Arc::new(registry)
    }

    fn repository(store: Arc<dyn EventStore>, publisher: Arc<RecordingPublisher>) -> AggregateRepository {
        AggregateRepository::new(store, registry(), publisher, Arc::new(FixedClock(fixed_now())))
    }

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn create(journal_id: Uuid, correlation_id: Uuid) -> CreateJournal {
        CreateJournal {
            correlation_id,
            user_id: None,
            journal_id,
            title: "Field notes".into(),
            data: data(json!({"site": "ridge"})),
        }
    }

    fn update(journal_id: Uuid, value: Value) -> UpdateJournalData {
        UpdateJournalData {
            correlation_id: Uuid::new_v4(),
            causation_id: None,
            user_id: None,
            journal_id,
            data: data(value),
            replace: false,
        }
    }

    /// A stored `journal.created` at version 1.
    fn created_history(journal_id: Uuid) -> Vec<StoredEvent> {
        vec![
            DomainEvent::new(
                journal_id,
                JournalEventKind::Created(JournalCreated {
                    title: "Field notes".into(),
                    data: Map::new(),
                }),
                &chronicle_core::event::EventContext::new(Uuid::new_v4()),
                &FixedClock(fixed_now()),
            )
            .with_version(1)
            .to_stored()
            .unwrap(),
        ]
    }

    #[tokio::test]
    async fn test_handle_create_journal_persists_journal_created_event() {
        // Arrange
        let journal_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let store = Arc::new(RecordingEventStore::new(Vec::new()));
        let publisher = Arc::new(RecordingPublisher::new());
        let repository = repository(store.clone(), publisher.clone());
        let command = CreateJournal {
            user_id: Some(user_id),
            ..create(journal_id, correlation_id)
        };

        // Act
        let result = handle_create_journal(&command, &FixedClock(fixed_now()), &repository).await;

        // Assert
        assert!(result.is_ok());
        let appended = store.appended_events();
        assert_eq!(appended.len(), 1);
        let (agg_id, expected_version, events) = &appended[0];
        assert_eq!(*agg_id, journal_id);
        assert_eq!(*expected_version, 0);
        assert_eq!(events.len(), 1);

        let stored = &events[0];
        assert_eq!(stored.event_type, "journal.created");
        assert_eq!(stored.aggregate_type, "journal");
        assert_eq!(stored.aggregate_id, journal_id);
        assert_eq!(stored.version, 1);
        assert_eq!(stored.correlation_id, correlation_id);
        assert_eq!(stored.causation_id, correlation_id);
        assert_eq!(stored.user_id, Some(user_id));
        assert_eq!(stored.occurred_at, fixed_now());
        assert_eq!(publisher.published(), *events);
    }

    #[tokio::test]
    async fn test_handle_update_appends_under_loaded_version() {
        // Arrange
        let journal_id = Uuid::new_v4();
        let cause = Uuid::new_v4();
        let store = Arc::new(RecordingEventStore::new(created_history(journal_id)));
        let repository = repository(store.clone(), Arc::new(RecordingPublisher::new()));
        let command = UpdateJournalData {
            causation_id: Some(cause),
            ..update(journal_id, json!({"mood": "calm"}))
        };

        // Act
        let events = handle_update_journal_data(&command, &FixedClock(fixed_now()), &repository)
            .await
            .unwrap();

        // Assert
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "journal.data_updated");
        assert_eq!(events[0].schema_version, 2);
        assert_eq!(events[0].version, 2);
        assert_eq!(events[0].causation_id, cause);
        assert_eq!(store.appended_events()[0].1, 1);
    }

    #[tokio::test]
    async fn test_handle_update_for_missing_journal_is_not_found() {
        let repository = repository(Arc::new(EmptyEventStore), Arc::new(RecordingPublisher::new()));
        let journal_id = Uuid::new_v4();

        let result =
            handle_update_journal_data(&update(journal_id, json!({"a": 1})), &FixedClock(fixed_now()), &repository)
                .await;

        assert!(matches!(result, Err(DomainError::AggregateNotFound(id)) if id == journal_id));
    }

    #[tokio::test]
    async fn test_create_then_update_then_replay_to_first_version() {
        // Arrange: both events are raised before a single save at version 0.
        let registry = registry();
        let store = Arc::new(InMemoryEventStore::new(Arc::clone(&registry)));
        let repository = repository(store.clone(), Arc::new(RecordingPublisher::new()));
        let clock = FixedClock(fixed_now());
        let journal_id = Uuid::new_v4();
        let context = chronicle_core::event::EventContext::new(Uuid::new_v4());
        let mut journal = Journal::create(journal_id, "Notes", data(json!({"a": 1})), &context, &clock).unwrap();
        journal.update_data(data(json!({"b": 2})), false, &context, &clock).unwrap();

        // Act
        repository.save(&mut journal).await.unwrap();

        // Assert
        assert_eq!(store.saved_batches()[0].1, 0);
        assert_eq!(store.get_latest_version(journal_id).await.unwrap(), 2);
        let first: Journal = repository
            .replay()
            .replay_aggregate_to_version(journal_id, 1)
            .await
            .unwrap();
        assert_eq!(first.version(), 1);
        assert_eq!(Value::Object(first.data().clone()), json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_creating_existing_journal_conflicts() {
        let registry = registry();
        let store = Arc::new(InMemoryEventStore::new(Arc::clone(&registry)));
        let repository = repository(store, Arc::new(RecordingPublisher::new()));
        let journal_id = Uuid::new_v4();
        let clock = FixedClock(fixed_now());
        handle_create_journal(&create(journal_id, Uuid::new_v4()), &clock, &repository)
            .await
            .unwrap();

        let result = handle_create_journal(&create(journal_id, Uuid::new_v4()), &clock, &repository).await;

        assert!(matches!(
            result,
            Err(DomainError::ConcurrencyConflict { expected: 0, actual: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_archive_then_update_is_rejected() {
        let registry = registry();
        let store = Arc::new(InMemoryEventStore::new(Arc::clone(&registry)));
        let repository = repository(store.clone(), Arc::new(RecordingPublisher::new()));
        let journal_id = Uuid::new_v4();
        let clock = FixedClock(fixed_now());
        handle_create_journal(&create(journal_id, Uuid::new_v4()), &clock, &repository)
            .await
            .unwrap();
        let archive = ArchiveJournal {
            correlation_id: Uuid::new_v4(),
            user_id: None,
            journal_id,
            reason: Some("season over".into()),
        };

        handle_archive_journal(&archive, &clock, &repository).await.unwrap();
        let result = handle_update_journal_data(&update(journal_id, json!({"a": 1})), &clock, &repository).await;

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert_eq!(store.get_latest_version(journal_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_publish_failure_surfaces_after_events_are_stored() {
        let registry = registry();
        let store = Arc::new(InMemoryEventStore::new(Arc::clone(&registry)));
        let repository = AggregateRepository::new(
            store.clone(),
            registry,
            Arc::new(FailingPublisher),
            Arc::new(FixedClock(fixed_now())),
        );
        let journal_id = Uuid::new_v4();

        let result =
            handle_create_journal(&create(journal_id, Uuid::new_v4()), &FixedClock(fixed_now()), &repository).await;

        assert!(matches!(result, Err(DomainError::Infrastructure(_))));
        assert_eq!(store.get_latest_version(journal_id).await.unwrap(), 1);
    }
}
