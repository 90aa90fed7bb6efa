//! Aggregate roots for the Journal context.

use chronicle_core::aggregate::{AggregateCore, AggregateRoot, SnapshotAggregate};
use chronicle_core::clock::Clock;
use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, EventContext};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::events::{JournalArchived, JournalCreated, JournalDataUpdated, JournalEventKind};

/// Longest title a journal may carry, in characters.
pub const MAX_TITLE_LEN: usize = 200;

/// The aggregate root for a journal.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Journal {
    #[serde(skip)]
    core: AggregateCore<JournalEventKind>,
    /// The journal's title.
    pub(crate) title: String,
    /// Current data.
    pub(crate) data: Map<String, Value>,
    /// Whether the journal is archived.
    pub(crate) archived: bool,
    /// Why it was archived.
    pub(crate) archive_reason: Option<String>,
}

impl Journal {
    /// Creates a journal, producing a `JournalCreated` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the title is blank or too long.
    pub fn create(
        id: Uuid,
        title: &str,
        data: Map<String, Value>,
        context: &EventContext,
        clock: &dyn Clock,
    ) -> Result<Self, DomainError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(DomainError::Validation("journal title must not be empty".into()));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(DomainError::Validation(format!(
                "journal title must be at most {MAX_TITLE_LEN} characters"
            )));
        }

        let mut journal = Self::default();
        journal.raise_event(DomainEvent::new(
            id,
            JournalEventKind::Created(JournalCreated {
                title: title.to_owned(),
                data,
            }),
            context,
            clock,
        ))?;
        Ok(journal)
    }

    /// Merges `data` into the journal (or replaces it), producing a
    /// `JournalDataUpdated` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the journal does not exist yet,
    /// is archived, or nothing would change.
    pub fn update_data(
        &mut self,
        data: Map<String, Value>,
        replace: bool,
        context: &EventContext,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        let id = self.writable_id()?;
        if data.is_empty() && !replace {
            return Err(DomainError::Validation("journal update carries no data".into()));
        }
        self.raise_event(DomainEvent::new(
            id,
            JournalEventKind::DataUpdated(JournalDataUpdated { data, replace }),
            context,
            clock,
        ))
    }

    /// Archives the journal, producing a `JournalArchived` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the journal does not exist yet
    /// or is already archived.
    pub fn archive(
        &mut self,
        reason: Option<String>,
        context: &EventContext,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        let id = self.writable_id()?;
        self.raise_event(DomainEvent::new(
            id,
            JournalEventKind::Archived(JournalArchived { reason }),
            context,
            clock,
        ))
    }

    /// The journal's title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// The journal's current data.
    #[must_use]
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Returns `true` once the journal is archived.
    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.archived
    }

    fn writable_id(&self) -> Result<Uuid, DomainError> {
        let id = self
            .aggregate_id()
            .ok_or_else(|| DomainError::Validation("journal has not been created".into()))?;
        if self.archived {
            return Err(DomainError::Validation(format!("journal {id} is archived")));
        }
        Ok(id)
    }
}

impl AggregateRoot for Journal {
    type Event = JournalEventKind;

    fn core(&self) -> &AggregateCore<JournalEventKind> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AggregateCore<JournalEventKind> {
        &mut self.core
    }

    fn apply(&mut self, event: &DomainEvent<JournalEventKind>) -> Result<(), DomainError> {
        match &event.kind {
            JournalEventKind::Created(payload) => {
                if self.aggregate_id().is_some() {
                    return Err(DomainError::Validation(format!(
                        "journal {} created twice",
                        event.metadata.aggregate_id
                    )));
                }
                self.title.clone_from(&payload.title);
                self.data.clone_from(&payload.data);
            }
            JournalEventKind::DataUpdated(payload) => {
                if payload.replace {
                    self.data.clear();
                }
                for (key, value) in &payload.data {
                    if value.is_null() {
                        self.data.remove(key);
                    } else {
                        self.data.insert(key.clone(), value.clone());
                    }
                }
            }
            JournalEventKind::Archived(payload) => {
                self.archived = true;
                self.archive_reason.clone_from(&payload.reason);
            }
        }
        Ok(())
    }
}

impl SnapshotAggregate for Journal {}

#[cfg(test)]
mod tests {
    use chronicle_test_support::{FixedClock, fixed_now};
    use serde_json::json;

    use super::*;

    fn context() -> EventContext {
        EventContext::new(Uuid::new_v4())
    }

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_create_produces_journal_created_event() {
        // Arrange
        let id = Uuid::new_v4();
        let clock = FixedClock(fixed_now());
        let context = context();

        // Act
        let journal = Journal::create(id, "  Field notes ", map(json!({"site": "ridge"})), &context, &clock).unwrap();

        // Assert
        assert_eq!(journal.aggregate_id(), Some(id));
        assert_eq!(journal.version(), 1);
        assert_eq!(journal.committed_version(), 0);
        assert_eq!(journal.title(), "Field notes");
        let events = journal.uncommitted_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "journal.created");
        assert_eq!(events[0].metadata.correlation_id, context.correlation_id);
        assert_eq!(events[0].metadata.occurred_at, fixed_now());
    }

    #[test]
    fn test_create_rejects_blank_title() {
        let result = Journal::create(Uuid::new_v4(), "   ", Map::new(), &context(), &FixedClock(fixed_now()));

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_create_rejects_overlong_title() {
        let title = "x".repeat(MAX_TITLE_LEN + 1);

        let result = Journal::create(Uuid::new_v4(), &title, Map::new(), &context(), &FixedClock(fixed_now()));

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_update_merges_and_null_removes() {
        let clock = FixedClock(fixed_now());
        let mut journal =
            Journal::create(Uuid::new_v4(), "Notes", map(json!({"a": 1, "b": 2})), &context(), &clock).unwrap();

        journal
            .update_data(map(json!({"b": null, "c": 3})), false, &context(), &clock)
            .unwrap();

        assert_eq!(Value::Object(journal.data().clone()), json!({"a": 1, "c": 3}));
        assert_eq!(journal.version(), 2);
    }

    #[test]
    fn test_update_with_replace_discards_old_keys() {
        let clock = FixedClock(fixed_now());
        let mut journal = Journal::create(Uuid::new_v4(), "Notes", map(json!({"a": 1})), &context(), &clock).unwrap();

        journal.update_data(map(json!({"z": true})), true, &context(), &clock).unwrap();

        assert_eq!(Value::Object(journal.data().clone()), json!({"z": true}));
    }

    #[test]
    fn test_update_before_create_is_rejected() {
        let mut journal = Journal::default();

        let result = journal.update_data(map(json!({"a": 1})), false, &context(), &FixedClock(fixed_now()));

        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert!(journal.uncommitted_events().is_empty());
    }

    #[test]
    fn test_archived_journal_rejects_changes() {
        let clock = FixedClock(fixed_now());
        let mut journal = Journal::create(Uuid::new_v4(), "Notes", Map::new(), &context(), &clock).unwrap();
        journal.archive(Some("done".into()), &context(), &clock).unwrap();

        let update = journal.update_data(map(json!({"a": 1})), false, &context(), &clock);
        let archive = journal.archive(None, &context(), &clock);

        assert!(journal.is_archived());
        assert!(matches!(update, Err(DomainError::Validation(_))));
        assert!(matches!(archive, Err(DomainError::Validation(_))));
        assert_eq!(journal.version(), 2);
    }

    #[test]
    fn test_snapshot_keeps_state_and_version() {
        let clock = FixedClock(fixed_now());
        let mut journal = Journal::create(Uuid::new_v4(), "Notes", map(json!({"a": 1})), &context(), &clock).unwrap();
        journal.mark_events_as_committed();

        let snapshot = journal.to_snapshot(fixed_now()).unwrap();
        let restored = Journal::from_snapshot(&snapshot).unwrap();

        assert_eq!(restored.title(), "Notes");
        assert_eq!(restored.version(), 1);
        assert_eq!(restored.aggregate_id(), journal.aggregate_id());
    }
}
