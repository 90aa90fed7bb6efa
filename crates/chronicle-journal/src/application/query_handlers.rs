//! Query handlers for the Journal context.
//!
//! These rebuild journals from the event store and return read-only views.

use chrono::{DateTime, Utc};
use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::error::DomainError;
use chronicle_core::store::StoredEvent;
use chronicle_replay::{AggregateRepository, EventReplayService, HistoryRange};
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::aggregates::Journal;

/// Read-only view of a journal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalView {
    /// The journal identifier.
    pub journal_id: Uuid,
    /// The journal's title.
    pub title: String,
    /// Current data.
    pub data: Map<String, Value>,
    /// Whether the journal is archived.
    pub archived: bool,
    /// Why it was archived.
    pub archive_reason: Option<String>,
    /// Version the view reflects.
    pub version: i64,
}

impl JournalView {
    fn of(journal_id: Uuid, journal: &Journal) -> Self {
        Self {
            journal_id,
            title: journal.title.clone(),
            data: journal.data.clone(),
            archived: journal.archived,
            archive_reason: journal.archive_reason.clone(),
            version: journal.version(),
        }
    }
}

/// Retrieves a journal at its latest version.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if no events exist for the ID.
pub async fn get_journal_by_id(
    journal_id: Uuid,
    repository: &AggregateRepository,
) -> Result<JournalView, DomainError> {
    let journal: Journal = repository.load(journal_id).await?;
    Ok(JournalView::of(journal_id, &journal))
}

/// Retrieves a journal as it was at `version`.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the journal did not exist at
/// that version.
pub async fn get_journal_at_version(
    journal_id: Uuid,
    version: i64,
    replay: &EventReplayService,
) -> Result<JournalView, DomainError> {
    let journal: Journal = replay.replay_aggregate_to_version(journal_id, version).await?;
    if journal.version() == 0 {
        return Err(DomainError::AggregateNotFound(journal_id));
    }
    Ok(JournalView::of(journal_id, &journal))
}

/// Retrieves a journal as it was at `at`.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the journal did not exist yet.
pub async fn get_journal_at(
    journal_id: Uuid,
    at: DateTime<Utc>,
    replay: &EventReplayService,
) -> Result<JournalView, DomainError> {
    let journal: Journal = replay.replay_aggregate_to_timestamp(journal_id, at).await?;
    if journal.version() == 0 {
        return Err(DomainError::AggregateNotFound(journal_id));
    }
    Ok(JournalView::of(journal_id, &journal))
}

/// Lists the stored events of a journal in version order.
///
/// # Errors
///
/// Returns `DomainError` if the store cannot be read.
pub async fn get_journal_history(
    journal_id: Uuid,
    range: HistoryRange,
    replay: &EventReplayService,
) -> Result<Vec<StoredEvent>, DomainError> {
    replay.get_event_history(journal_id, range).await
}
