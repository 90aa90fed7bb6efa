//! Commands for the Journal context.

use chronicle_core::command::Command;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Command to create a new journal.
#[derive(Debug, Clone)]
pub struct CreateJournal {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The acting user, if known.
    pub user_id: Option<Uuid>,
    /// The identifier the new journal will have.
    pub journal_id: Uuid,
    /// The journal's title.
    pub title: String,
    /// Initial data.
    pub data: Map<String, Value>,
}

/// Command to change a journal's data.
#[derive(Debug, Clone)]
pub struct UpdateJournalData {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The event or command that caused this update, if any.
    pub causation_id: Option<Uuid>,
    /// The acting user, if known.
    pub user_id: Option<Uuid>,
    /// The journal identifier.
    pub journal_id: Uuid,
    /// Keys to set; `null` removes a key.
    pub data: Map<String, Value>,
    /// Replace the data instead of merging.
    pub replace: bool,
}

/// Command to archive a journal.
#[derive(Debug, Clone)]
pub struct ArchiveJournal {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The acting user, if known.
    pub user_id: Option<Uuid>,
    /// The journal identifier.
    pub journal_id: Uuid,
    /// Why the journal is being archived.
    pub reason: Option<String>,
}

impl Command for CreateJournal {
    fn command_type(&self) -> &'static str {
        "journal.create"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }
}

impl Command for UpdateJournalData {
    fn command_type(&self) -> &'static str {
        "journal.update_data"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn causation_id(&self) -> Uuid {
        self.causation_id.unwrap_or(self.correlation_id)
    }

    fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }
}

impl Command for ArchiveJournal {
    fn command_type(&self) -> &'static str {
        "journal.archive"
    }

    fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    fn user_id(&self) -> Option<Uuid> {
        self.user_id
    }
}
