//! Domain events for the Journal context.

use chronicle_core::event::EventKind;
use chronicle_core::registry::EventDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Emitted when a journal is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalCreated {
    /// The journal's title.
    pub title: String,
    /// Initial data.
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Emitted when a journal's data changes.
///
/// Schema version 2 added `replace`; version 1 payloads decode with
/// `replace = false`, which is how version 1 updates behaved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalDataUpdated {
    /// Keys to set. A `null` value removes the key.
    pub data: Map<String, Value>,
    /// Replace the whole data map instead of merging into it.
    #[serde(default)]
    pub replace: bool,
}

/// Emitted when a journal is archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalArchived {
    /// Why it was archived, if anyone said.
    pub reason: Option<String>,
}

/// Event payload variants for the Journal context.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalEventKind {
    /// A journal has been created.
    Created(JournalCreated),
    /// A journal's data has been updated.
    DataUpdated(JournalDataUpdated),
    /// A journal has been archived.
    Archived(JournalArchived),
}

impl EventKind for JournalEventKind {
    const AGGREGATE_TYPE: &'static str = "journal";

    fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => "journal.created",
            Self::DataUpdated(_) => "journal.data_updated",
            Self::Archived(_) => "journal.archived",
        }
    }

    fn schema_version(&self) -> i32 {
        match self {
            Self::DataUpdated(_) => 2,
            Self::Created(_) | Self::Archived(_) => 1,
        }
    }

    fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Created(p) => serde_json::to_value(p),
            Self::DataUpdated(p) => serde_json::to_value(p),
            Self::Archived(p) => serde_json::to_value(p),
        }
    }

    fn descriptors() -> Vec<EventDescriptor<Self>> {
        vec![
            EventDescriptor::new("journal.created", 1, |v| serde_json::from_value(v).map(Self::Created)),
            EventDescriptor::new("journal.data_updated", 2, |v| {
                serde_json::from_value(v).map(Self::DataUpdated)
            }),
            EventDescriptor::new("journal.archived", 1, |v| serde_json::from_value(v).map(Self::Archived)),
        ]
    }
}
