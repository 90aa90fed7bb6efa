//! In-memory local event log.

use std::sync::Mutex;

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::store::{EventLog, LocalLogEntry};
use uuid::Uuid;

/// An `EventLog` that keeps entries in memory. Appends are idempotent on
/// `event_id`, like the PostgreSQL log.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    entries: Mutex<Vec<LocalLogEntry>>,
}

impl InMemoryEventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every logged entry in append order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn entries(&self) -> Vec<LocalLogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, entry: &LocalLogEntry) -> Result<(), DomainError> {
        let mut entries = self.entries.lock().unwrap();
        if !entries.iter().any(|e| e.event_id == entry.event_id) {
            entries.push(entry.clone());
        }
        Ok(())
    }

    async fn contains(&self, event_id: Uuid) -> Result<bool, DomainError> {
        Ok(self.entries.lock().unwrap().iter().any(|e| e.event_id == event_id))
    }
}
