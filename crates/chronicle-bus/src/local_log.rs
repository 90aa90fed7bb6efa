//! Durable local record of every event this process observes.

use std::sync::Arc;

use async_trait::async_trait;

use chronicle_core::clock::Clock;
use chronicle_core::error::DomainError;
use chronicle_core::store::{EventLog, LocalLogEntry};

use crate::dispatcher::{EventSubscriber, ReceivedEvent};

/// Subscriber that appends each received event to an [`EventLog`].
///
/// Redelivered events are recognised by `event_id` and logged once.
pub struct LocalEventLogHandler {
    log: Arc<dyn EventLog>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for LocalEventLogHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEventLogHandler").finish_non_exhaustive()
    }
}

impl LocalEventLogHandler {
    /// Creates a handler writing to `log`, stamping entries with `clock`.
    #[must_use]
    pub fn new(log: Arc<dyn EventLog>, clock: Arc<dyn Clock>) -> Self {
        Self { log, clock }
    }
}

#[async_trait]
impl EventSubscriber for LocalEventLogHandler {
    fn name(&self) -> &str {
        "local-event-log"
    }

    async fn handle(&self, event: &ReceivedEvent) -> Result<(), DomainError> {
        let stored = event.stored();
        if self.log.contains(stored.event_id).await? {
            tracing::debug!(event_id = %stored.event_id, "event already logged");
            return Ok(());
        }

        let entry = LocalLogEntry {
            event_id: stored.event_id,
            event_name: stored.event_type.clone(),
            event_version: stored.schema_version,
            aggregate_id: stored.aggregate_id,
            body: serde_json::to_value(stored)?,
            observed_at: self.clock.now(),
        };
        self.log.append(&entry).await?;
        tracing::info!(
            event_id = %entry.event_id,
            event_name = %entry.event_name,
            aggregate_id = %entry.aggregate_id,
            "event logged locally"
        );
        Ok(())
    }
}
