//! Outbound event distribution.

use async_trait::async_trait;

use crate::error::DomainError;
use crate::store::StoredEvent;

/// Publishes committed events to consumers outside the process.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event. Returns only after the broker has confirmed
    /// durable receipt.
    async fn publish(&self, event: &StoredEvent) -> Result<(), DomainError>;

    /// Publishes events in order, stopping at the first failure.
    async fn publish_all(&self, events: &[StoredEvent]) -> Result<(), DomainError> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}
