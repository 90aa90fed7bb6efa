//! JetStream event publisher.

use std::time::Duration;

use async_nats::HeaderMap;
use async_nats::jetstream;
use async_trait::async_trait;

use chronicle_core::error::DomainError;
use chronicle_core::publish::EventPublisher;
use chronicle_core::store::StoredEvent;

use crate::envelope::{EVENT_NAME_HEADER, EVENT_VERSION_HEADER, Envelope};
use crate::nats::BrokerConfig;

/// Publishes stored events on the shared events subject and waits for the
/// stream to acknowledge each one.
#[derive(Clone)]
pub struct JetStreamPublisher {
    context: jetstream::Context,
    stream: String,
    subject: String,
    ack_timeout: Duration,
}

impl std::fmt::Debug for JetStreamPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JetStreamPublisher")
            .field("stream", &self.stream)
            .field("subject", &self.subject)
            .field("ack_timeout", &self.ack_timeout)
            .finish_non_exhaustive()
    }
}

impl JetStreamPublisher {
    /// Creates a publisher for the stream and subject in `config`.
    #[must_use]
    pub fn new(context: jetstream::Context, config: &BrokerConfig) -> Self {
        Self {
            context,
            stream: config.stream.clone(),
            subject: config.subject.clone(),
            ack_timeout: config.ack_timeout,
        }
    }
}

#[async_trait]
impl EventPublisher for JetStreamPublisher {
    #[tracing::instrument(skip(self, event), fields(event_id = %event.event_id, event_type = %event.event_type))]
    async fn publish(&self, event: &StoredEvent) -> Result<(), DomainError> {
        let envelope = Envelope::encode(event)?;
        let mut headers = HeaderMap::new();
        if let Some(name) = envelope.event_name.as_deref() {
            headers.insert(EVENT_NAME_HEADER, name);
        }
        if let Some(version) = envelope.event_version.as_deref() {
            headers.insert(EVENT_VERSION_HEADER, version);
        }

        let pending = self
            .context
            .publish_with_headers(self.subject.clone(), headers, envelope.body)
            .await
            .map_err(|e| DomainError::Infrastructure(format!("publish failed: {e}")))?;
        let ack = tokio::time::timeout(self.ack_timeout, pending.into_future())
            .await
            .map_err(|_| {
                DomainError::Infrastructure(format!(
                    "no acknowledgement from stream {} within {:?}",
                    self.stream, self.ack_timeout
                ))
            })?
            .map_err(|e| DomainError::Infrastructure(format!("publish not acknowledged: {e}")))?;

        confirm(&ack.stream, &self.stream)?;
        tracing::debug!(stream = %ack.stream, sequence = ack.sequence, duplicate = ack.duplicate, "event published");
        Ok(())
    }
}

/// Accepts an acknowledgement only from the stream we publish to.
fn confirm(acked_by: &str, expected: &str) -> Result<(), DomainError> {
    if acked_by == expected {
        Ok(())
    } else {
        Err(DomainError::Infrastructure(format!(
            "publish acknowledged by stream {acked_by}, expected {expected}"
        )))
    }
}
