//! NATS JetStream transport.
//!
//! One stream captures the shared events subject. Each process type reads it
//! through a durable pull consumer with explicit acknowledgement, so a
//! restarted process resumes where its group left off.

use std::time::Duration;

use async_nats::jetstream::{self, AckKind, consumer::pull, stream};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::envelope::{EVENT_NAME_HEADER, EVENT_VERSION_HEADER, Envelope};
use crate::error::BusError;
use crate::transport::{Delivery, MessageSource};

/// Default broker URL.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";
/// Default stream name.
pub const DEFAULT_STREAM: &str = "CHRONICLE_EVENTS";
/// Default events subject.
pub const DEFAULT_SUBJECT: &str = "chronicle.events";
/// Default durable consumer group.
pub const DEFAULT_CONSUMER_GROUP: &str = "chronicle-local-log";

/// Where events live on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// NATS server URL.
    pub url: String,
    /// JetStream stream name.
    pub stream: String,
    /// Subject every event is published on.
    pub subject: String,
    /// Durable consumer name shared by every instance of this process type.
    pub consumer_group: String,
    /// How long a publish waits for the stream's acknowledgement.
    pub ack_timeout: Duration,
    /// Retention window for the stream.
    pub max_age: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_NATS_URL.to_owned(),
            stream: DEFAULT_STREAM.to_owned(),
            subject: DEFAULT_SUBJECT.to_owned(),
            consumer_group: DEFAULT_CONSUMER_GROUP.to_owned(),
            ack_timeout: Duration::from_secs(5),
            max_age: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

impl BrokerConfig {
    /// Connects to the broker and returns a JetStream context.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Connect` if the server cannot be reached.
    pub async fn connect(&self) -> Result<jetstream::Context, BusError> {
        let client = async_nats::connect(self.url.as_str())
            .await
            .map_err(|e| BusError::Connect(format!("{}: {e}", self.url)))?;
        tracing::info!(url = %self.url, "connected to NATS");
        Ok(jetstream::new(client))
    }

    /// Creates the events stream if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Stream` if the stream cannot be looked up or
    /// created.
    pub async fn ensure_stream(&self, context: &jetstream::Context) -> Result<stream::Stream, BusError> {
        let stream = context
            .get_or_create_stream(stream::Config {
                name: self.stream.clone(),
                subjects: vec![self.subject.clone()],
                max_age: self.max_age,
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Stream(format!("{}: {e}", self.stream)))?;
        tracing::info!(stream = %self.stream, subject = %self.subject, "stream ready");
        Ok(stream)
    }
}

/// Durable pull subscription on the events stream.
pub struct JetStreamSource {
    messages: BoxStream<'static, Result<jetstream::Message, BusError>>,
}

impl std::fmt::Debug for JetStreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JetStreamSource").finish_non_exhaustive()
    }
}

impl JetStreamSource {
    /// Binds to the configured consumer group, creating the durable consumer
    /// on first use.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Consumer` if the consumer cannot be created or its
    /// message stream opened.
    pub async fn connect(stream: &stream::Stream, config: &BrokerConfig) -> Result<Self, BusError> {
        let consumer: jetstream::consumer::PullConsumer = stream
            .get_or_create_consumer(
                &config.consumer_group,
                pull::Config {
                    durable_name: Some(config.consumer_group.clone()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    filter_subject: config.subject.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::Consumer(format!("{}: {e}", config.consumer_group)))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BusError::Consumer(e.to_string()))?
            .map(|message| message.map_err(|e| BusError::Receive(e.to_string())))
            .boxed();
        tracing::info!(consumer_group = %config.consumer_group, "consumer bound");
        Ok(Self { messages })
    }
}

#[async_trait]
impl MessageSource for JetStreamSource {
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>, BusError>> {
        self.messages
            .next()
            .await
            .map(|message| message.map(|m| Box::new(JetStreamDelivery::new(m)) as Box<dyn Delivery>))
    }
}

struct JetStreamDelivery {
    envelope: Envelope,
    message: jetstream::Message,
}

impl JetStreamDelivery {
    fn new(message: jetstream::Message) -> Self {
        let header = |name: &str| {
            message
                .headers
                .as_ref()
                .and_then(|headers| headers.get(name))
                .map(|value| value.as_str().to_owned())
        };
        let envelope = Envelope {
            event_name: header(EVENT_NAME_HEADER),
            event_version: header(EVENT_VERSION_HEADER),
            body: message.payload.clone(),
        };
        Self { envelope, message }
    }

    async fn ack(self, kind: AckKind) -> Result<(), BusError> {
        self.message
            .ack_with(kind)
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    async fn commit(self: Box<Self>) -> Result<(), BusError> {
        (*self).ack(AckKind::Ack).await
    }

    async fn skip(self: Box<Self>) -> Result<(), BusError> {
        (*self).ack(AckKind::Term).await
    }

    async fn retry(self: Box<Self>) -> Result<(), BusError> {
        (*self).ack(AckKind::Nak(None)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();

        assert_eq!(config.url, "nats://localhost:4222");
        assert_eq!(config.stream, "CHRONICLE_EVENTS");
        assert_eq!(config.subject, "chronicle.events");
        assert_eq!(config.consumer_group, "chronicle-local-log");
    }
}
