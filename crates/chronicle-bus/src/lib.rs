//! Chronicle Bus — moving committed events between processes.
//!
//! The publish side ([`publisher::JetStreamPublisher`]) puts each stored
//! event on one JetStream subject with `event-name` / `event-version`
//! headers and waits for the stream's acknowledgement. The consume side
//! ([`consumer::EventConsumer`]) pulls from a durable consumer group,
//! resolves each message through the event type registry, and fans it out
//! to in-process [`dispatcher::EventSubscriber`]s. Delivery is at-least-once.

pub mod consumer;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod local_log;
pub mod memory;
pub mod nats;
pub mod publisher;
pub mod transport;

#[cfg(test)]
mod fixtures;

pub use consumer::{CommitPolicy, ConsumerStats, EventConsumer, ParseCommitPolicyError};
pub use dispatcher::{DispatchOutcome, EventDispatcher, EventSubscriber, ReceivedEvent, SubscriberFailure};
pub use envelope::{EVENT_NAME_HEADER, EVENT_VERSION_HEADER, Envelope, Rejection};
pub use error::BusError;
pub use local_log::LocalEventLogHandler;
pub use memory::{AckOutcome, Acknowledgement, InMemoryBroker, InMemorySource};
pub use nats::{BrokerConfig, JetStreamSource};
pub use publisher::JetStreamPublisher;
pub use transport::{Delivery, MessageSource};
