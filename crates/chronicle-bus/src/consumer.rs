//! The long-lived consume loop.
//!
//! [`EventConsumer::run`] pulls deliveries from a [`MessageSource`], resolves
//! each one through the event type registry, fans it out through the
//! [`EventDispatcher`], and settles it with the broker. Nothing a single
//! message does can end the loop; only cancellation or a closed source does.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::Instrument;
use tokio_util::sync::CancellationToken;

use chronicle_core::registry::EventTypeRegistry;

use crate::dispatcher::EventDispatcher;
use crate::error::BusError;
use crate::transport::{Delivery, MessageSource};

const TRANSPORT_BACKOFF: Duration = Duration::from_secs(1);

/// What to do with a message when at least one subscriber failed on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitPolicy {
    /// Commit anyway. The failure is logged and counted.
    #[default]
    LogAndContinue,
    /// Negative-acknowledge so the broker delivers the message again.
    RedeliverOnFailure,
}

impl fmt::Display for CommitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LogAndContinue => "log-and-continue",
            Self::RedeliverOnFailure => "redeliver-on-failure",
        })
    }
}

/// Unrecognised commit policy name.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown commit policy {0:?} (expected log-and-continue or redeliver-on-failure)")]
pub struct ParseCommitPolicyError(String);

impl FromStr for CommitPolicy {
    type Err = ParseCommitPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "log-and-continue" => Ok(Self::LogAndContinue),
            "redeliver-on-failure" => Ok(Self::RedeliverOnFailure),
            other => Err(ParseCommitPolicyError(other.to_owned())),
        }
    }
}

/// Counters for one run of the consume loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Deliveries taken off the source.
    pub received: u64,
    /// Messages dispatched and committed.
    pub processed: u64,
    /// Messages rejected before dispatch.
    pub skipped: u64,
    /// Messages handed back to the broker for redelivery.
    pub redelivered: u64,
    /// Individual subscriber failures, across all messages.
    pub subscriber_failures: u64,
    /// Receive and settlement errors.
    pub transport_errors: u64,
}

/// Consumes one durable subscription until cancelled.
pub struct EventConsumer<S> {
    source: S,
    handler: MessageHandler,
}

/// The per-message half of the consumer. Kept apart from the source so the
/// run future only needs the source to be `Send`.
#[derive(Debug)]
struct MessageHandler {
    registry: Arc<EventTypeRegistry>,
    dispatcher: EventDispatcher,
    policy: CommitPolicy,
}

impl<S> fmt::Debug for EventConsumer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventConsumer")
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

impl<S: MessageSource> EventConsumer<S> {
    /// Creates a consumer over `source`.
    #[must_use]
    pub fn new(
        source: S,
        registry: Arc<EventTypeRegistry>,
        dispatcher: EventDispatcher,
        policy: CommitPolicy,
    ) -> Self {
        Self {
            source,
            handler: MessageHandler {
                registry,
                dispatcher,
                policy,
            },
        }
    }

    /// Runs until `token` is cancelled or the source closes.
    ///
    /// Cancellation is observed only between messages: a message that has
    /// been received is always dispatched and settled first.
    pub async fn run(self, token: CancellationToken) -> ConsumerStats {
        let Self { mut source, handler } = self;
        let mut stats = ConsumerStats::default();
        tracing::info!(
            policy = %handler.policy,
            subscribers = handler.dispatcher.len(),
            "consumer started"
        );

        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => break,
                next = source.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(err)) => {
                    stats.transport_errors += 1;
                    tracing::error!(error = %err, "receive failed");
                    tokio::select! {
                        biased;
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(TRANSPORT_BACKOFF) => continue,
                    }
                }
                None => {
                    tracing::warn!("message source closed");
                    break;
                }
            };

            stats.received += 1;
            handler.process(delivery, &mut stats).await;
        }

        tracing::info!(
            received = stats.received,
            processed = stats.processed,
            skipped = stats.skipped,
            redelivered = stats.redelivered,
            subscriber_failures = stats.subscriber_failures,
            transport_errors = stats.transport_errors,
            "consumer stopped"
        );
        stats
    }
}

impl MessageHandler {
    async fn process(&self, delivery: Box<dyn Delivery>, stats: &mut ConsumerStats) {
        let received = match delivery.envelope().decode(&self.registry) {
            Ok(received) => received,
            Err(rejection) => {
                tracing::warn!(
                    event_name = delivery.envelope().event_name.as_deref().unwrap_or("<none>"),
                    reason = %rejection,
                    "message skipped"
                );
                stats.skipped += 1;
                settle(delivery.skip().await, stats);
                return;
            }
        };

        let span = tracing::info_span!(
            "dispatch",
            event_id = %received.stored().event_id,
            event_type = received.event_type(),
            aggregate_id = %received.stored().aggregate_id,
        );
        let outcome = self.dispatcher.dispatch(&received).instrument(span).await;
        stats.subscriber_failures += outcome.failures.len() as u64;

        if outcome.is_success() || self.policy == CommitPolicy::LogAndContinue {
            stats.processed += 1;
            settle(delivery.commit().await, stats);
        } else {
            stats.redelivered += 1;
            tracing::info!(event_id = %received.stored().event_id, "message returned for redelivery");
            settle(delivery.retry().await, stats);
        }
    }
}

fn settle(result: Result<(), BusError>, stats: &mut ConsumerStats) {
    if let Err(err) = result {
        stats.transport_errors += 1;
        tracing::error!(error = %err, "could not settle message");
    }
}
