//! In-process broker for tests and single-process runs.
//!
//! Messages wait in a FIFO queue until the consumer takes them. Every
//! settlement is recorded so tests can assert what the consumer decided; a
//! retried message goes to the back of the queue and is delivered again.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use chronicle_core::error::DomainError;
use chronicle_core::publish::EventPublisher;
use chronicle_core::store::StoredEvent;

use crate::envelope::Envelope;
use crate::error::BusError;
use crate::transport::{Delivery, MessageSource};

/// How the consumer settled one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Processed and committed.
    Committed,
    /// Rejected without redelivery.
    Skipped,
    /// Handed back for redelivery.
    Retried,
}

/// A recorded settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    /// The `event-name` header of the settled message.
    pub event_name: Option<String>,
    /// What the consumer did with it.
    pub outcome: AckOutcome,
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<Envelope>,
    acknowledgements: Vec<Acknowledgement>,
    closed: bool,
    source_taken: bool,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    ready: Notify,
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, State>, BusError> {
        self.state
            .lock()
            .map_err(|_| BusError::Receive("in-memory broker state poisoned".into()))
    }

    fn enqueue(&self, envelope: Envelope) -> Result<(), BusError> {
        let mut state = self.lock()?;
        if state.closed {
            return Err(BusError::Stream("in-memory broker is closed".into()));
        }
        state.queue.push_back(envelope);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    fn settle(&self, envelope: Envelope, outcome: AckOutcome) -> Result<(), BusError> {
        let mut state = self.lock()?;
        state.acknowledgements.push(Acknowledgement {
            event_name: envelope.event_name.clone(),
            outcome,
        });
        if outcome == AckOutcome::Retried {
            state.queue.push_back(envelope);
            drop(state);
            self.ready.notify_one();
        }
        Ok(())
    }
}

/// A broker living in process memory with a single consumer.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    /// Creates an empty, open broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a message as-is, headers included.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Stream` once the broker is closed.
    pub fn publish_raw(&self, envelope: Envelope) -> Result<(), BusError> {
        self.shared.enqueue(envelope)
    }

    /// Stops accepting messages. The source drains what is queued and then
    /// reports the end of the stream.
    pub fn close(&self) {
        if let Ok(mut state) = self.shared.lock() {
            state.closed = true;
        }
        self.shared.ready.notify_one();
    }

    /// Takes the broker's only consumer-side handle.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Consumer` if the source was already taken.
    pub fn source(&self) -> Result<InMemorySource, BusError> {
        let mut state = self.shared.lock()?;
        if state.source_taken {
            return Err(BusError::Consumer("in-memory source already taken".into()));
        }
        state.source_taken = true;
        Ok(InMemorySource {
            shared: Arc::clone(&self.shared),
        })
    }

    /// Every settlement so far, in order.
    #[must_use]
    pub fn acknowledgements(&self) -> Vec<Acknowledgement> {
        self.shared
            .lock()
            .map(|state| state.acknowledgements.clone())
            .unwrap_or_default()
    }

    /// Number of messages waiting for delivery.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.lock().map(|state| state.queue.len()).unwrap_or_default()
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, event: &StoredEvent) -> Result<(), DomainError> {
        self.publish_raw(Envelope::encode(event)?)?;
        Ok(())
    }
}

/// Consumer side of an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemorySource {
    shared: Arc<Shared>,
}

#[async_trait]
impl MessageSource for InMemorySource {
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>, BusError>> {
        loop {
            {
                let mut state = match self.shared.lock() {
                    Ok(state) => state,
                    Err(err) => return Some(Err(err)),
                };
                if let Some(envelope) = state.queue.pop_front() {
                    return Some(Ok(Box::new(InMemoryDelivery {
                        envelope,
                        shared: Arc::clone(&self.shared),
                    })));
                }
                if state.closed {
                    return None;
                }
            }
            self.shared.ready.notified().await;
        }
    }
}

struct InMemoryDelivery {
    envelope: Envelope,
    shared: Arc<Shared>,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    async fn commit(self: Box<Self>) -> Result<(), BusError> {
        self.shared.settle(self.envelope, AckOutcome::Committed)
    }

    async fn skip(self: Box<Self>) -> Result<(), BusError> {
        self.shared.settle(self.envelope, AckOutcome::Skipped)
    }

    async fn retry(self: Box<Self>) -> Result<(), BusError> {
        self.shared.settle(self.envelope, AckOutcome::Retried)
    }
}
