//! Seam between the consumer loop and the broker client.

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::BusError;

/// One message handed to the consumer, plus the means to settle it.
#[async_trait]
pub trait Delivery: Send {
    /// The message as received.
    fn envelope(&self) -> &Envelope;

    /// The message was processed; do not deliver it again.
    async fn commit(self: Box<Self>) -> Result<(), BusError>;

    /// The message can never be processed; drop it without redelivery.
    async fn skip(self: Box<Self>) -> Result<(), BusError>;

    /// Processing failed; deliver the message again later.
    async fn retry(self: Box<Self>) -> Result<(), BusError>;
}

/// A durable stream of deliveries for one consumer group.
#[async_trait]
pub trait MessageSource: Send {
    /// Waits for the next delivery. `None` means the source is closed.
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>, BusError>>;
}
