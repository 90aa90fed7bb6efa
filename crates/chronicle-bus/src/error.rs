//! Transport error types.

use chronicle_core::error::DomainError;
use thiserror::Error;

/// Errors raised by the broker transport itself, as opposed to problems with
/// an individual message.
#[derive(Debug, Error)]
pub enum BusError {
    /// Could not reach the broker.
    #[error("broker connection failed: {0}")]
    Connect(String),

    /// The stream could not be found or created.
    #[error("stream setup failed: {0}")]
    Stream(String),

    /// The durable consumer could not be found, created, or read.
    #[error("consumer error: {0}")]
    Consumer(String),

    /// A message could not be received.
    #[error("receive failed: {0}")]
    Receive(String),

    /// A commit, skip, or retry could not be sent to the broker.
    #[error("acknowledgement failed: {0}")]
    Ack(String),
}

impl From<BusError> for DomainError {
    fn from(err: BusError) -> Self {
        DomainError::Infrastructure(err.to_string())
    }
}
