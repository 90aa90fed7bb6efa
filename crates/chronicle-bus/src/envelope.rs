//! Wire format for events on the broker.
//!
//! The body is the JSON [`StoredEvent`]; the logical event name and schema
//! version travel as headers so a consumer can route or reject a message
//! without parsing it.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use chronicle_core::error::DomainError;
use chronicle_core::registry::EventTypeRegistry;
use chronicle_core::store::StoredEvent;

use crate::dispatcher::ReceivedEvent;

/// Header carrying the logical event name.
pub const EVENT_NAME_HEADER: &str = "event-name";

/// Header carrying the event schema version.
pub const EVENT_VERSION_HEADER: &str = "event-version";

/// A broker message stripped down to what the consumer looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Value of the `event-name` header, if present.
    pub event_name: Option<String>,
    /// Value of the `event-version` header, if present.
    pub event_version: Option<String>,
    /// Message body.
    pub body: Bytes,
}

impl Envelope {
    /// Builds the envelope for publishing `event`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the event cannot be encoded.
    pub fn encode(event: &StoredEvent) -> Result<Self, DomainError> {
        Ok(Self {
            event_name: Some(event.event_type.clone()),
            event_version: Some(event.schema_version.to_string()),
            body: Bytes::from(serde_json::to_vec(event)?),
        })
    }

    /// Resolves the envelope through `registry` into an event ready for
    /// dispatch.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] naming why the message cannot be processed.
    /// None of these improve on redelivery.
    pub fn decode(&self, registry: &EventTypeRegistry) -> Result<ReceivedEvent, Rejection> {
        let name = self.event_name.as_deref().ok_or(Rejection::MissingEventName)?;
        if !registry.contains(name) {
            return Err(Rejection::UnknownEventType(name.to_owned()));
        }

        let stored: StoredEvent =
            serde_json::from_slice(&self.body).map_err(|e| Rejection::MalformedBody(e.to_string()))?;
        if stored.event_type != name {
            return Err(Rejection::NameMismatch {
                header: name.to_owned(),
                body: stored.event_type,
            });
        }
        if let Some(version) = self.event_version.as_deref() {
            let header: i32 = version
                .parse()
                .map_err(|_| Rejection::MalformedBody(format!("event-version header {version:?} is not a number")))?;
            if header != stored.schema_version {
                return Err(Rejection::VersionMismatch {
                    header,
                    body: stored.schema_version,
                });
            }
        }

        let registered = registry.check(&stored).map_err(Rejection::Unacceptable)?;
        let payload = registry
            .decode_any(name, stored.payload.clone())
            .map_err(Rejection::Unacceptable)?;

        Ok(ReceivedEvent::new(stored, registered, Arc::from(payload)))
    }
}

/// Why a message was skipped instead of dispatched.
#[derive(Debug, Error)]
pub enum Rejection {
    /// No `event-name` header.
    #[error("message has no {EVENT_NAME_HEADER} header")]
    MissingEventName,

    /// The header names an event this process does not know.
    #[error("unknown event type {0}")]
    UnknownEventType(String),

    /// The body is not a stored event.
    #[error("malformed message: {0}")]
    MalformedBody(String),

    /// Header and body disagree on the event name.
    #[error("header names {header} but body carries {body}")]
    NameMismatch {
        /// Name from the header.
        header: String,
        /// Name from the body.
        body: String,
    },

    /// Header and body disagree on the schema version.
    #[error("header carries schema version {header} but body carries {body}")]
    VersionMismatch {
        /// Version from the header.
        header: i32,
        /// Version from the body.
        body: i32,
    },

    /// The registry refused the event or its payload.
    #[error(transparent)]
    Unacceptable(DomainError),
}
