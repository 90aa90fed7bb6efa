//! Chronicle — Journal bounded context.
//!
//! A journal is a titled bag of JSON data that can be updated until it is
//! archived. It is small on purpose: it exercises the whole write path
//! (command, aggregate, store, broker) and the replay queries end to end.

pub mod application;
pub mod domain;

use chronicle_core::error::DomainError;
use chronicle_core::registry::EventTypeRegistry;

use crate::domain::events::JournalEventKind;

/// Registers the journal's events.
///
/// # Errors
///
/// Returns `DomainError::Validation` if a journal event name is already
/// registered.
pub fn register_events(registry: &mut EventTypeRegistry) -> Result<(), DomainError> {
    registry.register::<JournalEventKind>()?;
    Ok(())
}
