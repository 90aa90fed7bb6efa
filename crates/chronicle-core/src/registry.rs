//! Event type registry.
//!
//! Maps every logical event name known to the process onto its owning
//! aggregate type, schema version, and payload decoder. The registry is built
//! once during startup and shared (behind an `Arc`) by the event store, the
//! replay service, and the broker consumer. Nothing is discovered at runtime:
//! an `EventKind` lists its own variants in [`EventKind::descriptors`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::error::DomainError;
use crate::event::{DomainEvent, EventKind, EventMetadata};
use crate::store::StoredEvent;

/// Decodes a variant payload into its `EventKind`.
pub type Decoder<K> = fn(Value) -> Result<K, serde_json::Error>;

/// A type-erased decoded payload.
pub type AnyPayload = Box<dyn Any + Send + Sync>;

type ErasedDecoder = Box<dyn Fn(Value) -> Result<AnyPayload, serde_json::Error> + Send + Sync>;

/// One registrable event variant.
pub struct EventDescriptor<K> {
    /// Logical event name.
    pub event_type: &'static str,
    /// Current schema version of the payload.
    pub schema_version: i32,
    /// Payload decoder.
    pub decode: Decoder<K>,
}

impl<K> EventDescriptor<K> {
    /// Creates a descriptor.
    #[must_use]
    pub const fn new(event_type: &'static str, schema_version: i32, decode: Decoder<K>) -> Self {
        Self {
            event_type,
            schema_version,
            decode,
        }
    }
}

/// Public facts about a registered event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredEventType {
    /// Logical event name.
    pub event_type: &'static str,
    /// Owning aggregate type.
    pub aggregate_type: &'static str,
    /// Current schema version.
    pub schema_version: i32,
}

struct Registration {
    info: RegisteredEventType,
    kind: TypeId,
    decode: ErasedDecoder,
}

/// Explicit mapping from logical event name to decoder.
#[derive(Default)]
pub struct EventTypeRegistry {
    entries: HashMap<&'static str, Registration>,
}

impl fmt::Debug for EventTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTypeRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

impl EventTypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every variant of `K`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if a name is already registered.
    pub fn register<K: EventKind>(&mut self) -> Result<&mut Self, DomainError> {
        for descriptor in K::descriptors() {
            if self.entries.contains_key(descriptor.event_type) {
                return Err(DomainError::Validation(format!(
                    "event type {} registered twice",
                    descriptor.event_type
                )));
            }
            let decode = descriptor.decode;
            self.entries.insert(
                descriptor.event_type,
                Registration {
                    info: RegisteredEventType {
                        event_type: descriptor.event_type,
                        aggregate_type: K::AGGREGATE_TYPE,
                        schema_version: descriptor.schema_version,
                    },
                    kind: TypeId::of::<K>(),
                    decode: Box::new(move |payload| decode(payload).map(|k| Box::new(k) as AnyPayload)),
                },
            );
        }
        Ok(self)
    }

    /// Consuming form of [`register`](Self::register) for builder-style setup.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if a name is already registered.
    pub fn with<K: EventKind>(mut self) -> Result<Self, DomainError> {
        self.register::<K>()?;
        Ok(self)
    }

    /// Returns `true` if `event_type` is registered.
    #[must_use]
    pub fn contains(&self, event_type: &str) -> bool {
        self.entries.contains_key(event_type)
    }

    /// Returns the number of registered event names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns all registered names, sorted.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Looks up a registered event name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnknownEventType` if the name is not registered.
    pub fn resolve(&self, event_type: &str) -> Result<RegisteredEventType, DomainError> {
        self.entries
            .get(event_type)
            .map(|r| r.info)
            .ok_or_else(|| DomainError::UnknownEventType(event_type.to_owned()))
    }

    /// Checks that a stored row names a registered event of the right
    /// aggregate type and a schema version this process understands.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnknownEventType` for unregistered names and
    /// `DomainError::Validation` for mismatched aggregate types or schema
    /// versions newer than the registered one.
    pub fn check(&self, stored: &StoredEvent) -> Result<RegisteredEventType, DomainError> {
        let info = self.resolve(&stored.event_type)?;
        if info.aggregate_type != stored.aggregate_type {
            return Err(DomainError::Validation(format!(
                "event type {} belongs to aggregate type {}, not {}",
                info.event_type, info.aggregate_type, stored.aggregate_type
            )));
        }
        if stored.schema_version > info.schema_version {
            return Err(DomainError::Validation(format!(
                "event type {} has schema version {}, newest known is {}",
                info.event_type, stored.schema_version, info.schema_version
            )));
        }
        Ok(info)
    }

    /// Decodes a payload into its registered shape without naming the type.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnknownEventType` if the name is not registered
    /// and `DomainError::Serialization` if the payload does not fit.
    pub fn decode_any(&self, event_type: &str, payload: Value) -> Result<AnyPayload, DomainError> {
        let registration = self
            .entries
            .get(event_type)
            .ok_or_else(|| DomainError::UnknownEventType(event_type.to_owned()))?;
        (registration.decode)(payload).map_err(|e| {
            DomainError::Serialization(format!("cannot decode {event_type}: {e}"))
        })
    }

    /// Decodes a stored row into a typed domain event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnknownEventType` for unregistered names,
    /// `DomainError::UnhandledEvent` if the name belongs to another
    /// `EventKind`, and `DomainError::Serialization` on payload mismatch.
    pub fn decode<K: EventKind>(&self, stored: &StoredEvent) -> Result<DomainEvent<K>, DomainError> {
        self.check(stored)?;
        let registration = self
            .entries
            .get(stored.event_type.as_str())
            .ok_or_else(|| DomainError::UnknownEventType(stored.event_type.clone()))?;
        if registration.kind != TypeId::of::<K>() {
            return Err(DomainError::UnhandledEvent {
                aggregate_type: K::AGGREGATE_TYPE.to_owned(),
                event_type: stored.event_type.clone(),
            });
        }
        let payload = self.decode_any(&stored.event_type, stored.payload.clone())?;
        let kind = payload.downcast::<K>().map_err(|_| DomainError::UnhandledEvent {
            aggregate_type: K::AGGREGATE_TYPE.to_owned(),
            event_type: stored.event_type.clone(),
        })?;
        Ok(DomainEvent {
            metadata: EventMetadata::from_stored(stored),
            kind: *kind,
        })
    }

    /// Decodes a batch of stored rows, failing on the first bad row.
    ///
    /// # Errors
    ///
    /// See [`decode`](Self::decode).
    pub fn decode_all<K: EventKind>(&self, stored: &[StoredEvent]) -> Result<Vec<DomainEvent<K>>, DomainError> {
        stored.iter().map(|s| self.decode(s)).collect()
    }
}
