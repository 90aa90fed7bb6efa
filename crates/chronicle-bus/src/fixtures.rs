//! A beacon event kind shared by the bus tests.

use std::sync::Arc;

use chronicle_core::event::{DomainEvent, EventContext, EventKind};
use chronicle_core::registry::{EventDescriptor, EventTypeRegistry};
use chronicle_core::store::StoredEvent;
use chronicle_test_support::FixedClock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Pinged {
    pub strength: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Silenced {}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BeaconKind {
    Pinged(Pinged),
    Silenced(Silenced),
}

impl EventKind for BeaconKind {
    const AGGREGATE_TYPE: &'static str = "beacon";

    fn event_type(&self) -> &'static str {
        match self {
            Self::Pinged(_) => "beacon.pinged",
            Self::Silenced(_) => "beacon.silenced",
        }
    }

    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Pinged(p) => serde_json::to_value(p),
            Self::Silenced(p) => serde_json::to_value(p),
        }
    }

    fn descriptors() -> Vec<EventDescriptor<Self>> {
        vec![
            EventDescriptor::new("beacon.pinged", 1, |v| serde_json::from_value(v).map(Self::Pinged)),
            EventDescriptor::new("beacon.silenced", 1, |v| serde_json::from_value(v).map(Self::Silenced)),
        ]
    }
}

pub(crate) fn registry() -> Arc<EventTypeRegistry> {
    Arc::new(EventTypeRegistry::new().with::<BeaconKind>().unwrap())
}

/// A stored ping at `version` for a fresh beacon.
pub(crate) fn ping(version: i64) -> StoredEvent {
    DomainEvent::new(
        Uuid::new_v4(),
        BeaconKind::Pinged(Pinged { strength: 7 }),
        &EventContext::new(Uuid::new_v4()),
        &FixedClock::default(),
    )
    .with_version(version)
    .to_stored()
    .unwrap()
}
