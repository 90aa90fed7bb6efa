//! A small tally aggregate shared by the replay and repository tests.

use std::sync::Arc;

use chronicle_core::aggregate::{AggregateCore, AggregateRoot, SnapshotAggregate};
use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, EventContext, EventKind};
use chronicle_core::registry::{EventDescriptor, EventTypeRegistry};
use chronicle_test_support::FixedClock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Opened {
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Added {
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TallyKind {
    Opened(Opened),
    Added(Added),
}

impl EventKind for TallyKind {
    const AGGREGATE_TYPE: &'static str = "tally";

    fn event_type(&self) -> &'static str {
        match self {
            Self::Opened(_) => "tally.opened",
            Self::Added(_) => "tally.added",
        }
    }

    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Opened(p) => serde_json::to_value(p),
            Self::Added(p) => serde_json::to_value(p),
        }
    }

    fn descriptors() -> Vec<EventDescriptor<Self>> {
        vec![
            EventDescriptor::new("tally.opened", 1, |v| serde_json::from_value(v).map(Self::Opened)),
            EventDescriptor::new("tally.added", 1, |v| serde_json::from_value(v).map(Self::Added)),
        ]
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Tally {
    #[serde(skip)]
    core: AggregateCore<TallyKind>,
    pub label: String,
    pub total: i64,
}

impl Tally {
    pub fn open(id: Uuid, label: &str, clock: &FixedClock) -> Result<Self, DomainError> {
        let mut tally = Self::default();
        tally.raise_event(DomainEvent::new(
            id,
            TallyKind::Opened(Opened { label: label.into() }),
            &EventContext::new(Uuid::new_v4()),
            clock,
        ))?;
        Ok(tally)
    }

    pub fn add(&mut self, amount: i64, clock: &FixedClock) -> Result<(), DomainError> {
        let id = self
            .aggregate_id()
            .ok_or_else(|| DomainError::Validation("tally has not been opened".into()))?;
        self.raise_event(DomainEvent::new(
            id,
            TallyKind::Added(Added { amount }),
            &EventContext::new(Uuid::new_v4()),
            clock,
        ))
    }
}

impl AggregateRoot for Tally {
    type Event = TallyKind;

    fn core(&self) -> &AggregateCore<TallyKind> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AggregateCore<TallyKind> {
        &mut self.core
    }

    fn apply(&mut self, event: &DomainEvent<TallyKind>) -> Result<(), DomainError> {
        match &event.kind {
            TallyKind::Opened(p) => self.label.clone_from(&p.label),
            TallyKind::Added(p) => self.total += p.amount,
        }
        Ok(())
    }
}

impl SnapshotAggregate for Tally {}

pub(crate) fn registry() -> Arc<EventTypeRegistry> {
    Arc::new(EventTypeRegistry::new().with::<TallyKind>().unwrap())
}
