//! Minimal aggregate and event kind used by this crate's unit tests.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateCore, AggregateRoot, SnapshotAggregate};
use crate::clock::Clock;
use crate::error::DomainError;
use crate::event::{DomainEvent, EventKind};
use crate::registry::EventDescriptor;

pub(crate) fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
}

pub(crate) struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Probe {
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Other {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum ProbeKind {
    Touched(Probe),
    Reset(Other),
}

impl EventKind for ProbeKind {
    const AGGREGATE_TYPE: &'static str = "probe";

    fn event_type(&self) -> &'static str {
        match self {
            Self::Touched(_) => "probe.touched",
            Self::Reset(_) => "probe.reset",
        }
    }

    fn schema_version(&self) -> i32 {
        match self {
            Self::Touched(_) => 2,
            Self::Reset(_) => 1,
        }
    }

    fn to_payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Touched(p) => serde_json::to_value(p),
            Self::Reset(p) => serde_json::to_value(p),
        }
    }

    fn descriptors() -> Vec<EventDescriptor<Self>> {
        vec![
            EventDescriptor::new("probe.touched", 2, |v| {
                serde_json::from_value(v).map(Self::Touched)
            }),
            EventDescriptor::new("probe.reset", 1, |v| serde_json::from_value(v).map(Self::Reset)),
        ]
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct ProbeAggregate {
    #[serde(skip)]
    core: AggregateCore<ProbeKind>,
    pub labels: Vec<String>,
}

impl AggregateRoot for ProbeAggregate {
    type Event = ProbeKind;

    fn core(&self) -> &AggregateCore<ProbeKind> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AggregateCore<ProbeKind> {
        &mut self.core
    }

    fn apply(&mut self, event: &DomainEvent<ProbeKind>) -> Result<(), DomainError> {
        if event.metadata.aggregate_type != Self::aggregate_type() {
            return Err(DomainError::UnhandledEvent {
                aggregate_type: Self::aggregate_type().to_owned(),
                event_type: event.metadata.event_type.clone(),
            });
        }
        match &event.kind {
            ProbeKind::Touched(p) => self.labels.push(p.label.clone()),
            ProbeKind::Reset(_) => self.labels.clear(),
        }
        Ok(())
    }
}

impl SnapshotAggregate for ProbeAggregate {}
