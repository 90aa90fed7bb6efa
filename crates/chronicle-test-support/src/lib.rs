//! Shared test doubles for the Chronicle event-sourcing crates.

mod clock;
mod log;
mod publisher;
mod store;

pub use clock::{FixedClock, fixed_now};
pub use log::InMemoryEventLog;
pub use publisher::{FailingPublisher, RecordingPublisher};
pub use store::{EmptyEventStore, FailingEventStore, InMemoryEventStore, RecordingEventStore};
