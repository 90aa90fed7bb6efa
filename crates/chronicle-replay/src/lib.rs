//! Chronicle Replay — rebuilding aggregates from their event history.
//!
//! [`EventReplayService`] reconstructs aggregates at any version or point in
//! time and validates stored sequences. [`AggregateRepository`] is the
//! load / save / publish helper use-case handlers call.

pub mod replay;
pub mod repository;

#[cfg(test)]
mod fixtures;

pub use replay::{EventReplayService, HistoryRange, SequenceReport, SequenceViolation};
pub use repository::{AggregateRepository, SnapshotPolicy};
