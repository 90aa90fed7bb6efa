//! Chronicle Core — event-sourcing abstractions.
//!
//! This crate defines domain events, the aggregate root contract, the event
//! type registry, and the store/publisher traits every adapter implements.
//! It contains no infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod publish;
pub mod registry;
pub mod store;

#[cfg(test)]
mod testing;
