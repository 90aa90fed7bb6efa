//! Journal use cases.

pub mod command_handlers;
pub mod query_handlers;
