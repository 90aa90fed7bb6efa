//! Chronicle Event Store — `PostgreSQL` adapters for the core store traits.

pub mod pg_event_log;
pub mod pg_event_store;
pub mod schema;

pub use pg_event_log::PgEventLog;
pub use pg_event_store::PgEventStore;
