//! Command abstractions.

use uuid::Uuid;

use crate::event::EventContext;

/// Trait that all commands implement.
pub trait Command: Send + Sync + std::fmt::Debug {
    /// The type name for this command (for logging/routing).
    fn command_type(&self) -> &'static str;

    /// Correlation ID to trace this command through the system.
    fn correlation_id(&self) -> Uuid;

    /// The event or command that caused this one. Defaults to the
    /// correlation ID for commands that start an operation.
    fn causation_id(&self) -> Uuid {
        self.correlation_id()
    }

    /// The acting user, if known.
    fn user_id(&self) -> Option<Uuid> {
        None
    }

    /// Provenance for events raised while handling this command.
    fn event_context(&self) -> EventContext {
        let context = EventContext::new(self.correlation_id()).caused_by(self.causation_id());
        match self.user_id() {
            Some(user_id) => context.with_user(user_id),
            None => context,
        }
    }
}
