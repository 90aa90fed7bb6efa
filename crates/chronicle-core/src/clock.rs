//! Clock abstraction for determinism.

use chrono::{DateTime, Utc};

use crate::error::DomainError;

/// Abstraction over system time for deterministic behavior.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Rejects timestamps that lie after `clock.now()`.
///
/// # Errors
///
/// Returns `DomainError::Validation` if `at` is in the future.
pub fn ensure_not_in_future(clock: &dyn Clock, at: DateTime<Utc>) -> Result<(), DomainError> {
    let now = clock.now();
    if at > now {
        return Err(DomainError::Validation(format!(
            "event timestamp {at} is in the future (now {now})"
        )));
    }
    Ok(())
}
