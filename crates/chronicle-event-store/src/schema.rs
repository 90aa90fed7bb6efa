//! Event store database schema.
//!
//! The tables live in `migrations/` at the workspace root so that
//! `#[sqlx::test]` and the worker apply the same DDL.

use chronicle_core::error::DomainError;
use sqlx::PgPool;
use sqlx::migrate::Migrator;

/// Migrations creating `domain_events`, `aggregate_snapshots`, and
/// `local_event_log`.
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Applies any pending migrations.
///
/// # Errors
///
/// Returns `DomainError::Infrastructure` if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), DomainError> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| DomainError::Infrastructure(format!("migration failed: {e}")))?;
    tracing::info!("event store migrations applied");
    Ok(())
}
