//! Chronicle worker — error types.

use chronicle_bus::BusError;
use chronicle_core::error::DomainError;
use thiserror::Error;

use crate::config::ConfigError;

/// Startup and runtime errors for the worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The environment is missing or has invalid settings.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Broker connection or provisioning error.
    #[error("broker error: {0}")]
    Bus(#[from] BusError),

    /// Migration, registry, or other domain-level failure.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The tracing pipeline could not be installed.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// The consumer task panicked or was aborted.
    #[error("consumer task failed: {0}")]
    Task(String),
}
