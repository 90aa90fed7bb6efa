//! Chronicle worker — process wiring.
//!
//! Connects the `PostgreSQL` store and the NATS broker, applies migrations,
//! provisions the events stream and this process's durable consumer, and
//! runs the local event log consumer until Ctrl-C.

pub mod config;
pub mod error;
pub mod telemetry;

use std::sync::Arc;

use chronicle_bus::{
    ConsumerStats, EventConsumer, EventDispatcher, JetStreamPublisher, JetStreamSource, LocalEventLogHandler,
};
use chronicle_core::clock::SystemClock;
use chronicle_core::error::DomainError;
use chronicle_core::registry::EventTypeRegistry;
use chronicle_event_store::{PgEventLog, PgEventStore};
use chronicle_replay::AggregateRepository;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

pub use crate::config::{ConfigError, WorkerConfig};
pub use crate::error::WorkerError;

/// Every event type this process understands.
///
/// # Errors
///
/// Returns `DomainError::Validation` if two contexts claim the same event
/// name.
pub fn build_registry() -> Result<EventTypeRegistry, DomainError> {
    let mut registry = EventTypeRegistry::new();
    chronicle_journal::register_events(&mut registry)?;
    Ok(registry)
}

/// The connected write side and read-side consumer of one process.
pub struct Chronicle {
    /// `PostgreSQL` connection pool.
    pub pool: PgPool,
    /// Shared event type registry.
    pub registry: Arc<EventTypeRegistry>,
    /// Saves aggregates to the store and publishes their events.
    pub repository: AggregateRepository,
    /// Feeds the local event log from the broker.
    pub consumer: EventConsumer<JetStreamSource>,
}

impl std::fmt::Debug for Chronicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chronicle")
            .field("pool", &self.pool)
            .field("event_types", &self.registry.event_types())
            .field("consumer", &self.consumer)
            .finish_non_exhaustive()
    }
}

impl Chronicle {
    /// Opens the database pool and wires everything from `config`.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError` if the database or broker cannot be reached or
    /// provisioned.
    pub async fn connect(config: &WorkerConfig) -> Result<Self, WorkerError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .connect(&config.database_url)
            .await?;
        Self::with_pool(pool, config).await
    }

    /// Wires everything around an existing pool.
    ///
    /// # Errors
    ///
    /// Returns `WorkerError` if migrations fail or the broker cannot be
    /// reached or provisioned.
    pub async fn with_pool(pool: PgPool, config: &WorkerConfig) -> Result<Self, WorkerError> {
        chronicle_event_store::schema::migrate(&pool).await?;
        let registry = Arc::new(build_registry()?);

        let context = config.broker.connect().await?;
        let stream = config.broker.ensure_stream(&context).await?;
        let source = JetStreamSource::connect(&stream, &config.broker).await?;

        let repository = AggregateRepository::new(
            Arc::new(PgEventStore::new(pool.clone(), Arc::clone(&registry))),
            Arc::clone(&registry),
            Arc::new(JetStreamPublisher::new(context, &config.broker)),
            Arc::new(SystemClock),
        )
        .with_snapshot_policy(config.snapshot_policy);

        let dispatcher = EventDispatcher::new().with_subscriber(Arc::new(LocalEventLogHandler::new(
            Arc::new(PgEventLog::new(pool.clone())),
            Arc::new(SystemClock),
        )));
        let consumer = EventConsumer::new(source, Arc::clone(&registry), dispatcher, config.commit_policy);

        Ok(Self {
            pool,
            registry,
            repository,
            consumer,
        })
    }
}

/// Runs the worker until Ctrl-C, then returns what the consumer did.
///
/// # Errors
///
/// Returns `WorkerError` if startup fails or the consumer task panics.
pub async fn run(config: &WorkerConfig) -> Result<ConsumerStats, WorkerError> {
    let Chronicle { pool, consumer, .. } = Chronicle::connect(config).await?;

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("shutdown requested");
                shutdown.cancel();
            }
            Err(e) => tracing::error!(error = %e, "could not listen for Ctrl-C"),
        }
    });

    let stats = tokio::spawn(consumer.run(token))
        .await
        .map_err(|e| WorkerError::Task(e.to_string()))?;
    pool.close().await;

    tracing::info!(
        received = stats.received,
        processed = stats.processed,
        skipped = stats.skipped,
        redelivered = stats.redelivered,
        subscriber_failures = stats.subscriber_failures,
        transport_errors = stats.transport_errors,
        "worker stopped"
    );
    Ok(stats)
}
