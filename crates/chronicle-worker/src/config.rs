//! Worker configuration, read from the environment.

use chronicle_bus::{BrokerConfig, CommitPolicy};
use chronicle_replay::SnapshotPolicy;
use thiserror::Error;

/// Problems with the process environment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is unset.
    #[error("{0} environment variable must be set")]
    Missing(&'static str),

    /// A variable is set to something unusable.
    #[error("{name} is invalid: {reason}")]
    Invalid {
        /// The variable.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Everything the worker needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// `PostgreSQL` connection string.
    pub database_url: String,
    /// Pool size.
    pub db_max_connections: u32,
    /// Broker location and names.
    pub broker: BrokerConfig,
    /// What the consumer does when a subscriber fails.
    pub commit_policy: CommitPolicy,
    /// When saves also write a snapshot.
    pub snapshot_policy: SnapshotPolicy,
    /// OTLP collector endpoint; span export is off when unset.
    pub otlp_endpoint: Option<String>,
}

impl WorkerConfig {
    /// Reads the configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `DATABASE_URL` is missing or any variable
    /// fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `DATABASE_URL` is missing or any variable
    /// fails to parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let db_max_connections = match get("DB_MAX_CONNECTIONS") {
            Some(raw) => parse_positive("DB_MAX_CONNECTIONS", &raw)?,
            None => 10,
        };
        let commit_policy = match get("CHRONICLE_COMMIT_POLICY") {
            Some(raw) => raw.parse::<CommitPolicy>().map_err(|e| ConfigError::Invalid {
                name: "CHRONICLE_COMMIT_POLICY",
                reason: e.to_string(),
            })?,
            None => CommitPolicy::default(),
        };
        let snapshot_policy = match get("CHRONICLE_SNAPSHOT_EVERY") {
            Some(raw) => SnapshotPolicy::Every(parse_positive("CHRONICLE_SNAPSHOT_EVERY", &raw)?),
            None => SnapshotPolicy::Never,
        };

        let defaults = BrokerConfig::default();
        let broker = BrokerConfig {
            url: get("NATS_URL").unwrap_or(defaults.url),
            stream: get("CHRONICLE_STREAM").unwrap_or(defaults.stream),
            subject: get("CHRONICLE_SUBJECT").unwrap_or(defaults.subject),
            consumer_group: get("CHRONICLE_CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            ..defaults
        };

        Ok(Self {
            database_url,
            db_max_connections,
            broker,
            commit_policy,
            snapshot_policy,
            otlp_endpoint: get("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }
}

fn parse_positive(name: &'static str, raw: &str) -> Result<u32, ConfigError> {
    match raw.trim().parse::<u32>() {
        Ok(0) => Err(ConfigError::Invalid {
            name,
            reason: "must be greater than zero".into(),
        }),
        Ok(value) => Ok(value),
        Err(e) => Err(ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}
