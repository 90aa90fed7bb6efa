//! Chronicle worker entry point.

use std::error::Error;

use chronicle_worker::WorkerConfig;
use chronicle_worker::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = WorkerConfig::from_env()?;
    let _telemetry = telemetry::init(config.otlp_endpoint.as_deref())?;

    tracing::info!(
        stream = %config.broker.stream,
        consumer_group = %config.broker.consumer_group,
        policy = %config.commit_policy,
        "Starting Chronicle worker"
    );

    chronicle_worker::run(&config).await?;
    Ok(())
}
