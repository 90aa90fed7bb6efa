//! Write path to local log, through a live `PostgreSQL` and NATS.
//!
//! Run with `DATABASE_URL` and `NATS_URL` set and `cargo test -- --ignored`.

use std::time::Duration;

use chronicle_bus::{BrokerConfig, CommitPolicy};
use chronicle_core::clock::SystemClock;
use chronicle_core::store::EventLog;
use chronicle_event_store::PgEventLog;
use chronicle_journal::application::command_handlers::handle_create_journal;
use chronicle_journal::domain::commands::CreateJournal;
use chronicle_replay::SnapshotPolicy;
use chronicle_worker::{Chronicle, WorkerConfig};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn config() -> WorkerConfig {
    let suffix = Uuid::new_v4().simple().to_string();
    WorkerConfig {
        database_url: String::new(),
        db_max_connections: 2,
        broker: BrokerConfig {
            url: std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".into()),
            stream: format!("CHRONICLE_WORKER_TEST_{suffix}"),
            subject: format!("chronicle.worker-test.{suffix}"),
            consumer_group: format!("chronicle-worker-test-{suffix}"),
            ..BrokerConfig::default()
        },
        commit_policy: CommitPolicy::LogAndContinue,
        snapshot_policy: SnapshotPolicy::Never,
        otlp_endpoint: None,
    }
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL and NATS_URL"]
async fn test_created_journal_reaches_local_log(pool: PgPool) {
    // Arrange
    let chronicle = Chronicle::with_pool(pool.clone(), &config()).await.unwrap();
    let command = CreateJournal {
        correlation_id: Uuid::new_v4(),
        user_id: None,
        journal_id: Uuid::new_v4(),
        title: "Expedition".into(),
        data: serde_json::Map::new(),
    };
    let events = handle_create_journal(&command, &SystemClock, &chronicle.repository)
        .await
        .unwrap();
    let token = CancellationToken::new();
    let consumer = tokio::spawn(chronicle.consumer.run(token.clone()));

    // Act
    let log = PgEventLog::new(pool);
    let mut logged = false;
    for _ in 0..50 {
        if log.contains(events[0].event_id).await.unwrap() {
            logged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    token.cancel();
    let stats = consumer.await.unwrap();

    // Assert
    assert!(logged);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.skipped, 0);
}
