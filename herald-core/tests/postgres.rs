//! Runs against the database in `DATABASE_URL` with the real migrations.
//! Every test returns early when it is not set.

mod common;

use common::{Recorder, event, fast_config, publish_n, strictly_increasing, wait_until};
use herald_core::config::{BusConfig, InitialWatermark};
use herald_core::framework::DatabaseProcessor;
use herald_core::store::EventStore;
use herald_core::{EventBus, HandlerRegistry};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);
const STOP: Duration = Duration::from_secs(5);

async fn database() -> Option<PgPool> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(&url)
        .await
        .unwrap();
    sqlx::migrate!("../migrations").run(&pool).await.unwrap();
    Some(pool)
}

/// Tests share one database; names are made unique per run.
fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", rand::random::<u32>())
}

/// Starts at the current head so events of other runs are not replayed.
fn pg_config(subscriber: &str) -> BusConfig {
    let mut config = fast_config(subscriber);
    config.listener.initial_watermark = InitialWatermark::Latest;
    config
}

#[tokio::test]
async fn published_events_round_trip_through_postgres() {
    let Some(pool) = database().await else { return };
    let channel = unique("orders");
    let bus = EventBus::postgres(pg_config(&unique("round-trip")), pool);
    let recorder = Recorder::new();
    let handle = bus
        .start(HandlerRegistry::new().on_channel(channel.as_str(), recorder.clone()))
        .await
        .unwrap();

    let publisher = bus.publisher();
    let correlation = unique("flow");
    let first = publisher
        .publish(event(&channel, 1).with_correlation_id(correlation.as_str()))
        .await
        .unwrap();
    let second = publisher
        .publish(event(&channel, 2).with_correlation_id(correlation.as_str()))
        .await
        .unwrap();

    assert!(wait_until(WAIT, || recorder.ids().len() == 2).await);
    assert_eq!(recorder.ids(), vec![first.id, second.id]);
    assert_eq!(recorder.events()[0].channel, channel.as_str());

    let query = bus.query();
    let stored = query.get(first.id).await.unwrap().unwrap();
    assert_eq!(stored.payload, serde_json::json!({ "n": 1 }));
    let flow: Vec<i64> = query
        .by_correlation(&correlation)
        .await
        .unwrap()
        .iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(flow, vec![first.id, second.id]);

    handle.stop(STOP).await.unwrap();
}

#[tokio::test]
async fn events_published_while_stopped_are_caught_up() {
    let Some(pool) = database().await else { return };
    let channel = unique("billing");
    let subscriber = unique("catch-up");
    let bus = EventBus::postgres(pg_config(&subscriber), pool);
    let publisher = bus.publisher();

    let recorder = Recorder::new();
    let handle = bus
        .start(HandlerRegistry::new().on_channel(channel.as_str(), recorder.clone()))
        .await
        .unwrap();
    let mut expected = publish_n(&publisher, &channel, 2).await;
    assert!(wait_until(WAIT, || recorder.ids().len() == 2).await);
    handle.stop(STOP).await.unwrap();

    let missed = publish_n(&publisher, &channel, 3).await;
    expected.extend(&missed);

    let handle = bus
        .start(HandlerRegistry::new().on_channel(channel.as_str(), recorder.clone()))
        .await
        .unwrap();
    assert!(wait_until(WAIT, || recorder.ids().len() == 5).await);
    assert_eq!(recorder.ids(), expected);
    assert_eq!(
        bus.query().watermark(&subscriber).await.unwrap(),
        missed.last().copied()
    );
    handle.stop(STOP).await.unwrap();
}

#[tokio::test]
async fn an_event_committed_late_is_not_skipped() {
    let Some(pool) = database().await else { return };
    let channel = unique("ledger");
    let bus = EventBus::postgres(pg_config(&unique("late-commit")), pool.clone());
    let recorder = Recorder::new();
    let handle = bus
        .start(HandlerRegistry::new().on_channel(channel.as_str(), recorder.clone()))
        .await
        .unwrap();

    // Hold an insert open; its id is taken but not yet visible.
    let mut tx = DatabaseProcessor::new(pool).begin().await.unwrap();
    let held = event(&channel, 1).insert(&mut tx).await.unwrap();

    let publisher = bus.publisher();
    let later_channel = channel.clone();
    let later =
        tokio::spawn(async move { publisher.publish(event(&later_channel, 2)).await });
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!later.is_finished(), "second insert must wait for the first commit");
    assert!(recorder.ids().is_empty());

    tx.commit().await.unwrap();
    let later = later.await.unwrap().unwrap();
    assert!(later.id > held.id);

    assert!(wait_until(WAIT, || recorder.ids().len() == 2).await);
    let ids = recorder.ids();
    assert_eq!(ids, vec![held.id, later.id]);
    assert!(strictly_increasing(&ids));
    handle.stop(STOP).await.unwrap();
}

#[tokio::test]
async fn retention_measures_age_on_the_database_clock() {
    let Some(pool) = database().await else { return };
    let channel = unique("archive");
    let old_id: i64 = sqlx::query_scalar(
        "INSERT INTO events (channel, event_type, source, created_at) \
         VALUES ($1, 'test.event', 'tests', now() - interval '2 days') RETURNING id",
    )
    .bind(&channel)
    .fetch_one(&pool)
    .await
    .unwrap();

    let bus = EventBus::postgres(pg_config(&unique("retention")), pool);
    let fresh = bus.publisher().publish(event(&channel, 1)).await.unwrap();

    let events = bus.backend().events.clone();
    events
        .delete_older_than(Duration::from_secs(86_400))
        .await
        .unwrap();
    assert!(events.get(old_id).await.unwrap().is_none());
    assert!(events.get(fresh.id).await.unwrap().is_some());
}
