mod common;

use common::event;
use herald_core::config::{ConfigStore, RetentionConfig};
use herald_core::entities::handler_failure::RecordHandlerFailure;
use herald_core::processors::RetentionReaper;
use herald_core::store::memory::MemoryBackend;
use herald_core::store::SubscriberStore;
use std::time::Duration;
use time::OffsetDateTime;

fn reaper(memory: &MemoryBackend, config: &ConfigStore<RetentionConfig>) -> RetentionReaper {
    RetentionReaper::new(memory.backend().events, config.clone())
}

#[tokio::test]
async fn deletes_only_events_past_the_horizon() {
    let memory = MemoryBackend::new();
    let config = ConfigStore::new(RetentionConfig::from_days(90));
    let now = OffsetDateTime::now_utc();
    let horizon = time::Duration::days(90);

    let expired = memory
        .store
        .insert_at(event("orders", 1), now - horizon - time::Duration::seconds(1))
        .await;
    let kept = memory
        .store
        .insert_at(event("orders", 2), now - horizon + time::Duration::seconds(1))
        .await;

    let reaper = reaper(&memory, &config);
    assert_eq!(reaper.reap().await.unwrap(), 1);

    let remaining: Vec<i64> = memory.store.snapshot().await.iter().map(|e| e.id).collect();
    assert_eq!(remaining, vec![kept.id]);
    assert_ne!(expired.id, kept.id);

    // Nothing left to do on the second run.
    assert_eq!(reaper.reap().await.unwrap(), 0);
}

#[tokio::test]
async fn reloaded_horizon_applies_on_next_run() {
    let memory = MemoryBackend::new();
    let config = ConfigStore::new(RetentionConfig::from_days(90));
    let now = OffsetDateTime::now_utc();
    memory
        .store
        .insert_at(event("orders", 1), now - time::Duration::days(10))
        .await;

    let reaper = reaper(&memory, &config);
    assert_eq!(reaper.reap().await.unwrap(), 0);

    config.update(RetentionConfig::from_days(7)).await;
    assert_eq!(reaper.reap().await.unwrap(), 1);
}

#[tokio::test]
async fn failure_records_go_with_their_events() {
    let memory = MemoryBackend::new();
    let config = ConfigStore::new(RetentionConfig::from_days(1));
    let now = OffsetDateTime::now_utc();
    let old = memory
        .store
        .insert_at(event("orders", 1), now - time::Duration::days(2))
        .await;
    memory
        .store
        .record_failure(RecordHandlerFailure {
            event_id: old.id,
            subscriber: "default".to_string(),
            handler: "h".to_string(),
            error: "boom".to_string(),
        })
        .await
        .unwrap();

    reaper(&memory, &config).reap().await.unwrap();
    assert!(memory.store.list_failures(None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_run_is_not_fatal() {
    let memory = MemoryBackend::new();
    let config = ConfigStore::new(RetentionConfig {
        horizon: Duration::from_secs(60),
        interval: Duration::from_millis(50),
    });
    memory
        .store
        .insert_at(
            event("orders", 1),
            OffsetDateTime::now_utc() - time::Duration::hours(1),
        )
        .await;
    memory.store.set_available(false);
    assert!(reaper(&memory, &config).reap().await.is_err());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let task = tokio::spawn(reaper(&memory, &config).run(shutdown_rx, config.subscribe()));

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(memory.store.snapshot().await.len(), 1);
    memory.store.set_available(true);

    let mut emptied = false;
    for _ in 0..50 {
        if memory.store.snapshot().await.is_empty() {
            emptied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(emptied);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}
