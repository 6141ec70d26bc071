mod common;

use common::{
    CATCH_UP, Recorder, bus, event, fast_config, publish_n, strictly_increasing,
    wait_for_failures, wait_for_watermark, wait_until,
};
use herald_core::config::InitialWatermark;
use herald_core::entities::event::EventFilter;
use herald_core::events::ListenerState;
use herald_core::events::diagnostics::{HANDLER_FAILED, SYSTEM_CHANNEL};
use herald_core::store::EventStore;
use herald_core::store::memory::MemoryBackend;
use herald_core::{BusError, HandlerError, HandlerRegistry, NewEvent, handler_fn};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);
const STOP: Duration = Duration::from_secs(2);

#[tokio::test]
async fn dispatches_every_event_once_across_a_disconnect() {
    let memory = MemoryBackend::new();
    let bus = bus(&memory, fast_config("no-loss"));
    let publisher = bus.publisher();
    let recorder = Recorder::new();
    let handle = bus
        .start(HandlerRegistry::new().on_all(recorder.clone()))
        .await
        .unwrap();

    let mut expected = publish_n(&publisher, "orders", 5).await;
    assert!(wait_until(WAIT, || recorder.ids().len() == 5).await);

    // Drop the lease and refuse new ones; signals sent now are lost.
    memory.wakeups.set_accepting(false);
    memory.wakeups.sever();
    expected.extend(publish_n(&publisher, "orders", 5).await);
    tokio::time::sleep(CATCH_UP * 3).await;
    memory.wakeups.set_accepting(true);
    expected.extend(publish_n(&publisher, "orders", 5).await);

    assert!(wait_until(WAIT, || recorder.ids().len() >= 15).await);
    tokio::time::sleep(CATCH_UP * 2).await;

    let ids = recorder.ids();
    assert_eq!(ids, expected);
    assert!(strictly_increasing(&ids));
    assert!(wait_for_watermark(&memory, "no-loss", ids[14]).await);
    assert_eq!(memory.store.watermark("no-loss").await, Some(ids[14]));
    assert!(handle.status().lease_generation >= 2);

    handle.stop(STOP).await.unwrap();
}

#[tokio::test]
async fn backlog_from_an_outage_is_dispatched_before_new_events() {
    let memory = MemoryBackend::new();
    let bus = bus(&memory, fast_config("backlog"));
    let publisher = bus.publisher();
    let recorder = Recorder::new();
    let handle = bus
        .start(HandlerRegistry::new().on_all(recorder.clone()))
        .await
        .unwrap();
    assert!(wait_until(WAIT, || handle.status().state == ListenerState::Listening).await);

    memory.wakeups.set_accepting(false);
    memory.wakeups.sever();
    let backlog = publish_n(&publisher, "orders", 3).await;

    // Five catch-up intervals without a connection.
    tokio::time::sleep(CATCH_UP * 5).await;
    assert!(recorder.ids().is_empty());
    assert_ne!(handle.status().state, ListenerState::Listening);

    memory.wakeups.set_accepting(true);
    assert!(wait_until(WAIT, || recorder.ids().len() == 3).await);
    let fresh = publish_n(&publisher, "orders", 1).await;
    assert!(wait_until(WAIT, || recorder.ids().len() == 4).await);

    let mut expected = backlog;
    expected.extend(fresh);
    assert_eq!(recorder.ids(), expected);

    handle.stop(STOP).await.unwrap();
}

#[tokio::test]
async fn failing_handler_does_not_block_later_events() {
    let memory = MemoryBackend::new();
    let bus = bus(&memory, fast_config("failures"));
    let publisher = bus.publisher();
    let failing = Recorder::failing_on(&[7]);
    let handle = bus
        .start(HandlerRegistry::new().on_channel("orders", failing.clone()))
        .await
        .unwrap();

    let ids = publish_n(&publisher, "orders", 8).await;
    assert_eq!(ids, (1..=8).collect::<Vec<_>>());
    assert!(wait_until(WAIT, || failing.ids().len() == 8).await);
    assert!(wait_for_watermark(&memory, "failures", 8).await);

    let failures = bus.query().failures(Some("failures"), 10).await.unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].event_id, 7);
    assert_eq!(failures[0].handler, "recorder");

    let diagnostics = memory
        .store
        .list(EventFilter {
            channel: Some(SYSTEM_CHANNEL.to_string()),
            event_type: Some(HANDLER_FAILED.to_string()),
            ..EventFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].payload["event_id"], 7);
    assert_eq!(diagnostics[0].payload["subscriber"], "failures");

    handle.stop(STOP).await.unwrap();
}

#[tokio::test]
async fn failures_on_system_events_produce_no_diagnostics() {
    let memory = MemoryBackend::new();
    let bus = bus(&memory, fast_config("quiet"));
    let handle = bus
        .start(HandlerRegistry::new().on_all(handler_fn("always-fails", |_| async {
            Err(HandlerError::new("nope"))
        })))
        .await
        .unwrap();

    bus.publisher().publish(event("orders", 1)).await.unwrap();

    // One failure for the data event, one for its diagnostic, and nothing
    // after that.
    assert!(wait_for_failures(&bus.query(), 2).await);
    tokio::time::sleep(CATCH_UP * 4).await;
    assert_eq!(bus.query().failures(None, 10).await.unwrap().len(), 2);
    assert_eq!(memory.store.snapshot().await.len(), 2);

    handle.stop(STOP).await.unwrap();
}

#[tokio::test]
async fn event_is_redelivered_when_its_failure_cannot_be_recorded() {
    let memory = MemoryBackend::new();
    let bus = bus(&memory, fast_config("redelivery"));
    let attempts = Arc::new(AtomicUsize::new(0));
    let store = memory.store.clone();
    let counter = attempts.clone();
    let handler = handler_fn("flaky", move |_| {
        let store = store.clone();
        let counter = counter.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                // Take the store down so the failure cannot be written.
                store.set_available(false);
                let store = store.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    store.set_available(true);
                });
                return Err(HandlerError::new("first attempt fails"));
            }
            Ok(())
        }
    });
    let handle = bus
        .start(HandlerRegistry::new().on_channel("orders", handler))
        .await
        .unwrap();

    let id = bus.publisher().publish(event("orders", 1)).await.unwrap().id;
    assert!(wait_for_watermark(&memory, "redelivery", id).await);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(bus.query().failures(None, 10).await.unwrap().is_empty());

    handle.stop(STOP).await.unwrap();
}

#[tokio::test]
async fn correlated_flow_is_returned_in_causal_order() {
    let memory = MemoryBackend::new();
    let bus = bus(&memory, fast_config("trace"));
    let publisher = bus.publisher();

    let message = NewEvent::new("discord:message", "discord.message.received", "ingest")
        .with_correlation_id("X")
        .with_payload(serde_json::json!({"content": "BTC long 64000"}));
    let first = publisher.publish(message).await.unwrap();
    publisher.publish(event("discord:message", 2)).await.unwrap();
    let parent = bus.query().get(first.id).await.unwrap().unwrap();
    let setup = NewEvent::new("parsing:setup", "parsing.setup.extracted", "parser")
        .with_payload(serde_json::json!({"symbol": "BTC", "side": "long"}))
        .caused_by(&parent);
    let second = publisher.publish(setup).await.unwrap();

    let flow = bus.query().by_correlation("X").await.unwrap();
    let ids: Vec<i64> = flow.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert_eq!(flow[0].channel, "discord:message");
    assert_eq!(flow[1].channel, "parsing:setup");
}

#[tokio::test]
async fn rewind_replays_later_events() {
    let memory = MemoryBackend::new();
    let bus = bus(&memory, fast_config("replay"));
    let recorder = Recorder::new();
    let handle = bus
        .start(HandlerRegistry::new().on_all(recorder.clone()))
        .await
        .unwrap();

    let ids = publish_n(&bus.publisher(), "orders", 5).await;
    assert!(wait_until(WAIT, || recorder.ids().len() == 5).await);

    handle.rewind(ids[1]).await.unwrap();
    assert!(wait_until(WAIT, || recorder.ids().len() == 8).await);
    let mut expected = ids.clone();
    expected.extend_from_slice(&ids[2..]);
    assert_eq!(recorder.ids(), expected);
    assert!(wait_for_watermark(&memory, "replay", ids[4]).await);

    assert!(matches!(
        handle.rewind(-1).await,
        Err(BusError::InvalidReplay(-1))
    ));
    handle.stop(STOP).await.unwrap();
}

#[tokio::test]
async fn restart_command_creates_a_new_lease() {
    let memory = MemoryBackend::new();
    let bus = bus(&memory, fast_config("restart"));
    let handle = bus.start(HandlerRegistry::new()).await.unwrap();
    assert!(wait_until(WAIT, || handle.status().lease_generation == 1).await);

    handle.restart("test").await.unwrap();
    assert!(wait_until(WAIT, || handle.status().lease_generation == 2).await);
    assert!(wait_until(WAIT, || handle.status().state == ListenerState::Listening).await);

    handle.stop(STOP).await.unwrap();
}

#[tokio::test]
async fn stop_halts_the_listener() {
    let memory = MemoryBackend::new();
    let bus = bus(&memory, fast_config("stop"));
    let handle = bus.start(HandlerRegistry::new()).await.unwrap();
    let status = handle.watch_status();

    handle.stop(STOP).await.unwrap();
    assert_eq!(status.borrow().state, ListenerState::Halted);
}

#[tokio::test]
async fn start_fails_when_the_store_is_unreachable() {
    let memory = MemoryBackend::new();
    memory.set_online(false);
    let bus = bus(&memory, fast_config("offline"));

    let err = bus.start(HandlerRegistry::new()).await.unwrap_err();
    assert!(matches!(err, BusError::Unavailable { attempts: 3, .. }));
}

#[tokio::test]
async fn start_rejects_invalid_configuration() {
    let memory = MemoryBackend::new();
    let mut config = fast_config("bad");
    config.listener.batch_size = 0;
    let err = bus(&memory, config).start(HandlerRegistry::new()).await.unwrap_err();
    assert!(matches!(err, BusError::InvalidConfig(_)));

    let mut config = fast_config("bad");
    config.signal_channel = "events; DROP TABLE".into();
    let err = bus(&memory, config).start(HandlerRegistry::new()).await.unwrap_err();
    assert!(matches!(err, BusError::InvalidConfig(_)));
}

#[tokio::test]
async fn new_subscriber_starting_at_latest_skips_existing_events() {
    let memory = MemoryBackend::new();
    let mut config = fast_config("latest");
    config.listener.initial_watermark = InitialWatermark::Latest;
    let bus = bus(&memory, config);
    publish_n(&bus.publisher(), "orders", 3).await;

    let recorder = Recorder::new();
    let handle = bus
        .start(HandlerRegistry::new().on_all(recorder.clone()))
        .await
        .unwrap();
    let fresh = publish_n(&bus.publisher(), "orders", 2).await;
    assert!(wait_until(WAIT, || recorder.ids().len() == 2).await);
    tokio::time::sleep(CATCH_UP * 2).await;
    assert_eq!(recorder.ids(), fresh);

    handle.stop(STOP).await.unwrap();
}

#[tokio::test]
async fn lookback_replays_only_the_window() {
    let memory = MemoryBackend::new();
    let now = time::OffsetDateTime::now_utc();
    memory
        .store
        .insert_at(event("orders", 0), now - time::Duration::hours(2))
        .await;
    let recent = memory
        .store
        .insert_at(event("orders", 1), now - time::Duration::minutes(5))
        .await;

    let mut config = fast_config("lookback");
    config.listener.initial_watermark = InitialWatermark::Lookback(Duration::from_secs(3600));
    let bus = bus(&memory, config);
    let recorder = Recorder::new();
    let handle = bus
        .start(HandlerRegistry::new().on_all(recorder.clone()))
        .await
        .unwrap();

    assert!(wait_until(WAIT, || recorder.ids().len() == 1).await);
    assert_eq!(recorder.ids(), vec![recent.id]);
    handle.stop(STOP).await.unwrap();
}

#[tokio::test]
async fn restarted_bus_resumes_from_the_stored_watermark() {
    let memory = MemoryBackend::new();
    let bus = bus(&memory, fast_config("resume"));

    let first = Recorder::new();
    let handle = bus
        .start(HandlerRegistry::new().on_all(first.clone()))
        .await
        .unwrap();
    publish_n(&bus.publisher(), "orders", 3).await;
    assert!(wait_until(WAIT, || first.ids().len() == 3).await);
    handle.stop(STOP).await.unwrap();

    let missed = publish_n(&bus.publisher(), "orders", 2).await;

    let second = Recorder::new();
    let handle = bus
        .start(HandlerRegistry::new().on_all(second.clone()))
        .await
        .unwrap();
    assert!(wait_until(WAIT, || second.ids().len() == 2).await);
    assert_eq!(second.ids(), missed);
    handle.stop(STOP).await.unwrap();
}

#[tokio::test]
async fn bus_debug_output_names_its_parts() {
    let memory = MemoryBackend::new();
    let bus = bus(&memory, fast_config("debug"));
    let rendered = format!("{bus:?}");
    assert!(rendered.starts_with("EventBus"));
    assert!(rendered.contains("retention: ConfigStore { version: 0, .. }"));
}
