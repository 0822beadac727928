//! Listener lifecycle: delivery, pending drain, priority reads, reconnection.

mod support;

use std::sync::Arc;
use std::time::Duration;

use botbus::bus::EventBus;
use botbus::envelope::{fields, Priority};
use botbus::listener::ListenerState;
use botbus::store::{LogStore, ReadFrom};
use botbus::testkit::CountingHandler;

use support::{bus_consumer, commands_stream, mem_bus, payload, test_config, wait_for};

const GROUP: &str = "listener_consumers";
const DEADLINE: Duration = Duration::from_secs(2);

#[tokio::test]
async fn subscribe_delivers_published_events() {
    let (store, bus) = mem_bus(test_config());
    let stream = commands_stream();
    let handler = CountingHandler::new();

    bus.subscribe(stream.clone(), GROUP, handler.clone()).await.unwrap();
    for n in 0..3 {
        bus.publish(&stream, payload("n", n), "STATUS_UPDATE", Priority::Normal)
            .await
            .unwrap();
    }

    assert!(wait_for(|| handler.calls() == 3, DEADLINE).await);
    assert!(wait_for(|| store.pending_len(stream.as_str(), GROUP) == 0, DEADLINE).await);
    bus.shutdown().await;
    // Acked means done: nothing is redelivered after the fact.
    assert_eq!(handler.calls(), 3);
}

#[tokio::test]
async fn critical_traffic_overtakes_an_existing_backlog() {
    let (store, bus) = mem_bus(test_config());
    let stream = commands_stream();

    // Backlog first, then an urgent message on the sibling, all before the
    // listener starts.
    for n in 0..3 {
        bus.publish(&stream, payload("n", n), "STATUS_UPDATE", Priority::Normal)
            .await
            .unwrap();
    }
    bus.publish(&stream, payload("reason", "drawdown"), "EMERGENCY_STOP", Priority::Critical)
        .await
        .unwrap();

    let handler = CountingHandler::new();
    bus.subscribe(stream.clone(), GROUP, handler.clone()).await.unwrap();

    assert!(wait_for(|| handler.calls() == 4, DEADLINE).await);
    assert_eq!(handler.seen()[0].event_type, "EMERGENCY_STOP");
    assert!(wait_for(|| store.pending_len(&stream.critical_stream(), GROUP) == 0, DEADLINE).await);
    bus.shutdown().await;
}

#[tokio::test]
async fn listener_state_reaches_stopped_on_shutdown() {
    let (_store, bus) = mem_bus(test_config());
    let stream = commands_stream();

    bus.subscribe(stream.clone(), GROUP, CountingHandler::new()).await.unwrap();
    let state = bus.listener_state(&stream, GROUP).unwrap();

    bus.shutdown().await;
    assert_eq!(*state.borrow(), ListenerState::Stopped);
}

#[tokio::test]
async fn drains_pending_entries_from_a_previous_run() {
    let config = test_config();
    let consumer = bus_consumer(&config);
    let (store, bus) = mem_bus(config);
    let stream = commands_stream();

    store.create_group(stream.as_str(), GROUP).await.unwrap();
    for n in 0..2 {
        bus.publish(&stream, payload("n", n), "STATUS_UPDATE", Priority::Normal)
            .await
            .unwrap();
    }
    // Deliver to the bus's own consumer without acking, as if the previous
    // process died mid-dispatch.
    store
        .read_group(stream.as_str(), GROUP, &consumer, 10, None, ReadFrom::New)
        .await
        .unwrap();
    assert_eq!(store.pending_len(stream.as_str(), GROUP), 2);

    let handler = CountingHandler::new();
    bus.subscribe(stream.clone(), GROUP, handler.clone()).await.unwrap();

    assert!(
        wait_for(
            || handler.calls() == 2 && store.pending_len(stream.as_str(), GROUP) == 0,
            DEADLINE
        )
        .await
    );
    bus.shutdown().await;
}

#[tokio::test]
async fn redelivers_pending_left_by_a_crashed_predecessor() {
    // A process that dies mid-dispatch leaves deliveries pending under its
    // consumer name. The name derives from config, not the process id, so
    // the replacement process inherits and drains them.
    let config = test_config();
    let (store, crashed) = mem_bus(config.clone());
    let stream = commands_stream();

    store.create_group(stream.as_str(), GROUP).await.unwrap();
    for n in 0..2 {
        crashed
            .publish(&stream, payload("n", n), "STATUS_UPDATE", Priority::Normal)
            .await
            .unwrap();
    }
    crashed.read_batch(&stream, GROUP, 10).await.unwrap();
    drop(crashed);
    assert_eq!(store.pending_len(stream.as_str(), GROUP), 2);

    let bus = EventBus::new(Arc::new(store.clone()), config);
    let handler = CountingHandler::new();
    bus.subscribe(stream.clone(), GROUP, handler.clone()).await.unwrap();

    assert!(
        wait_for(
            || handler.calls() == 2 && store.pending_len(stream.as_str(), GROUP) == 0,
            DEADLINE
        )
        .await
    );
    bus.shutdown().await;
}

#[tokio::test]
async fn listener_survives_a_transport_outage() {
    let mut config = test_config();
    config.consumer.max_consecutive_errors = 2;
    let (store, bus) = mem_bus(config);
    let stream = commands_stream();
    let handler = CountingHandler::new();

    bus.subscribe(stream.clone(), GROUP, handler.clone()).await.unwrap();

    store.fail_times("read_group", 4);
    store.fail_pings(2);
    bus.publish(&stream, payload("n", 1), "STATUS_UPDATE", Priority::Normal)
        .await
        .unwrap();

    assert!(wait_for(|| handler.calls() == 1, DEADLINE).await);
    bus.shutdown().await;
}

#[tokio::test]
async fn shutdown_interrupts_reconnection_backoff() {
    let mut config = test_config();
    config.consumer.max_consecutive_errors = 1;
    let (store, bus) = mem_bus(config);
    let stream = commands_stream();

    bus.subscribe(stream.clone(), GROUP, CountingHandler::new()).await.unwrap();
    let state = bus.listener_state(&stream, GROUP).unwrap();

    store.fail_times("read_group", 1_000);
    store.fail_pings(u32::MAX);

    assert!(wait_for(|| *state.borrow() == ListenerState::Reconnecting, DEADLINE).await);
    bus.shutdown().await;
    assert_eq!(*state.borrow(), ListenerState::Stopped);
}

#[tokio::test]
async fn undecodable_record_routes_to_retry_not_the_handler() {
    let (store, bus) = mem_bus(test_config());
    let stream = commands_stream();
    let handler = CountingHandler::new();

    bus.subscribe(stream.clone(), GROUP, handler.clone()).await.unwrap();
    store
        .append(stream.as_str(), &[("garbage".into(), "x".into())])
        .await
        .unwrap();

    assert!(wait_for(|| store.stream_len(&stream.retry_stream()) == 1, DEADLINE).await);
    assert_eq!(handler.calls(), 0);

    let retry = store.entries(&stream.retry_stream());
    assert!(fields::get(&retry[0].fields, fields::LAST_ERROR)
        .unwrap()
        .contains("decode_error"));
    bus.shutdown().await;
}
