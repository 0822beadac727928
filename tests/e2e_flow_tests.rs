//! End-to-end command flows over the full bus topology.

mod support;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use botbus::envelope::{fields, Priority};
use botbus::handler::Router;

use support::{commands_stream, mem_bus, payload, test_config, wait_for};

#[tokio::test]
async fn start_bot_command_round_trip() {
    let (store, bus) = mem_bus(test_config());
    let stream = commands_stream();

    let started: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let names = started.clone();
    let router = Router::new().route_fn("START_BOT", move |envelope| {
        let names = names.clone();
        async move {
            let name = envelope
                .data
                .get("bot_name")
                .and_then(|v| v.as_str())
                .unwrap_or("?")
                .to_string();
            names.lock().push(name);
            Ok(())
        }
    });
    bus.subscribe(stream.clone(), "trading_consumers", Arc::new(router))
        .await
        .unwrap();

    bus.publish(&stream, payload("bot_name", "alpha"), "START_BOT", Priority::Normal)
        .await
        .unwrap();

    assert!(wait_for(|| *started.lock() == ["alpha"], Duration::from_secs(2)).await);
    assert!(
        wait_for(
            || store.pending_len(stream.as_str(), "trading_consumers") == 0,
            Duration::from_secs(2)
        )
        .await
    );
    bus.shutdown().await;

    let snapshot = bus.counters().snapshot();
    assert_eq!(snapshot.published, 1);
    assert!(snapshot.consumed >= 1);
    assert!(snapshot.acked >= 1);
}

#[tokio::test]
async fn unrouted_event_type_retries_then_dead_letters() {
    let (store, bus) = mem_bus(test_config());
    let stream = commands_stream();

    let router = Router::new().route_fn("START_BOT", |_| async { Ok(()) });
    bus.subscribe(stream.clone(), "trading_consumers", Arc::new(router))
        .await
        .unwrap();

    bus.publish(&stream, payload("n", 1), "SELF_DESTRUCT", Priority::Normal)
        .await
        .unwrap();

    // Replay is interval-driven in production; drive it by hand here so the
    // retry cycle completes quickly.
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        bus.retry_scheduler().replay_due(&stream).await.unwrap();
        if store.stream_len(&stream.dead_letter_stream()) == 1 {
            break;
        }
    }

    assert_eq!(store.stream_len(&stream.dead_letter_stream()), 1);
    assert_eq!(store.stream_len(&stream.retry_stream()), 0);
    assert_eq!(store.pending_len(stream.as_str(), "trading_consumers"), 0);

    let dead = store.entries(&stream.dead_letter_stream());
    assert!(fields::get(&dead[0].fields, fields::DEAD_LETTER_REASON)
        .unwrap()
        .contains("SELF_DESTRUCT"));

    bus.shutdown().await;
    let snapshot = bus.counters().snapshot();
    assert_eq!(snapshot.retried, 3);
    assert_eq!(snapshot.dead_lettered, 1);
}

#[tokio::test]
async fn two_streams_share_one_bus() {
    let (store, bus) = mem_bus(test_config());
    let commands = commands_stream();
    let results = botbus::stream_name::StreamName::parse("svc:other:results").unwrap();

    let command_handler = botbus::testkit::CountingHandler::new();
    let result_handler = botbus::testkit::CountingHandler::new();
    bus.subscribe(commands.clone(), "trading_consumers", command_handler.clone())
        .await
        .unwrap();
    bus.subscribe(results.clone(), "management_consumers", result_handler.clone())
        .await
        .unwrap();

    bus.publish(&commands, payload("bot_name", "alpha"), "START_BOT", Priority::Normal)
        .await
        .unwrap();
    bus.publish(&results, payload("profit", 3), "TRADE_CLOSED", Priority::Normal)
        .await
        .unwrap();

    assert!(
        wait_for(
            || command_handler.calls() == 1 && result_handler.calls() == 1,
            Duration::from_secs(2)
        )
        .await
    );
    assert_eq!(command_handler.seen()[0].event_type, "START_BOT");
    assert_eq!(result_handler.seen()[0].event_type, "TRADE_CLOSED");
    assert_eq!(store.pending_len(commands.as_str(), "trading_consumers"), 0);

    bus.shutdown().await;
}
