//! Dead-letter quarantine and forensics.

mod support;

use botbus::envelope::{fields, Envelope, Priority};
use botbus::store::{LogStore, ReadFrom, StreamEntry};
use botbus::testkit::MemoryLogStore;

use support::{commands_stream, mem_bus, payload, test_config};

const GROUP: &str = "dlq_consumers";

async fn deliver(store: &MemoryLogStore, bus: &botbus::bus::EventBus, count: usize) -> Vec<StreamEntry> {
    let stream = commands_stream();
    bus.group_manager().ensure_group(stream.as_str(), GROUP).await.unwrap();
    for n in 0..count {
        bus.publish(&stream, payload("n", n), "START_BOT", Priority::Normal)
            .await
            .unwrap();
    }
    store
        .read_group(stream.as_str(), GROUP, "c1", count, None, ReadFrom::New)
        .await
        .unwrap()
}

#[tokio::test]
async fn move_to_dlq_records_failure_metadata_and_acks() {
    let (store, bus) = mem_bus(test_config());
    let stream = commands_stream();

    let entries = deliver(&store, &bus, 1).await;
    let entry = &entries[0];
    bus.dead_letter()
        .move_to_dlq(
            &stream,
            stream.as_str(),
            GROUP,
            &entry.id,
            &entry.fields,
            "max_retries_exceeded: handler failed: kaput",
        )
        .await
        .unwrap();

    assert_eq!(store.pending_len(stream.as_str(), GROUP), 0);
    let dead = store.entries(&stream.dead_letter_stream());
    assert_eq!(dead.len(), 1);

    let record = &dead[0].fields;
    assert_eq!(
        fields::get(record, fields::DEAD_LETTER_REASON),
        Some("\"max_retries_exceeded: handler failed: kaput\"")
    );
    assert_eq!(
        fields::get(record, fields::ORIGINAL_MESSAGE_ID),
        Some(format!("\"{}\"", entry.id).as_str())
    );
    assert_eq!(fields::get(record, fields::ORIGINAL_STREAM), Some("\"svc:other:commands\""));
    assert_eq!(fields::get(record, fields::SERVICE_NAME), Some("\"test_service\""));
    assert!(fields::get(record, fields::FAILED_AT).is_some());

    // The original envelope is still intact inside the dead-letter record.
    let envelope = Envelope::decode(record).unwrap();
    assert_eq!(envelope.event_type, "START_BOT");
}

#[tokio::test]
async fn dlq_stats_counts_by_reason() {
    let (store, bus) = mem_bus(test_config());
    let stream = commands_stream();

    let entries = deliver(&store, &bus, 3).await;
    let reasons = [
        "max_retries_exceeded: kaput",
        "max_retries_exceeded: kaput",
        "decode_error: missing field 'type' in stream record",
    ];
    for (entry, reason) in entries.iter().zip(reasons) {
        bus.dead_letter()
            .move_to_dlq(&stream, stream.as_str(), GROUP, &entry.id, &entry.fields, reason)
            .await
            .unwrap();
    }

    let stats = bus.dead_letter().dlq_stats(&stream).await.unwrap();
    assert_eq!(stats.total_messages, 3);
    assert_eq!(stats.error_types.get("max_retries_exceeded: kaput"), Some(&2));
    assert_eq!(
        stats
            .error_types
            .get("decode_error: missing field 'type' in stream record"),
        Some(&1)
    );
}

#[tokio::test]
async fn dlq_stats_tolerates_a_missing_dead_stream() {
    let (_store, bus) = mem_bus(test_config());
    let stats = bus.dead_letter().dlq_stats(&commands_stream()).await.unwrap();

    assert_eq!(stats.total_messages, 0);
    assert!(stats.error_types.is_empty());
}
