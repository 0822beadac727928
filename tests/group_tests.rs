//! Consumer-group management.

mod support;

use botbus::envelope::Priority;
use botbus::error::StoreError;
use botbus::store::{LogStore, ReadFrom};

use support::{commands_stream, mem_bus, payload, test_config};

#[tokio::test]
async fn ensure_group_is_idempotent() {
    let (store, bus) = mem_bus(test_config());
    let stream = commands_stream();

    bus.group_manager().ensure_group(stream.as_str(), "g").await.unwrap();
    bus.group_manager().ensure_group(stream.as_str(), "g").await.unwrap();

    let groups = store.groups(stream.as_str()).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "g");
}

#[tokio::test]
async fn false_group_exists_response_is_not_swallowed() {
    let (store, bus) = mem_bus(test_config());
    let stream = commands_stream();

    bus.group_manager().ensure_group(stream.as_str(), "real").await.unwrap();

    // The store claims the group exists, but the listing disagrees.
    store.fail_next("create_group", StoreError::GroupExists);
    let result = bus.group_manager().ensure_group(stream.as_str(), "phantom").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn group_lag_decreases_as_the_group_consumes() {
    let (store, bus) = mem_bus(test_config());
    let stream = commands_stream();

    bus.group_manager().ensure_group(stream.as_str(), "g").await.unwrap();
    for n in 0..5 {
        bus.publish(&stream, payload("n", n), "STATUS_UPDATE", Priority::Normal)
            .await
            .unwrap();
    }
    assert_eq!(
        bus.group_manager().group_lag(stream.as_str(), "g").await.unwrap(),
        Some(5)
    );

    store
        .read_group(stream.as_str(), "g", "c1", 2, None, ReadFrom::New)
        .await
        .unwrap();
    assert_eq!(
        bus.group_manager().group_lag(stream.as_str(), "g").await.unwrap(),
        Some(3)
    );
}

#[tokio::test]
async fn group_lag_is_none_for_missing_stream_or_group() {
    let (_store, bus) = mem_bus(test_config());
    let stream = commands_stream();

    assert_eq!(bus.group_manager().group_lag(stream.as_str(), "g").await.unwrap(), None);

    bus.group_manager().ensure_group(stream.as_str(), "g").await.unwrap();
    assert_eq!(
        bus.group_manager().group_lag(stream.as_str(), "other").await.unwrap(),
        None
    );
}
