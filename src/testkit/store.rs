//! In-memory [`LogStore`] with Redis-Streams-shaped semantics.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::StoreError;
use crate::store::{EntryId, GroupInfo, LogStore, ReadFrom, StreamEntry, StreamInfo};

#[derive(Debug, Clone)]
struct PendingEntry {
    consumer: String,
    delivery_count: u32,
}

#[derive(Debug, Default)]
struct GroupData {
    /// Index into the stream's entry vec of the next undelivered entry.
    next_index: usize,
    /// Delivered-but-unacknowledged entries, ordered by id.
    pending: BTreeMap<String, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamData {
    entries: Vec<(String, Vec<(String, String)>)>,
    groups: HashMap<String, GroupData>,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, StreamData>,
    next_seq: u64,
    /// Scripted outcomes, popped per operation name. `None` lets the call
    /// through, so failures can be aimed at the nth call.
    failures: HashMap<&'static str, VecDeque<Option<StoreError>>>,
    ping_fails_remaining: u32,
}

/// In-memory log store for tests.
///
/// Entry ids are monotonically increasing `"{seq}-0"` strings, so id order is
/// append order. Groups track a delivery cursor and a pending list exactly
/// like a Redis consumer group with a single competing read path. A group
/// read with a `block` timeout suspends until an append arrives or the
/// timeout passes, matching `XREADGROUP BLOCK`.
#[derive(Clone, Default)]
pub struct MemoryLogStore {
    inner: Arc<Mutex<Inner>>,
    /// Wakes blocked group reads when an entry lands.
    appended: Arc<Notify>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for the next call to `op` (one of `"append"`,
    /// `"read_group"`, `"ack"`, `"create_group"`, `"groups"`,
    /// `"stream_info"`, `"range"`, `"delete"`, `"pending_count"`).
    pub fn fail_next(&self, op: &'static str, error: StoreError) {
        self.inner
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(Some(error));
    }

    /// Queue `n` transport failures for `op`.
    pub fn fail_times(&self, op: &'static str, n: usize) {
        for _ in 0..n {
            self.fail_next(op, StoreError::Unreachable("scripted failure".into()));
        }
    }

    /// Let the next `n` calls to `op` succeed before any queued failure
    /// fires, so a failure can be aimed at a specific later call.
    pub fn pass_times(&self, op: &'static str, n: usize) {
        let mut inner = self.inner.lock();
        let queue = inner.failures.entry(op).or_default();
        for _ in 0..n {
            queue.push_back(None);
        }
    }

    /// Make the next `n` pings fail, simulating a store outage for the
    /// reconnect gate.
    pub fn fail_pings(&self, n: u32) {
        self.inner.lock().ping_fails_remaining = n;
    }

    /// All entries currently in `stream`, in append order.
    pub fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        self.inner
            .lock()
            .streams
            .get(stream)
            .map(|s| {
                s.entries
                    .iter()
                    .map(|(id, fields)| StreamEntry {
                        id: EntryId(id.clone()),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn stream_len(&self, stream: &str) -> usize {
        self.inner
            .lock()
            .streams
            .get(stream)
            .map(|s| s.entries.len())
            .unwrap_or(0)
    }

    /// Pending-entry count for `(stream, group)`.
    pub fn pending_len(&self, stream: &str, group: &str) -> usize {
        self.inner
            .lock()
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    fn take_failure(inner: &mut Inner, op: &'static str) -> Option<StoreError> {
        inner.failures.get_mut(op).and_then(|q| q.pop_front()).flatten()
    }

    /// One synchronous group-read pass under the lock.
    fn read_now(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        from: ReadFrom,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let mut inner = self.inner.lock();
        let data = inner
            .streams
            .get_mut(stream)
            .ok_or(StoreError::NoSuchStream)?;
        let group_data = data.groups.get_mut(group).ok_or(StoreError::NoSuchStream)?;

        match from {
            ReadFrom::New => {
                let mut delivered = Vec::new();
                while delivered.len() < count && group_data.next_index < data.entries.len() {
                    let (id, fields) = &data.entries[group_data.next_index];
                    group_data.next_index += 1;
                    group_data.pending.insert(
                        id.clone(),
                        PendingEntry {
                            consumer: consumer.to_string(),
                            delivery_count: 1,
                        },
                    );
                    delivered.push(StreamEntry {
                        id: EntryId(id.clone()),
                        fields: fields.clone(),
                    });
                }
                Ok(delivered)
            }
            ReadFrom::PendingStart => {
                let ids: Vec<String> = group_data
                    .pending
                    .iter()
                    .filter(|(_, p)| p.consumer == consumer)
                    .map(|(id, _)| id.clone())
                    .take(count)
                    .collect();
                let mut delivered = Vec::new();
                for id in ids {
                    if let Some(pending) = group_data.pending.get_mut(&id) {
                        pending.delivery_count += 1;
                    }
                    if let Some((_, fields)) = data.entries.iter().find(|(eid, _)| *eid == id) {
                        delivered.push(StreamEntry {
                            id: EntryId(id),
                            fields: fields.clone(),
                        });
                    }
                }
                Ok(delivered)
            }
        }
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.ping_fails_remaining > 0 {
            inner.ping_fails_remaining -= 1;
            return Err(StoreError::Unreachable("scripted ping failure".into()));
        }
        Ok(())
    }

    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
    ) -> Result<EntryId, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = Self::take_failure(&mut inner, "append") {
            return Err(err);
        }
        inner.next_seq += 1;
        let id = format!("{}-0", inner.next_seq);
        inner
            .streams
            .entry(stream.to_string())
            .or_default()
            .entries
            .push((id.clone(), fields.to_vec()));
        drop(inner);
        self.appended.notify_waiters();
        Ok(EntryId(id))
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
        from: ReadFrom,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        {
            let mut inner = self.inner.lock();
            if let Some(err) = Self::take_failure(&mut inner, "read_group") {
                return Err(err);
            }
        }
        let deadline = block.map(|timeout| tokio::time::Instant::now() + timeout);
        loop {
            // Register interest before checking, so an append landing between
            // the check and the wait still wakes this reader.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = self.read_now(stream, group, consumer, count, from)?;
            if !entries.is_empty() || matches!(from, ReadFrom::PendingStart) {
                return Ok(entries);
            }
            // A pending-list read returns immediately regardless of `block`,
            // like XREADGROUP with an explicit id.
            let Some(deadline) = deadline else {
                return Ok(entries);
            };
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &EntryId) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = Self::take_failure(&mut inner, "ack") {
            return Err(err);
        }
        let removed = inner
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .map(|g| g.pending.remove(id.as_str()).is_some())
            .unwrap_or(false);
        Ok(removed as u64)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = Self::take_failure(&mut inner, "create_group") {
            return Err(err);
        }
        let data = inner.streams.entry(stream.to_string()).or_default();
        if data.groups.contains_key(group) {
            return Err(StoreError::GroupExists);
        }
        data.groups.insert(group.to_string(), GroupData::default());
        Ok(())
    }

    async fn groups(&self, stream: &str) -> Result<Vec<GroupInfo>, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = Self::take_failure(&mut inner, "groups") {
            return Err(err);
        }
        let data = inner.streams.get(stream).ok_or(StoreError::NoSuchStream)?;
        let mut groups: Vec<GroupInfo> = data
            .groups
            .iter()
            .map(|(name, g)| {
                let consumers = g
                    .pending
                    .values()
                    .map(|p| p.consumer.as_str())
                    .collect::<std::collections::HashSet<_>>()
                    .len() as u64;
                GroupInfo {
                    name: name.clone(),
                    consumers,
                    pending: g.pending.len() as u64,
                    lag: Some((data.entries.len() - g.next_index.min(data.entries.len())) as u64),
                }
            })
            .collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }

    async fn stream_info(&self, stream: &str) -> Result<Option<StreamInfo>, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = Self::take_failure(&mut inner, "stream_info") {
            return Err(err);
        }
        Ok(inner.streams.get(stream).map(|data| StreamInfo {
            length: data.entries.len() as u64,
            last_id: EntryId(
                data.entries
                    .last()
                    .map(|(id, _)| id.clone())
                    .unwrap_or_else(|| "0-0".into()),
            ),
        }))
    }

    async fn range(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = Self::take_failure(&mut inner, "range") {
            return Err(err);
        }
        let data = inner.streams.get(stream).ok_or(StoreError::NoSuchStream)?;
        Ok(data
            .entries
            .iter()
            .take(count)
            .map(|(id, fields)| StreamEntry {
                id: EntryId(id.clone()),
                fields: fields.clone(),
            })
            .collect())
    }

    async fn delete(&self, stream: &str, ids: &[EntryId]) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = Self::take_failure(&mut inner, "delete") {
            return Err(err);
        }
        let Some(data) = inner.streams.get_mut(stream) else {
            return Ok(0);
        };
        let before = data.entries.len();
        let removed_ids: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        // Group cursors index into the entry vec; walk them back past removals
        // so undelivered entries are not skipped.
        for group in data.groups.values_mut() {
            let removed_before_cursor = data
                .entries
                .iter()
                .take(group.next_index)
                .filter(|(id, _)| removed_ids.contains(&id.as_str()))
                .count();
            group.next_index -= removed_before_cursor;
        }
        data.entries.retain(|(id, _)| !removed_ids.contains(&id.as_str()));
        Ok((before - data.entries.len()) as u64)
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        if let Some(err) = Self::take_failure(&mut inner, "pending_count") {
            return Err(err);
        }
        Ok(inner
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(n: u32) -> Vec<(String, String)> {
        vec![("n".into(), n.to_string())]
    }

    #[tokio::test]
    async fn delivers_in_append_order_once_per_group() {
        let store = MemoryLogStore::new();
        for n in 0..3 {
            store.append("s", &fields(n)).await.unwrap();
        }
        store.create_group("s", "g").await.unwrap();

        let first = store
            .read_group("s", "g", "c1", 2, None, ReadFrom::New)
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].fields, fields(0));
        assert_eq!(first[1].fields, fields(1));

        let second = store
            .read_group("s", "g", "c1", 10, None, ReadFrom::New)
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].fields, fields(2));
    }

    #[tokio::test]
    async fn ack_clears_pending() {
        let store = MemoryLogStore::new();
        store.append("s", &fields(1)).await.unwrap();
        store.create_group("s", "g").await.unwrap();
        let entries = store
            .read_group("s", "g", "c1", 1, None, ReadFrom::New)
            .await
            .unwrap();
        assert_eq!(store.pending_len("s", "g"), 1);

        store.ack("s", "g", &entries[0].id).await.unwrap();
        assert_eq!(store.pending_len("s", "g"), 0);
    }

    #[tokio::test]
    async fn pending_start_redelivers_unacked() {
        let store = MemoryLogStore::new();
        store.append("s", &fields(1)).await.unwrap();
        store.create_group("s", "g").await.unwrap();
        store
            .read_group("s", "g", "c1", 1, None, ReadFrom::New)
            .await
            .unwrap();

        let redelivered = store
            .read_group("s", "g", "c1", 10, None, ReadFrom::PendingStart)
            .await
            .unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].fields, fields(1));

        // Other consumers in the group do not see c1's pending entries.
        let other = store
            .read_group("s", "g", "c2", 10, None, ReadFrom::PendingStart)
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn groups_report_lag() {
        let store = MemoryLogStore::new();
        store.create_group("s", "g").await.unwrap();
        for n in 0..5 {
            store.append("s", &fields(n)).await.unwrap();
        }
        let groups = store.groups("s").await.unwrap();
        assert_eq!(groups[0].lag, Some(5));

        store
            .read_group("s", "g", "c1", 2, None, ReadFrom::New)
            .await
            .unwrap();
        let groups = store.groups("s").await.unwrap();
        assert_eq!(groups[0].lag, Some(3));
        assert_eq!(groups[0].pending, 2);
    }

    #[tokio::test]
    async fn delete_adjusts_group_cursor() {
        let store = MemoryLogStore::new();
        store.create_group("s", "g").await.unwrap();
        let first = store.append("s", &fields(0)).await.unwrap();
        store.append("s", &fields(1)).await.unwrap();
        store
            .read_group("s", "g", "c1", 1, None, ReadFrom::New)
            .await
            .unwrap();

        store.delete("s", &[first]).await.unwrap();
        let next = store
            .read_group("s", "g", "c1", 1, None, ReadFrom::New)
            .await
            .unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].fields, fields(1));
    }

    #[tokio::test]
    async fn blocking_read_wakes_on_append() {
        let store = MemoryLogStore::new();
        store.create_group("s", "g").await.unwrap();

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .read_group("s", "g", "c1", 1, Some(Duration::from_secs(5)), ReadFrom::New)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.append("s", &fields(7)).await.unwrap();

        let delivered = reader.await.unwrap().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].fields, fields(7));
    }

    #[tokio::test]
    async fn blocking_read_returns_empty_after_timeout() {
        let store = MemoryLogStore::new();
        store.create_group("s", "g").await.unwrap();
        let start = std::time::Instant::now();
        let delivered = store
            .read_group("s", "g", "c1", 1, Some(Duration::from_millis(20)), ReadFrom::New)
            .await
            .unwrap();
        assert!(delivered.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn scripted_failures_pop_in_order() {
        let store = MemoryLogStore::new();
        store.fail_times("append", 1);
        assert!(store.append("s", &fields(0)).await.is_err());
        assert!(store.append("s", &fields(0)).await.is_ok());
    }

    #[tokio::test]
    async fn pass_times_aims_failures_at_later_calls() {
        let store = MemoryLogStore::new();
        store.pass_times("append", 1);
        store.fail_times("append", 1);
        assert!(store.append("s", &fields(0)).await.is_ok());
        assert!(store.append("s", &fields(1)).await.is_err());
        assert!(store.append("s", &fields(2)).await.is_ok());
    }
}
