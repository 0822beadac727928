//! Redis Streams implementation of the log store port.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError, Value};
use tracing::debug;

use crate::error::StoreError;

use super::{EntryId, GroupInfo, LogStore, ReadFrom, StreamEntry, StreamInfo};

/// Log store backed by a Redis Streams server.
///
/// Holds a single multiplexed connection manager shared by every bus task;
/// Redis serializes concurrent stream writers itself, so no locking happens
/// on this side.
#[derive(Clone)]
pub struct RedisLogStore {
    conn: ConnectionManager,
}

impl RedisLogStore {
    /// Open a connection and verify it with a ping.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(map_err)?;
        let conn = ConnectionManager::new(client).await.map_err(map_err)?;
        let store = Self { conn };
        store.ping().await?;
        debug!(url, "connected to redis log store");
        Ok(store)
    }
}

fn map_err(err: RedisError) -> StoreError {
    let message = err.to_string();
    if message.contains("BUSYGROUP") {
        StoreError::GroupExists
    } else if message.contains("NOGROUP") || message.contains("no such key") {
        StoreError::NoSuchStream
    } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        StoreError::Unreachable(message)
    } else {
        StoreError::Other(message)
    }
}

fn as_string(value: &Value) -> Option<String> {
    redis::from_redis_value::<String>(value).ok()
}

fn as_u64(value: &Value) -> Option<u64> {
    redis::from_redis_value::<u64>(value).ok()
}

/// Flatten an XINFO-style reply (alternating key/value array) into pairs.
fn info_map(value: &Value) -> Vec<(String, Value)> {
    let items = match value {
        Value::Array(items) => items.as_slice(),
        Value::Map(pairs) => {
            return pairs
                .iter()
                .filter_map(|(k, v)| as_string(k).map(|k| (k, v.clone())))
                .collect()
        }
        _ => return Vec::new(),
    };
    items
        .chunks_exact(2)
        .filter_map(|pair| as_string(&pair[0]).map(|k| (k, pair[1].clone())))
        .collect()
}

fn info_field<'a>(map: &'a [(String, Value)], key: &str) -> Option<&'a Value> {
    map.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn entries_from_reply(reply: StreamReadReply) -> Vec<StreamEntry> {
    let mut entries = Vec::new();
    for key in reply.keys {
        for id in key.ids {
            let mut fields: Vec<(String, String)> = id
                .map
                .iter()
                .filter_map(|(k, v)| as_string(v).map(|v| (k.clone(), v)))
                .collect();
            // HashMap iteration order is arbitrary; keep records deterministic.
            fields.sort_by(|a, b| a.0.cmp(&b.0));
            entries.push(StreamEntry {
                id: EntryId(id.id),
                fields,
            });
        }
    }
    entries
}

#[async_trait]
impl LogStore for RedisLogStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<()>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn append(
        &self,
        stream: &str,
        fields: &[(String, String)],
    ) -> Result<EntryId, StoreError> {
        let mut conn = self.conn.clone();
        let id: String = conn.xadd(stream, "*", fields).await.map_err(map_err)?;
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
        let mut conn = self.conn.clone();
        let mut options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count);
        if let Some(block) = block {
            options = options.block(block.as_millis() as usize);
        }
        let start = match from {
            ReadFrom::New => ">",
            ReadFrom::PendingStart => "0",
        };
        let reply: StreamReadReply = conn
            .xread_options(&[stream], &[start], &options)
            .await
            .map_err(map_err)?;
        Ok(entries_from_reply(reply))
    }

    async fn ack(&self, stream: &str, group: &str, id: &EntryId) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        conn.xack(stream, group, &[id.as_str()])
            .await
            .map_err(map_err)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.xgroup_create_mkstream::<_, _, _, ()>(stream, group, "0")
            .await
            .map_err(map_err)
    }

    async fn groups(&self, stream: &str) -> Result<Vec<GroupInfo>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Value = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(stream)
            .query_async(&mut conn)
            .await
            .map_err(map_err)?;

        let Value::Array(groups) = raw else {
            return Ok(Vec::new());
        };
        Ok(groups
            .iter()
            .map(info_map)
            .filter_map(|map| {
                Some(GroupInfo {
                    name: info_field(&map, "name").and_then(as_string)?,
                    consumers: info_field(&map, "consumers").and_then(as_u64).unwrap_or(0),
                    pending: info_field(&map, "pending").and_then(as_u64).unwrap_or(0),
                    lag: info_field(&map, "lag").and_then(as_u64),
                })
            })
            .collect())
    }

    async fn stream_info(&self, stream: &str) -> Result<Option<StreamInfo>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Result<Value, RedisError> = redis::cmd("XINFO")
            .arg("STREAM")
            .arg(stream)
            .query_async(&mut conn)
            .await;
        let raw = match raw {
            Ok(raw) => raw,
            Err(err) => {
                return match map_err(err) {
                    StoreError::NoSuchStream => Ok(None),
                    other => Err(other),
                }
            }
        };
        let map = info_map(&raw);
        Ok(Some(StreamInfo {
            length: info_field(&map, "length").and_then(as_u64).unwrap_or(0),
            last_id: EntryId(
                info_field(&map, "last-generated-id")
                    .and_then(as_string)
                    .unwrap_or_else(|| "0-0".into()),
            ),
        }))
    }

    async fn range(&self, stream: &str, count: usize) -> Result<Vec<StreamEntry>, StoreError> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamRangeReply = conn
            .xrange_count(stream, "-", "+", count)
            .await
            .map_err(map_err)?;
        Ok(reply
            .ids
            .into_iter()
            .map(|id| {
                let mut fields: Vec<(String, String)> = id
                    .map
                    .iter()
                    .filter_map(|(k, v)| as_string(v).map(|v| (k.clone(), v)))
                    .collect();
                fields.sort_by(|a, b| a.0.cmp(&b.0));
                StreamEntry {
                    id: EntryId(id.id),
                    fields,
                }
            })
            .collect())
    }

    async fn delete(&self, stream: &str, ids: &[EntryId]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let ids: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
        conn.xdel(stream, &ids).await.map_err(map_err)
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Result<Value, RedisError> = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await;
        match raw {
            Ok(Value::Array(items)) => Ok(items.first().and_then(as_u64).unwrap_or(0)),
            Ok(_) => Ok(0),
            Err(err) => match map_err(err) {
                StoreError::NoSuchStream => Ok(0),
                other => Err(other),
            },
        }
    }
}
