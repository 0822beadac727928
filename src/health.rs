//! Stream and system health reporting.
//!
//! Polls the log store independently of the hot path; thresholds come from
//! [`HealthConfig`].

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::config::HealthConfig;
use crate::error::{Result, StoreError};
use crate::metrics::{ThroughputCounters, ThroughputSnapshot};
use crate::store::LogStore;
use crate::stream_name::{catalog, StreamName};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
    NotFound,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Error => "error",
            HealthStatus::NotFound => "not_found",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupHealth {
    pub name: String,
    pub consumers: u64,
    pub pending: u64,
    pub lag: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamHealth {
    pub stream: String,
    pub status: HealthStatus,
    pub length: u64,
    pub groups: Vec<GroupHealth>,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub total_streams: usize,
    pub healthy: usize,
    pub warning: usize,
    pub error: usize,
    pub not_found: usize,
    pub store_connected: bool,
    #[serde(skip)]
    pub throughput: ThroughputSnapshot,
    pub streams: Vec<StreamHealth>,
}

/// Aggregates per-stream length, lag, pending and DLQ-side facts into a
/// single operator-visible snapshot.
#[derive(Clone)]
pub struct HealthCollector {
    store: Arc<dyn LogStore>,
    config: HealthConfig,
    counters: Arc<ThroughputCounters>,
}

impl HealthCollector {
    pub fn new(
        store: Arc<dyn LogStore>,
        config: HealthConfig,
        counters: Arc<ThroughputCounters>,
    ) -> Self {
        Self {
            store,
            config,
            counters,
        }
    }

    /// Health of a single stream.
    pub async fn stream_health(&self, stream: &StreamName) -> Result<StreamHealth> {
        let info = match self.store.stream_info(stream.as_str()).await {
            Ok(info) => info,
            Err(err) => return Ok(self.errored(stream, err)),
        };
        let Some(info) = info else {
            return Ok(StreamHealth {
                stream: stream.to_string(),
                status: HealthStatus::NotFound,
                length: 0,
                groups: Vec::new(),
                issues: vec!["stream_not_found".into()],
            });
        };

        let groups = match self.store.groups(stream.as_str()).await {
            Ok(groups) => groups,
            Err(StoreError::NoSuchStream) => Vec::new(),
            Err(err) => return Ok(self.errored(stream, err)),
        };

        let mut issues = Vec::new();
        if info.length > self.config.max_stream_length {
            issues.push(format!("stream_too_long:{}", info.length));
        }
        if groups.is_empty() {
            issues.push("no_consumer_groups".into());
        }
        for group in &groups {
            if let Some(lag) = group.lag {
                if lag > self.config.max_group_lag {
                    issues.push(format!("high_lag:{}:{lag}", group.name));
                }
            }
            if group.pending > self.config.max_group_pending {
                issues.push(format!("high_pending:{}:{}", group.name, group.pending));
            }
        }

        let status = if issues.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Warning
        };
        Ok(StreamHealth {
            stream: stream.to_string(),
            status,
            length: info.length,
            groups: groups
                .into_iter()
                .map(|g| GroupHealth {
                    name: g.name,
                    consumers: g.consumers,
                    pending: g.pending,
                    lag: g.lag,
                })
                .collect(),
            issues,
        })
    }

    fn errored(&self, stream: &StreamName, err: StoreError) -> StreamHealth {
        warn!(stream = %stream, error = %err, "stream health query failed");
        StreamHealth {
            stream: stream.to_string(),
            status: HealthStatus::Error,
            length: 0,
            groups: Vec::new(),
            issues: vec![format!("store_error:{err}")],
        }
    }

    /// Aggregate health across the platform stream catalog.
    pub async fn system_health(&self) -> Result<SystemHealth> {
        let streams: Vec<StreamName> = catalog::all_streams()
            .into_iter()
            .map(StreamName::parse)
            .collect::<std::result::Result<_, _>>()?;
        self.system_health_for(&streams).await
    }

    /// Aggregate health across an explicit stream set.
    pub async fn system_health_for(&self, streams: &[StreamName]) -> Result<SystemHealth> {
        let store_connected = self.store.ping().await.is_ok();

        let mut reports = Vec::with_capacity(streams.len());
        for stream in streams {
            reports.push(self.stream_health(stream).await?);
        }

        let count = |status: HealthStatus| reports.iter().filter(|r| r.status == status).count();
        let healthy = count(HealthStatus::Healthy);
        let warning = count(HealthStatus::Warning);
        let error = count(HealthStatus::Error);
        let not_found = count(HealthStatus::NotFound);

        let overall_status = if !store_connected || error > 0 {
            HealthStatus::Error
        } else if warning > 0 {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        Ok(SystemHealth {
            overall_status,
            total_streams: streams.len(),
            healthy,
            warning,
            error,
            not_found,
            store_connected,
            throughput: self.counters.snapshot(),
            streams: reports,
        })
    }
}
