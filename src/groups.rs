//! Consumer group management.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::store::LogStore;

/// Creates groups idempotently and reports group lag.
///
/// Takes raw stream names rather than validated [`StreamName`]s because groups
/// also live on derived side-streams (`:critical`), which are exempt from the
/// naming convention.
///
/// [`StreamName`]: crate::stream_name::StreamName
#[derive(Clone)]
pub struct GroupManager {
    store: Arc<dyn LogStore>,
}

impl GroupManager {
    pub fn new(store: Arc<dyn LogStore>) -> Self {
        Self { store }
    }

    /// Ensure `group` exists on `stream`, positioned at the start.
    ///
    /// Creating an already-existing group is not an error, but the store's
    /// "already exists" response is verified against the group listing rather
    /// than trusted blindly — a different failure dressed up as BUSYGROUP must
    /// not be swallowed.
    pub async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        match self.store.create_group(stream, group).await {
            Ok(()) => {
                info!(stream, group, "created consumer group");
                Ok(())
            }
            Err(StoreError::GroupExists) => {
                let groups = self.store.groups(stream).await?;
                if groups.iter().any(|g| g.name == group) {
                    debug!(stream, group, "consumer group already exists");
                    Ok(())
                } else {
                    Err(StoreError::Other(format!(
                        "store reported group '{group}' exists on '{stream}' but it is not listed"
                    ))
                    .into())
                }
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Store-reported count of undelivered entries for a group, or `None` if
    /// the stream or group does not exist.
    pub async fn group_lag(&self, stream: &str, group: &str) -> Result<Option<u64>> {
        let groups = match self.store.groups(stream).await {
            Ok(groups) => groups,
            Err(StoreError::NoSuchStream) => return Ok(None),
            Err(other) => return Err(other.into()),
        };
        Ok(groups.into_iter().find(|g| g.name == group).and_then(|g| g.lag))
    }
}
