use super::File;
use crate::error::Result;
use crate::index::Index;
use crate::lane;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

/// File description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Container id
    pub id: String,
    pub name: String,
    /// Bytes according to the lane headers
    pub size: u64,
    /// Latest modification of the container or any lane
    pub modified: DateTime<Utc>,
    pub lanes: usize,
}

impl File {
    /// Describe the file from local state only.
    pub async fn stat(&self) -> FileStat {
        let mut size = 0;
        let (id, name, mut modified) = {
            let container = self.container.read();
            (container.id.clone(), container.name.clone(), container.modified)
        };
        for lane in &self.lanes {
            let lane = lane.lock().await;
            size += lane.size();
            modified = modified.max(lane.modified());
        }

        FileStat {
            id,
            name,
            size,
            modified,
            lanes: self.lanes.len(),
        }
    }

    /// Refresh the container metadata from the store, then describe the file.
    #[instrument(skip(self, cancel), fields(container = %self.id()))]
    pub async fn fstat(&self, cancel: &CancellationToken) -> Result<FileStat> {
        let id = self.id();
        let id = id.as_str();
        let container = self
            .backend
            .retry(cancel, "get_container", 1, |client| async move {
                client.get_container(id).await
            })
            .await?;
        *self.container.write() = container;
        Ok(self.stat().await)
    }

    /// Size recomputed from the records actually stored, ignoring headers.
    #[instrument(skip(self, cancel), fields(container = %self.id()))]
    pub async fn authoritative_size(&self, cancel: &CancellationToken) -> Result<u64> {
        let id = self.id();
        let index = Index::build(&self.backend, cancel, &id).await?;

        let mut total = 0;
        for entry in &index.lanes {
            let bytes = lane::record_bytes(&self.backend, cancel, &id, &entry.thread_id).await?;
            let expected = entry.header.size(self.backend.effective_record_size());
            if bytes != expected {
                warn!(
                    lane = entry.header.number,
                    header = expected,
                    stored = bytes,
                    "Lane header disagrees with stored records"
                );
            }
            total += bytes;
        }
        Ok(total)
    }
}
