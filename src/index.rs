//! Index reconstruction
//!
//! A container holds one thread per lane plus one thread carrying the
//! [`FileHeader`]. Nothing else is persisted: opening a file lists every
//! thread of the container and classifies its content.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::lane::LaneHeader;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// File creation options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileOptions {
    /// Number of lanes; 0 picks the configured default
    pub lanes: usize,
}

impl FileOptions {
    pub fn with_lanes(lanes: usize) -> Self {
        Self { lanes }
    }

    /// Fill in defaults for unset values
    pub fn resolve(mut self, default_lanes: usize) -> Self {
        if self.lanes == 0 {
            self.lanes = default_lanes;
        }
        self
    }
}

/// Container-level metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileHeader {
    #[serde(rename = "o")]
    pub options: FileOptions,
}

impl FileHeader {
    pub fn new(options: FileOptions) -> Self {
        Self { options }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Content of a container thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    Lane(LaneHeader),
    File(FileHeader),
}

impl Header {
    /// Classify thread content: a strict lane header first, then a strict
    /// file header.
    pub fn parse(content: &[u8]) -> Result<Self> {
        if let Ok(lane) = serde_json::from_slice::<LaneHeader>(content) {
            return Ok(Header::Lane(lane));
        }
        serde_json::from_slice::<FileHeader>(content)
            .map(Header::File)
            .map_err(|e| {
                Error::MalformedHeader(format!(
                    "neither lane nor file header ({}): {}",
                    e,
                    String::from_utf8_lossy(content)
                ))
            })
    }
}

/// A lane as found in the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneEntry {
    pub thread_id: String,
    pub header: LaneHeader,
    pub modified: DateTime<Utc>,
}

/// File header plus lanes in ascending lane number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Index {
    pub header: FileHeader,
    pub lanes: Vec<LaneEntry>,
}

impl Index {
    /// List every thread of `container` and rebuild its index.
    pub async fn build(backend: &Backend, cancel: &CancellationToken, container: &str) -> Result<Self> {
        let mut file_header: Option<FileHeader> = None;
        let mut lanes = Vec::new();
        let page_size = backend.page_size();
        let effective = backend.effective_record_size();
        let mut token: Option<String> = None;

        loop {
            let page_token = token.as_deref();
            let page = backend
                .retry(cancel, "list_threads", 1, |client| async move {
                    client.list_threads(container, page_token, page_size).await
                })
                .await?;

            for thread in page.items {
                match Header::parse(&thread.content) {
                    Ok(Header::Lane(header)) => {
                        header.validate(effective)?;
                        lanes.push(LaneEntry {
                            thread_id: thread.id,
                            header,
                            modified: thread.modified,
                        });
                    }
                    Ok(Header::File(_)) | Err(_) if file_header.is_some() => {
                        return Err(Error::DuplicateFileHeader(container.to_string()));
                    }
                    Ok(Header::File(header)) => file_header = Some(header),
                    Err(err) => return Err(err),
                }
            }

            match page.next_page {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        let header = file_header.ok_or(Error::MissingFileHeader)?;
        lanes.sort_by(|a, b| a.header.number.cmp(&b.header.number));

        if let Some(pair) = lanes.windows(2).find(|w| w[0].header.number == w[1].header.number) {
            return Err(Error::MalformedHeader(format!(
                "lane number {} appears on threads {} and {}",
                pair[0].header.number, pair[0].thread_id, pair[1].thread_id
            )));
        }
        if lanes.len() != header.options.lanes {
            warn!(
                container,
                expected = header.options.lanes,
                found = lanes.len(),
                "Lane count differs from file header"
            );
        }

        debug!(container, lanes = lanes.len(), "Built index");
        Ok(Self { header, lanes })
    }

    /// Size in bytes according to the lane headers
    pub fn size(&self, effective_record_size: usize) -> u64 {
        self.lanes
            .iter()
            .map(|lane| lane.header.size(effective_record_size))
            .sum()
    }

    /// Lane positions ordered for writing: fewest full records first, then by
    /// lane number. A lane with an open tail sorts with the lanes that have
    /// not yet reached its row, so appends resume where the last write ended.
    pub fn writer_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.lanes.len()).collect();
        order.sort_by(|&a, &b| {
            let (a, b) = (&self.lanes[a].header, &self.lanes[b].header);
            match a.full_records().cmp(&b.full_records()) {
                Ordering::Equal => a.number.cmp(&b.number),
                other => other,
            }
        });
        order
    }
}
