//! Lane header
//!
//! Persisted as the content of the lane's thread, so the layout of a file can
//! be rebuilt from remote metadata alone. Keys are single letters to keep the
//! header well below the record size limit.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LaneHeader {
    /// Stripe index, fixed at creation
    #[serde(rename = "n")]
    pub number: usize,
    /// Records created so far
    #[serde(rename = "l")]
    pub length: u64,
    /// Id of the last record
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub tail: Option<String>,
    /// Free payload bytes in the tail record; 0 means the next write opens a new record
    #[serde(rename = "c")]
    pub capacity: usize,
    #[serde(rename = "u")]
    pub uuid: Uuid,
}

impl LaneHeader {
    /// Header of an empty lane
    pub fn new(number: usize) -> Self {
        Self {
            number,
            length: 0,
            tail: None,
            capacity: 0,
            uuid: Uuid::new_v4(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Strict parse: unknown or missing keys are rejected.
    pub fn from_json(content: &[u8]) -> Result<Self> {
        serde_json::from_slice(content).map_err(|e| Error::MalformedHeader(e.to_string()))
    }

    /// Check the header against the record geometry. Headers come from the
    /// store, so a violation is corrupt input rather than a local bug.
    pub fn validate(&self, effective_record_size: usize) -> Result<()> {
        if self.capacity > effective_record_size {
            return Err(Error::MalformedHeader(format!(
                "lane {} capacity {} exceeds record payload of {}",
                self.number, self.capacity, effective_record_size
            )));
        }
        if self.capacity > 0 && self.length == 0 {
            return Err(Error::MalformedHeader(format!(
                "lane {} has capacity {} but no records",
                self.number, self.capacity
            )));
        }
        if self.tail.is_some() != (self.length > 0) {
            return Err(Error::MalformedHeader(format!(
                "lane {} has {} records but tail {:?}",
                self.number, self.length, self.tail
            )));
        }
        Ok(())
    }

    /// Payload bytes held by the lane
    pub fn size(&self, effective_record_size: usize) -> u64 {
        self.length * effective_record_size as u64 - self.capacity as u64
    }

    /// Records that are completely filled
    pub fn full_records(&self) -> u64 {
        if self.capacity > 0 {
            self.length - 1
        } else {
            self.length
        }
    }

    pub fn has_open_tail(&self) -> bool {
        self.capacity > 0
    }
}
