//! Backing store interface
//!
//! # Architecture
//!
//! The store is a comment/reply service attached to container objects:
//!
//! ```text
//! Containers (one per logical file)
//!   └─→ Threads (content = one FileHeader or one LaneHeader)
//!        └─→ Records (bounded content, append-oriented)
//! ```
//!
//! Record content is limited in size and trimmed of edge whitespace by the
//! store. Every call counts against per-credential and aggregate quotas,
//! which the [`ClientPool`](crate::pool::ClientPool) enforces before a call is
//! issued.

pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use memory::{Fault, MemoryStore, Operation};

/// Container metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub id: String,
    pub name: String,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// A thread attached to a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub id: String,
    pub content: Vec<u8>,
    pub modified: DateTime<Utc>,
}

/// A bounded record within a thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    pub content: Vec<u8>,
}

/// One page of a paginated listing
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page: Option<String>,
}

/// Access role granted to a credential on a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Writer,
    Commenter,
    Reader,
}

/// Permission entry on a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub email: String,
    pub role: Role,
}

/// Backing store operations
///
/// Implementations report missing objects as `Error::NotFound` and service
/// failures as `Error::Remote` carrying the HTTP-like status code.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create_container(&self, name: &str) -> Result<Container>;

    async fn delete_container(&self, id: &str) -> Result<()>;

    async fn get_container(&self, id: &str) -> Result<Container>;

    /// List containers, optionally filtered by exact name
    async fn list_containers(&self, name: Option<&str>, page_token: Option<&str>) -> Result<Page<Container>>;

    async fn create_thread(&self, container: &str, content: Vec<u8>) -> Result<Thread>;

    /// Replace a thread's own content (its metadata)
    async fn update_thread(&self, container: &str, thread: &str, content: Vec<u8>) -> Result<Thread>;

    async fn list_threads(
        &self,
        container: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Thread>>;

    async fn create_record(&self, container: &str, thread: &str, content: Vec<u8>) -> Result<Record>;

    async fn get_record(&self, container: &str, thread: &str, record: &str) -> Result<Record>;

    async fn update_record(
        &self,
        container: &str,
        thread: &str,
        record: &str,
        content: Vec<u8>,
    ) -> Result<Record>;

    async fn delete_record(&self, container: &str, thread: &str, record: &str) -> Result<()>;

    /// List records of a thread in creation order
    async fn list_records(
        &self,
        container: &str,
        thread: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Record>>;

    async fn list_permissions(&self, container: &str) -> Result<Vec<Permission>>;

    async fn create_permission(&self, container: &str, email: &str, role: Role) -> Result<Permission>;
}
