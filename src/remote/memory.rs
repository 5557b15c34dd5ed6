//! In-memory store for testing
//!
//! Behaves like the real service where it matters to the striping engine:
//! content is trimmed of leading/trailing whitespace, oversized records are
//! rejected, listings are paginated. Faults can be injected per operation
//! and per thread, and every call is counted.

use super::{Container, Page, Permission, Record, RemoteStore, Role, Thread};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Store operation, used for fault injection and call counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateContainer,
    DeleteContainer,
    GetContainer,
    ListContainers,
    CreateThread,
    UpdateThread,
    ListThreads,
    CreateRecord,
    GetRecord,
    UpdateRecord,
    DeleteRecord,
    ListRecords,
    ListPermissions,
    CreatePermission,
}

/// An injected failure
#[derive(Debug, Clone)]
pub struct Fault {
    pub operation: Operation,
    /// Only fail calls against this thread; `None` matches every call
    pub thread: Option<String>,
    /// Number of calls left to fail
    pub remaining: usize,
    pub code: u16,
}

#[derive(Debug, Clone)]
struct StoredThread {
    id: String,
    content: Vec<u8>,
    modified: chrono::DateTime<Utc>,
    records: Vec<Record>,
}

impl StoredThread {
    fn snapshot(&self) -> Thread {
        Thread {
            id: self.id.clone(),
            content: self.content.clone(),
            modified: self.modified,
        }
    }
}

#[derive(Debug, Clone)]
struct StoredContainer {
    meta: Container,
    threads: Vec<StoredThread>,
    permissions: Vec<Permission>,
}

#[derive(Default)]
struct MemoryState {
    containers: BTreeMap<String, StoredContainer>,
    faults: Vec<Fault>,
    calls: HashMap<Operation, usize>,
    next_id: u64,
}

impl MemoryState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}{}", prefix, self.next_id)
    }

    fn enter(&mut self, operation: Operation, thread: Option<&str>) -> Result<()> {
        *self.calls.entry(operation).or_default() += 1;

        let hit = self.faults.iter_mut().find(|fault| {
            fault.operation == operation
                && fault.remaining > 0
                && match (&fault.thread, thread) {
                    (None, _) => true,
                    (Some(want), Some(got)) => want == got,
                    (Some(_), None) => false,
                }
        });
        match hit {
            Some(fault) => {
                fault.remaining -= 1;
                Err(Error::Remote {
                    code: fault.code,
                    message: format!("injected fault on {:?}", operation),
                })
            }
            None => Ok(()),
        }
    }

    fn container(&mut self, id: &str) -> Result<&mut StoredContainer> {
        self.containers
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("container {}", id)))
    }

    fn thread(&mut self, container: &str, thread: &str) -> Result<&mut StoredThread> {
        self.container(container)?
            .threads
            .iter_mut()
            .find(|t| t.id == thread)
            .ok_or_else(|| Error::NotFound(format!("thread {}", thread)))
    }
}

fn paginate<T: Clone>(items: &[T], page_token: Option<&str>, page_size: usize) -> Result<Page<T>> {
    let start = match page_token {
        Some(token) => token
            .parse::<usize>()
            .map_err(|_| Error::Remote {
                code: 400,
                message: format!("invalid page token {}", token),
            })?,
        None => 0,
    };
    let end = (start + page_size.max(1)).min(items.len());
    let start = start.min(end);
    Ok(Page {
        items: items[start..end].to_vec(),
        next_page: (end < items.len()).then(|| end.to_string()),
    })
}

/// In-memory mock store
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    max_record_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a store accepting records of up to 4096 bytes
    pub fn new() -> Self {
        Self::with_max_record_size(4096)
    }

    pub fn with_max_record_size(max_record_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            max_record_size,
        }
    }

    /// Fail the next `times` calls of `operation`, optionally only against `thread`.
    pub fn inject_fault(&self, operation: Operation, thread: Option<&str>, times: usize, code: u16) {
        self.state.lock().faults.push(Fault {
            operation,
            thread: thread.map(str::to_string),
            remaining: times,
            code,
        });
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Number of calls made for `operation`, failed ones included
    pub fn call_count(&self, operation: Operation) -> usize {
        self.state.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    /// Total number of calls that could have mutated state
    pub fn mutation_count(&self) -> usize {
        use Operation::*;
        let state = self.state.lock();
        [
            CreateContainer,
            DeleteContainer,
            CreateThread,
            UpdateThread,
            CreateRecord,
            UpdateRecord,
            DeleteRecord,
            CreatePermission,
        ]
        .iter()
        .map(|op| state.calls.get(op).copied().unwrap_or(0))
        .sum()
    }

    /// Raw stored contents of a thread's records
    pub fn record_contents(&self, container: &str, thread: &str) -> Vec<Vec<u8>> {
        let mut state = self.state.lock();
        state
            .thread(container, thread)
            .map(|t| t.records.iter().map(|r| r.content.clone()).collect())
            .unwrap_or_default()
    }

    pub fn container_count(&self) -> usize {
        self.state.lock().containers.len()
    }

    /// Record content is bounded by `max_record_size` and trimmed.
    fn store_record(&self, content: Vec<u8>) -> Result<Vec<u8>> {
        if content.len() > self.max_record_size {
            return Err(Error::Remote {
                code: 400,
                message: format!(
                    "content of {} bytes exceeds limit of {}",
                    content.len(),
                    self.max_record_size
                ),
            });
        }
        Ok(trim(&content))
    }
}

/// Thread content is trimmed but not bounded by the record limit.
fn trim(content: &[u8]) -> Vec<u8> {
    let start = content
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(content.len());
    let end = content
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    content[start..end].to_vec()
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn create_container(&self, name: &str) -> Result<Container> {
        let mut state = self.state.lock();
        state.enter(Operation::CreateContainer, None)?;
        let now = Utc::now();
        let meta = Container {
            id: state.next_id("c"),
            name: name.to_string(),
            created: now,
            modified: now,
        };
        state.containers.insert(
            meta.id.clone(),
            StoredContainer {
                meta: meta.clone(),
                threads: Vec::new(),
                permissions: Vec::new(),
            },
        );
        Ok(meta)
    }

    async fn delete_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(Operation::DeleteContainer, None)?;
        state
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("container {}", id)))
    }

    async fn get_container(&self, id: &str) -> Result<Container> {
        let mut state = self.state.lock();
        state.enter(Operation::GetContainer, None)?;
        Ok(state.container(id)?.meta.clone())
    }

    async fn list_containers(&self, name: Option<&str>, page_token: Option<&str>) -> Result<Page<Container>> {
        let mut state = self.state.lock();
        state.enter(Operation::ListContainers, None)?;
        let matching: Vec<Container> = state
            .containers
            .values()
            .filter(|c| name.map_or(true, |n| c.meta.name == n))
            .map(|c| c.meta.clone())
            .collect();
        paginate(&matching, page_token, 100)
    }

    async fn create_thread(&self, container: &str, content: Vec<u8>) -> Result<Thread> {
        let content = trim(&content);
        let mut state = self.state.lock();
        state.enter(Operation::CreateThread, None)?;
        let id = state.next_id("t");
        let now = Utc::now();
        let stored = state.container(container)?;
        stored.meta.modified = now;
        let thread = StoredThread {
            id,
            content,
            modified: now,
            records: Vec::new(),
        };
        let snapshot = thread.snapshot();
        stored.threads.push(thread);
        Ok(snapshot)
    }

    async fn update_thread(&self, container: &str, thread: &str, content: Vec<u8>) -> Result<Thread> {
        let content = trim(&content);
        let mut state = self.state.lock();
        state.enter(Operation::UpdateThread, Some(thread))?;
        let stored = state.thread(container, thread)?;
        stored.content = content;
        stored.modified = Utc::now();
        Ok(stored.snapshot())
    }

    async fn list_threads(
        &self,
        container: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Thread>> {
        let mut state = self.state.lock();
        state.enter(Operation::ListThreads, None)?;
        let threads: Vec<Thread> = state
            .container(container)?
            .threads
            .iter()
            .map(StoredThread::snapshot)
            .collect();
        paginate(&threads, page_token, page_size)
    }

    async fn create_record(&self, container: &str, thread: &str, content: Vec<u8>) -> Result<Record> {
        let content = self.store_record(content)?;
        let mut state = self.state.lock();
        state.enter(Operation::CreateRecord, Some(thread))?;
        let id = state.next_id("r");
        let stored = state.thread(container, thread)?;
        let record = Record { id, content };
        stored.records.push(record.clone());
        stored.modified = Utc::now();
        Ok(record)
    }

    async fn get_record(&self, container: &str, thread: &str, record: &str) -> Result<Record> {
        let mut state = self.state.lock();
        state.enter(Operation::GetRecord, Some(thread))?;
        state
            .thread(container, thread)?
            .records
            .iter()
            .find(|r| r.id == record)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("record {}", record)))
    }

    async fn update_record(
        &self,
        container: &str,
        thread: &str,
        record: &str,
        content: Vec<u8>,
    ) -> Result<Record> {
        let content = self.store_record(content)?;
        let mut state = self.state.lock();
        state.enter(Operation::UpdateRecord, Some(thread))?;
        let stored = state.thread(container, thread)?;
        let target = stored
            .records
            .iter_mut()
            .find(|r| r.id == record)
            .ok_or_else(|| Error::NotFound(format!("record {}", record)))?;
        target.content = content;
        let updated = target.clone();
        stored.modified = Utc::now();
        Ok(updated)
    }

    async fn delete_record(&self, container: &str, thread: &str, record: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.enter(Operation::DeleteRecord, Some(thread))?;
        let stored = state.thread(container, thread)?;
        let before = stored.records.len();
        stored.records.retain(|r| r.id != record);
        if stored.records.len() == before {
            return Err(Error::NotFound(format!("record {}", record)));
        }
        stored.modified = Utc::now();
        Ok(())
    }

    async fn list_records(
        &self,
        container: &str,
        thread: &str,
        page_token: Option<&str>,
        page_size: usize,
    ) -> Result<Page<Record>> {
        let mut state = self.state.lock();
        state.enter(Operation::ListRecords, Some(thread))?;
        let records = state.thread(container, thread)?.records.clone();
        paginate(&records, page_token, page_size)
    }

    async fn list_permissions(&self, container: &str) -> Result<Vec<Permission>> {
        let mut state = self.state.lock();
        state.enter(Operation::ListPermissions, None)?;
        Ok(state.container(container)?.permissions.clone())
    }

    async fn create_permission(&self, container: &str, email: &str, role: Role) -> Result<Permission> {
        let mut state = self.state.lock();
        state.enter(Operation::CreatePermission, None)?;
        let id = state.next_id("p");
        let permission = Permission {
            id,
            email: email.to_string(),
            role,
        };
        state.container(container)?.permissions.push(permission.clone());
        Ok(permission)
    }
}
