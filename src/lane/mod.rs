//! Lanes
//!
//! A lane is one parallel stripe of a file: a thread whose records hold the
//! stripe's bytes in order, and whose own content is the [`LaneHeader`].
//!
//! # Write state machine
//!
//! ```text
//!   capacity == 0  (full tail)  --put-->     new record, capacity = E - n
//!   capacity  > 0  (open tail)  --update-->  append to tail, capacity -= n
//! ```
//!
//! Every successful mutation keeps the previous header in `old_state`, which
//! is what [`Lane::rollback`] restores.
//!
//! # Read state
//!
//! Reads are sequential. The lane keeps one page of decoded records in
//! memory plus a position (`record`, `cursor`) and serves each read from the
//! current record only.

mod header;
pub mod rollback;

pub use header::LaneHeader;

use crate::backend::Backend;
use crate::codec;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct CachedRecord {
    id: String,
    payload: Vec<u8>,
}

/// One listed page of records
#[derive(Debug, Clone)]
struct RecordPage {
    /// Lane-wide index of the first record on the page
    start: u64,
    /// Token this page was listed with
    token: Option<String>,
    records: Vec<CachedRecord>,
    next: Option<String>,
}

impl RecordPage {
    fn holds(&self, record: u64) -> bool {
        record >= self.start && record < self.end()
    }

    fn end(&self) -> u64 {
        self.start + self.records.len() as u64
    }
}

enum PageAction {
    Ready,
    Fetch { start: u64, token: Option<String> },
    Missing,
}

pub struct Lane {
    container: String,
    thread: String,
    header: LaneHeader,
    old_state: Option<LaneHeader>,
    modified: DateTime<Utc>,
    backend: Arc<Backend>,

    record: u64,
    cursor: usize,
    page: Option<RecordPage>,
}

impl std::fmt::Debug for Lane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lane")
            .field("thread", &self.thread)
            .field("header", &self.header)
            .field("record", &self.record)
            .field("cursor", &self.cursor)
            .finish()
    }
}

impl Lane {
    pub fn new(
        container: impl Into<String>,
        thread: impl Into<String>,
        header: LaneHeader,
        modified: DateTime<Utc>,
        backend: Arc<Backend>,
    ) -> Self {
        Self {
            container: container.into(),
            thread: thread.into(),
            header,
            old_state: None,
            modified,
            backend,
            record: 0,
            cursor: 0,
            page: None,
        }
    }

    pub fn header(&self) -> &LaneHeader {
        &self.header
    }

    pub fn number(&self) -> usize {
        self.header.number
    }

    pub fn thread_id(&self) -> &str {
        &self.thread
    }

    pub fn capacity(&self) -> usize {
        self.header.capacity
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    /// Header before the last successful mutation
    pub fn old_state(&self) -> Option<&LaneHeader> {
        self.old_state.as_ref()
    }

    /// Payload bytes in the lane according to its header
    pub fn size(&self) -> u64 {
        self.header.size(self.backend.effective_record_size())
    }

    /// Read position from the start of the lane
    pub fn position(&self) -> u64 {
        self.record * self.backend.effective_record_size() as u64 + self.cursor as u64
    }

    /// Offset of the read position within the current record
    pub fn read_cursor(&self) -> usize {
        self.cursor
    }

    /// Store `payload` in the lane: appended to an open tail, otherwise as a
    /// new record holding at most one record's worth of it.
    pub async fn write(&mut self, cancel: &CancellationToken, payload: &[u8]) -> Result<usize> {
        if self.header.has_open_tail() {
            self.update(cancel, payload).await
        } else {
            self.put(cancel, payload).await
        }
    }

    /// Create a new record from the first `min(E, len)` bytes of `payload`.
    ///
    /// Only valid while the tail is full.
    pub async fn put(&mut self, cancel: &CancellationToken, payload: &[u8]) -> Result<usize> {
        if self.header.has_open_tail() {
            return Err(Error::InvalidArgument(format!(
                "put on lane {} with {} bytes of tail capacity",
                self.header.number, self.header.capacity
            )));
        }
        if payload.is_empty() {
            return Err(Error::InvalidArgument("put of an empty payload".to_string()));
        }

        let effective = self.backend.effective_record_size();
        let n = payload.len().min(effective);
        let content = codec::encode(&payload[..n]);

        let mut next = self.header.clone();
        next.length += 1;
        next.capacity = effective - n;

        let (container, thread) = (self.container.as_str(), self.thread.as_str());
        let (content, next) = (&content, &next);
        let (header, modified) = self
            .backend
            .retry(cancel, "put", 3, |client| async move {
                let record = client.create_record(container, thread, content.clone()).await?;
                let mut header = next.clone();
                header.tail = Some(record.id.clone());

                let persisted = match header.to_json() {
                    Ok(json) => client.update_thread(container, thread, json).await,
                    Err(err) => Err(err),
                };
                match persisted {
                    Ok(updated) => Ok((header, updated.modified)),
                    Err(err) => {
                        warn!(container, thread, record = %record.id, error = %err, "Header update failed, deleting new record");
                        match client.delete_record(container, thread, &record.id).await {
                            Ok(()) | Err(Error::NotFound(_)) => Err(err),
                            Err(undo) => Err(Error::RollbackFailed {
                                source: Box::new(err),
                                rollback: Box::new(undo),
                            }),
                        }
                    }
                }
            })
            .await?;

        debug!(lane = header.number, length = header.length, capacity = header.capacity, bytes = n, "Created record");
        self.commit(header, modified);
        Ok(n)
    }

    /// Append all of `payload` to the open tail record.
    ///
    /// Fails with `InsufficientCapacity`, before any remote call, when the
    /// tail is full or cannot take the whole payload.
    pub async fn update(&mut self, cancel: &CancellationToken, payload: &[u8]) -> Result<usize> {
        let capacity = self.header.capacity;
        if capacity == 0 || payload.len() > capacity {
            return Err(Error::InsufficientCapacity {
                requested: payload.len(),
                available: capacity,
            });
        }
        if payload.is_empty() {
            return Ok(0);
        }

        let tail = self.header.tail.clone().ok_or_else(|| {
            Error::MalformedHeader(format!("lane {} has capacity but no tail record", self.header.number))
        })?;
        let expected = self.backend.effective_record_size() - capacity;

        let mut next = self.header.clone();
        next.capacity = capacity - payload.len();
        let json = next.to_json()?;

        let (container, thread, tail) = (self.container.as_str(), self.thread.as_str(), tail.as_str());
        let json = &json;
        let modified = self
            .backend
            .retry(cancel, "update", 4, |client| async move {
                let record = client.get_record(container, thread, tail).await?;
                let current = codec::decode(&record.content)?;
                if current.len() != expected {
                    return Err(Error::MalformedRecord(format!(
                        "tail {} holds {} bytes, header expects {}",
                        tail,
                        current.len(),
                        expected
                    )));
                }

                let mut combined = Vec::with_capacity(current.len() + payload.len());
                combined.extend_from_slice(current);
                combined.extend_from_slice(payload);
                client
                    .update_record(container, thread, tail, codec::encode(&combined))
                    .await?;

                match client.update_thread(container, thread, json.clone()).await {
                    Ok(updated) => Ok(updated.modified),
                    Err(err) => {
                        warn!(container, thread, record = tail, error = %err, "Header update failed, restoring tail");
                        match client
                            .update_record(container, thread, tail, record.content.clone())
                            .await
                        {
                            Ok(_) => Err(err),
                            Err(undo) => Err(Error::RollbackFailed {
                                source: Box::new(err),
                                rollback: Box::new(undo),
                            }),
                        }
                    }
                }
            })
            .await?;

        debug!(lane = next.number, capacity = next.capacity, bytes = payload.len(), "Appended to tail");
        self.commit(next, modified);
        Ok(payload.len())
    }

    fn commit(&mut self, header: LaneHeader, modified: DateTime<Utc>) {
        self.old_state = Some(std::mem::replace(&mut self.header, header));
        self.modified = modified;
    }

    /// Undo the last successful mutation.
    ///
    /// Runs under its own token, so it still completes when the batch that
    /// triggered it was cancelled.
    pub async fn rollback(&mut self) -> Result<()> {
        let old = match &self.old_state {
            Some(old) => old.clone(),
            None => return Err(Error::NoRollback),
        };

        let cancel = CancellationToken::new();
        let modified =
            rollback::compensate(&self.backend, &cancel, &self.container, &self.thread, &old, &self.header).await?;

        debug!(lane = old.number, length = old.length, capacity = old.capacity, "Rolled back lane");
        self.header = old;
        self.modified = modified;
        self.old_state = None;
        self.page = None;
        Ok(())
    }

    /// Copy bytes from the current record into `buf`. Returns 0 at the end of
    /// the lane.
    pub async fn read(&mut self, cancel: &CancellationToken, buf: &mut [u8]) -> Result<usize> {
        let effective = self.backend.effective_record_size();
        let size = self.size();
        if buf.is_empty() || self.position() >= size {
            return Ok(0);
        }

        self.load_page(cancel).await?;
        if self.cursor >= self.current()?.payload.len() {
            // cached before the tail was appended to
            self.refresh_current(cancel).await?;
        }

        let in_record = (size - self.record * effective as u64).min(effective as u64) as usize;
        let cursor = self.cursor;
        let payload = &self.current()?.payload;
        let end = payload.len().min(in_record);
        if cursor >= end {
            return Err(Error::MalformedRecord(format!(
                "record {} of lane {} holds {} bytes, expected {}",
                self.record,
                self.header.number,
                payload.len(),
                in_record
            )));
        }

        let n = buf.len().min(end - cursor);
        buf[..n].copy_from_slice(&payload[cursor..cursor + n]);

        self.cursor += n;
        if self.cursor == effective {
            self.cursor = 0;
            self.record += 1;
        }
        Ok(n)
    }

    /// Move the read position back by `n` bytes, without remote calls.
    pub fn unread(&mut self, n: u64) {
        let effective = self.backend.effective_record_size() as u64;
        let pos = self.position().saturating_sub(n);
        self.record = pos / effective;
        self.cursor = (pos % effective) as usize;
    }

    /// Place the read position at `offset` from the start of the lane,
    /// clamped to the lane size. Returns the position reached.
    pub async fn seek_to(&mut self, cancel: &CancellationToken, offset: u64) -> Result<u64> {
        let effective = self.backend.effective_record_size() as u64;
        let offset = offset.min(self.size());
        self.record = offset / effective;
        self.cursor = (offset % effective) as usize;
        if offset < self.size() {
            self.load_page(cancel).await?;
        }
        Ok(offset)
    }

    /// Drop the local read state and list the first page again.
    pub async fn reset(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.record = 0;
        self.cursor = 0;
        self.page = None;
        self.page = Some(self.fetch_page(cancel, 0, None).await?);
        Ok(())
    }

    fn current(&self) -> Result<&CachedRecord> {
        self.page
            .as_ref()
            .filter(|page| page.holds(self.record))
            .map(|page| &page.records[(self.record - page.start) as usize])
            .ok_or_else(|| Error::Internal(format!("record {} not cached", self.record)))
    }

    /// Make sure the cached page holds the current record.
    async fn load_page(&mut self, cancel: &CancellationToken) -> Result<()> {
        let mut refreshed = false;
        loop {
            let action = match &self.page {
                Some(page) if page.holds(self.record) => PageAction::Ready,
                Some(page) if self.record >= page.start => match &page.next {
                    Some(token) => PageAction::Fetch {
                        start: page.end(),
                        token: Some(token.clone()),
                    },
                    // last page, listed before later records were created
                    None if !refreshed => {
                        refreshed = true;
                        PageAction::Fetch {
                            start: page.start,
                            token: page.token.clone(),
                        }
                    }
                    None => PageAction::Missing,
                },
                _ => PageAction::Fetch { start: 0, token: None },
            };

            match action {
                PageAction::Ready => return Ok(()),
                PageAction::Fetch { start, token } => {
                    self.page = Some(self.fetch_page(cancel, start, token).await?);
                }
                PageAction::Missing => {
                    return Err(Error::NotFound(format!(
                        "record {} of lane {}",
                        self.record, self.header.number
                    )))
                }
            }
        }
    }

    async fn fetch_page(&self, cancel: &CancellationToken, start: u64, token: Option<String>) -> Result<RecordPage> {
        let (container, thread) = (self.container.as_str(), self.thread.as_str());
        let page_size = self.backend.page_size();
        let page_token = token.as_deref();
        let page = self
            .backend
            .retry(cancel, "list_records", 1, |client| async move {
                client.list_records(container, thread, page_token, page_size).await
            })
            .await?;

        let records = page
            .items
            .into_iter()
            .map(|record| {
                Ok(CachedRecord {
                    payload: codec::decode(&record.content)?.to_vec(),
                    id: record.id,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(lane = self.header.number, start, records = records.len(), "Fetched record page");

        Ok(RecordPage {
            start,
            token,
            records,
            next: page.next_page,
        })
    }

    async fn refresh_current(&mut self, cancel: &CancellationToken) -> Result<()> {
        let id = self.current()?.id.clone();
        let (container, thread, record_id) = (self.container.as_str(), self.thread.as_str(), id.as_str());
        let record = self
            .backend
            .retry(cancel, "get_record", 1, |client| async move {
                client.get_record(container, thread, record_id).await
            })
            .await?;
        let payload = codec::decode(&record.content)?.to_vec();

        if let Some(page) = self.page.as_mut() {
            let index = (self.record - page.start) as usize;
            page.records[index].payload = payload;
        }
        Ok(())
    }
}

/// Sum of decoded record lengths in a lane, listed straight from the store.
pub async fn record_bytes(backend: &Backend, cancel: &CancellationToken, container: &str, thread: &str) -> Result<u64> {
    let page_size = backend.page_size();
    let mut total = 0u64;
    let mut token: Option<String> = None;
    loop {
        let page_token = token.as_deref();
        let page = backend
            .retry(cancel, "list_records", 1, |client| async move {
                client.list_records(container, thread, page_token, page_size).await
            })
            .await?;
        for record in &page.items {
            total += codec::decode(&record.content)?.len() as u64;
        }
        match page.next_page {
            Some(next) => token = Some(next),
            None => return Ok(total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsConfig;
    use crate::pool::ClientPool;
    use crate::remote::{MemoryStore, Operation, RemoteStore};

    const RECORD: usize = 12; // 10 payload bytes per record

    struct Fixture {
        store: Arc<MemoryStore>,
        backend: Arc<Backend>,
        container: String,
    }

    impl Fixture {
        async fn new() -> Self {
            let mut config = FsConfig::default();
            config.max_record_size = RECORD;
            config.page_size = 2;
            config.limits.per_credential_rate = 1e6;
            config.limits.total_rate = 1e6;
            config.retry.initial_interval_ms = 1;
            config.retry.max_interval_ms = 2;
            config.retry.max_elapsed_ms = 50;

            let store = Arc::new(MemoryStore::with_max_record_size(RECORD));
            let backend = Arc::new(Backend::new(
                ClientPool::single(store.clone(), &config.limits),
                &config,
            ));
            let container = store.create_container("lane-test").await.unwrap().id;
            Self {
                store,
                backend,
                container,
            }
        }

        async fn lane(&self) -> Lane {
            let header = LaneHeader::new(0);
            let thread = self
                .store
                .create_thread(&self.container, header.to_json().unwrap())
                .await
                .unwrap();
            Lane::new(&self.container, thread.id, header, thread.modified, self.backend.clone())
        }

        fn payloads(&self, lane: &Lane) -> Vec<Vec<u8>> {
            self.store
                .record_contents(&self.container, lane.thread_id())
                .iter()
                .map(|c| codec::decode(c).unwrap().to_vec())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_put_then_update_fills_tail() {
        let fx = Fixture::new().await;
        let mut lane = fx.lane().await;
        let cancel = CancellationToken::new();

        assert_eq!(lane.write(&cancel, b"abc").await.unwrap(), 3);
        assert_eq!(lane.header().length, 1);
        assert_eq!(lane.capacity(), 7);

        assert_eq!(lane.write(&cancel, b"defg").await.unwrap(), 4);
        assert_eq!(lane.capacity(), 3);
        assert_eq!(lane.size(), 7);
        assert_eq!(fx.payloads(&lane), vec![b"abcdefg".to_vec()]);

        // persisted header matches the local one
        let threads = fx.store.list_threads(&fx.container, None, 10).await.unwrap();
        let persisted = LaneHeader::from_json(&threads.items[0].content).unwrap();
        assert_eq!(&persisted, lane.header());
    }

    #[tokio::test]
    async fn test_put_takes_at_most_one_record() {
        let fx = Fixture::new().await;
        let mut lane = fx.lane().await;
        let cancel = CancellationToken::new();

        assert_eq!(lane.put(&cancel, b"0123456789abcdef").await.unwrap(), 10);
        assert_eq!(lane.capacity(), 0);
        assert!(matches!(
            lane.put(&cancel, b"").await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_update_over_capacity_makes_no_calls() {
        let fx = Fixture::new().await;
        let mut lane = fx.lane().await;
        let cancel = CancellationToken::new();

        assert!(matches!(
            lane.update(&cancel, b"x").await,
            Err(Error::InsufficientCapacity { available: 0, .. })
        ));

        lane.put(&cancel, b"12345678").await.unwrap();
        let before = fx.store.mutation_count();
        let gets = fx.store.call_count(Operation::GetRecord);

        assert!(matches!(
            lane.update(&cancel, b"abc").await,
            Err(Error::InsufficientCapacity {
                requested: 3,
                available: 2
            })
        ));
        assert_eq!(fx.store.mutation_count(), before);
        assert_eq!(fx.store.call_count(Operation::GetRecord), gets);
    }

    #[tokio::test]
    async fn test_rollback_restores_prior_records() {
        let fx = Fixture::new().await;
        let mut lane = fx.lane().await;
        let cancel = CancellationToken::new();

        assert!(matches!(lane.rollback().await, Err(Error::NoRollback)));

        lane.write(&cancel, b"abcd").await.unwrap();
        let after_first = lane.header().clone();
        lane.write(&cancel, b"ef").await.unwrap();
        lane.rollback().await.unwrap();
        assert_eq!(lane.header(), &after_first);
        assert_eq!(fx.payloads(&lane), vec![b"abcd".to_vec()]);

        // old state is consumed
        assert!(matches!(lane.rollback().await, Err(Error::NoRollback)));

        lane.write(&cancel, b"efghij").await.unwrap();
        lane.write(&cancel, b"klm").await.unwrap();
        assert_eq!(lane.header().length, 2);
        lane.rollback().await.unwrap();
        assert_eq!(fx.payloads(&lane), vec![b"abcdefghij".to_vec()]);
        assert_eq!(lane.header().length, 1);
        assert_eq!(lane.capacity(), 0);
    }

    #[tokio::test]
    async fn test_failed_header_update_deletes_new_record() {
        let fx = Fixture::new().await;
        let mut lane = fx.lane().await;
        let cancel = CancellationToken::new();

        fx.store
            .inject_fault(Operation::UpdateThread, Some(lane.thread_id()), 1, 403);
        assert!(matches!(
            lane.put(&cancel, b"abc").await,
            Err(Error::Remote { code: 403, .. })
        ));
        assert!(fx.payloads(&lane).is_empty());
        assert_eq!(lane.header().length, 0);
        assert!(lane.old_state().is_none());
    }

    #[tokio::test]
    async fn test_failed_header_update_restores_tail() {
        let fx = Fixture::new().await;
        let mut lane = fx.lane().await;
        let cancel = CancellationToken::new();
        lane.put(&cancel, b"abc").await.unwrap();

        fx.store
            .inject_fault(Operation::UpdateThread, Some(lane.thread_id()), 1, 403);
        assert!(matches!(
            lane.update(&cancel, b"de").await,
            Err(Error::Remote { code: 403, .. })
        ));
        assert_eq!(fx.payloads(&lane), vec![b"abc".to_vec()]);
        assert_eq!(lane.capacity(), 7);
    }

    #[tokio::test]
    async fn test_failed_undo_is_fatal() {
        let fx = Fixture::new().await;
        let mut lane = fx.lane().await;
        let cancel = CancellationToken::new();

        fx.store
            .inject_fault(Operation::UpdateThread, Some(lane.thread_id()), 1, 403);
        fx.store
            .inject_fault(Operation::DeleteRecord, Some(lane.thread_id()), 1, 403);
        let err = lane.put(&cancel, b"xyz").await.unwrap_err();
        assert!(err.is_fatal());
        // the orphan stays behind
        assert_eq!(fx.payloads(&lane), vec![b"xyz".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutations_take_tokens_for_their_undo() {
        let mut config = FsConfig::default();
        config.max_record_size = RECORD;
        config.limits.per_credential_rate = 1e6;
        config.limits.total_rate = 0.001;
        config.limits.total_burst = 10;

        let store = Arc::new(MemoryStore::with_max_record_size(RECORD));
        let backend = Arc::new(Backend::new(
            ClientPool::single(store.clone(), &config.limits),
            &config,
        ));
        let container = store.create_container("tokens").await.unwrap().id;
        let header = LaneHeader::new(0);
        let thread = store
            .create_thread(&container, header.to_json().unwrap())
            .await
            .unwrap();
        let mut lane = Lane::new(&container, thread.id, header, thread.modified, backend.clone());
        let cancel = CancellationToken::new();

        // create, header update, delete on failure
        lane.put(&cancel, b"abc").await.unwrap();
        assert!((backend.pool().global_available() - 7.0).abs() < 1e-6);

        // get, update, header update, restore on failure
        lane.update(&cancel, b"de").await.unwrap();
        assert!((backend.pool().global_available() - 3.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_sequential_read_across_pages() {
        let fx = Fixture::new().await;
        let mut lane = fx.lane().await;
        let cancel = CancellationToken::new();

        let data: Vec<u8> = (0..45u8).collect();
        let mut written = 0;
        while written < data.len() {
            written += lane.write(&cancel, &data[written..]).await.unwrap();
        }
        assert_eq!(lane.header().length, 5);
        assert_eq!(lane.size(), 45);

        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = lane.read(&cancel, &mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_read_sees_appends_after_caching() {
        let fx = Fixture::new().await;
        let mut lane = fx.lane().await;
        let cancel = CancellationToken::new();

        lane.write(&cancel, b"abc").await.unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(lane.read(&cancel, &mut buf).await.unwrap(), 3);
        assert_eq!(lane.read(&cancel, &mut buf).await.unwrap(), 0);

        lane.write(&cancel, b"defgh").await.unwrap();
        lane.write(&cancel, b"ij").await.unwrap();
        lane.write(&cancel, b"klm").await.unwrap();
        let n = lane.read(&cancel, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"defghij");
        let n = lane.read(&cancel, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"klm");
    }

    #[tokio::test]
    async fn test_seek_and_unread() {
        let fx = Fixture::new().await;
        let mut lane = fx.lane().await;
        let cancel = CancellationToken::new();

        let data: Vec<u8> = (0..30u8).collect();
        for chunk in data.chunks(10) {
            lane.write(&cancel, chunk).await.unwrap();
        }

        assert_eq!(lane.seek_to(&cancel, 25).await.unwrap(), 25);
        let mut buf = [0u8; 10];
        let n = lane.read(&cancel, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], &data[25..30]);

        lane.unread(7);
        assert_eq!(lane.position(), 23);
        let n = lane.read(&cancel, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], &data[23..30]);

        assert_eq!(lane.seek_to(&cancel, 100).await.unwrap(), 30);
        assert_eq!(lane.read(&cancel, &mut buf).await.unwrap(), 0);

        lane.reset(&cancel).await.unwrap();
        let n = lane.read(&cancel, &mut buf).await.unwrap();
        assert_eq!(&buf[..n], &data[..10]);
    }

    #[tokio::test]
    async fn test_record_bytes_matches_header() {
        let fx = Fixture::new().await;
        let mut lane = fx.lane().await;
        let cancel = CancellationToken::new();

        let mut remaining: &[u8] = b" leading and trailing whitespace \n";
        while !remaining.is_empty() {
            let n = lane.write(&cancel, remaining).await.unwrap();
            remaining = &remaining[n..];
        }

        let bytes = record_bytes(&fx.backend, &cancel, &fx.container, lane.thread_id())
            .await
            .unwrap();
        assert_eq!(bytes, lane.size());
    }
}
