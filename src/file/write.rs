//! Write pipeline
//!
//! A batch hands every lane at most one segment:
//!
//! ```text
//! buf:    [ open tail | E bytes | E bytes | ... | rest ]
//! lanes:     peek()     get()     get()           get()
//! ```
//!
//! If lane `k` fails, lanes before `k` keep their writes and every later
//! lane that succeeded is rolled back, so the file stays a prefix of the
//! buffer. The writer ring is left on lane `k`.

use super::{Cursors, File};
use crate::error::{Error, Result};
use std::ops::Range;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

impl File {
    pub async fn write(&self, buf: &[u8]) -> Result<usize> {
        self.write_ctx(&CancellationToken::new(), buf).await
    }

    /// Write all of `buf`, batch after batch.
    ///
    /// On failure the error is `Incomplete`, carrying the bytes committed
    /// before it.
    #[instrument(skip(self, cancel, buf), fields(container = %self.id(), len = buf.len()))]
    pub async fn write_ctx(&self, cancel: &CancellationToken, buf: &[u8]) -> Result<usize> {
        let mut cursors = self.cursors.lock().await;
        let mut written = 0;
        while written < buf.len() {
            let (n, err) = self.write_batch(&mut cursors, cancel, &buf[written..]).await;
            written += n;
            if let Some(err) = err {
                return Err(Error::Incomplete {
                    completed: written,
                    source: Box::new(err),
                });
            }
            if n == 0 {
                return Err(Error::Incomplete {
                    completed: written,
                    source: Box::new(Error::Internal("write batch made no progress".to_string())),
                });
            }
        }
        Ok(written)
    }

    /// Split `buf` into per-lane segments following the writer ring.
    async fn plan_write(&self, cursors: &mut Cursors, len: usize) -> Vec<(usize, Range<usize>)> {
        let effective = self.backend.effective_record_size();
        let mut plan = Vec::new();
        let mut offset = 0;

        let open_tail = self.lanes[cursors.writer.peek()].lock().await.capacity();
        if open_tail > 0 {
            let n = open_tail.min(len);
            plan.push((cursors.writer.get(), 0..n));
            offset = n;
        }
        while offset < len && plan.len() < self.lanes.len() {
            let n = effective.min(len - offset);
            plan.push((cursors.writer.get(), offset..offset + n));
            offset += n;
        }
        plan
    }

    /// One fan-out over the lanes. Returns the bytes committed and the error
    /// that ended the batch, if any.
    async fn write_batch(&self, cursors: &mut Cursors, cancel: &CancellationToken, buf: &[u8]) -> (usize, Option<Error>) {
        if cancel.is_cancelled() {
            return (0, Some(Error::Cancelled));
        }

        let plan = self.plan_write(cursors, buf.len()).await;
        let handles: Vec<_> = plan
            .iter()
            .map(|(lane, range)| {
                let lane = Arc::clone(&self.lanes[*lane]);
                let segment = buf[range.clone()].to_vec();
                let cancel = cancel.clone();
                tokio::spawn(async move { lane.lock().await.write(&cancel, &segment).await })
            })
            .collect();

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(match handle.await {
                Ok(result) => result,
                Err(join) => Err(Error::Internal(format!("lane write task failed: {}", join))),
            });
        }

        let failed = match results.iter().position(Result::is_err) {
            Some(k) => k,
            None => {
                // resume an unfilled tail first next time
                for (lane, _) in plan.iter().rev() {
                    if self.lanes[*lane].lock().await.capacity() > 0 {
                        cursors.writer.move_to(*lane);
                        break;
                    }
                }
                let written: usize = results.into_iter().filter_map(Result::ok).sum();
                debug!(lanes = plan.len(), bytes = written, "Wrote batch");
                return (written, None);
            }
        };

        cursors.writer.move_to(plan[failed].0);
        let committed: usize = results[..failed].iter().filter_map(|r| r.as_ref().ok()).sum();

        let mut compromised = Vec::new();
        let mut error = None;
        for (i, result) in results.into_iter().enumerate().skip(failed) {
            match result {
                Ok(_) => compromised.push(plan[i].0),
                // a failed in-lane undo outranks the first error
                Err(err) if err.is_fatal() && !error.as_ref().map_or(false, Error::is_fatal) => error = Some(err),
                Err(err) if error.is_none() => error = Some(err),
                Err(_) => {}
            }
        }
        let error = error.unwrap_or_else(|| Error::Internal("failed lane reported no error".to_string()));

        warn!(
            lane = plan[failed].0,
            committed,
            rollbacks = compromised.len(),
            error = %error,
            "Lane write failed, rolling back later lanes"
        );

        match self.roll_back(&compromised).await {
            Ok(()) => (committed, Some(error)),
            Err(rollback) => {
                error!(error = %error, rollback = %rollback, "Rollback failed, file needs reconciliation");
                (
                    committed,
                    Some(Error::RollbackFailed {
                        source: Box::new(error),
                        rollback: Box::new(rollback),
                    }),
                )
            }
        }
    }

    /// Undo the last mutation of every lane in `lanes`, concurrently.
    async fn roll_back(&self, lanes: &[usize]) -> Result<()> {
        let handles: Vec<_> = lanes
            .iter()
            .map(|&lane| {
                let lane = Arc::clone(&self.lanes[lane]);
                tokio::spawn(async move { lane.lock().await.rollback().await })
            })
            .collect();

        let mut first_error = None;
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join) => Err(Error::Internal(format!("lane rollback task failed: {}", join))),
            };
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{test_config, test_fs};
    use super::super::Filesystem;
    use crate::error::Error;
    use crate::index::FileOptions;
    use crate::remote::{MemoryStore, Operation};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    // 10 payload bytes per record
    const RECORD: usize = 12;

    #[tokio::test]
    async fn test_single_write_stripes_across_lanes() {
        let (_store, fs) = test_fs(RECORD);
        let file = fs.create_file("f", FileOptions::with_lanes(3)).await.unwrap();

        let data: Vec<u8> = (0..65u8).collect();
        assert_eq!(file.write(&data).await.unwrap(), 65);

        let index = file.index().await;
        let lengths: Vec<u64> = index.lanes.iter().map(|l| l.header.length).collect();
        // stripes 0..7 over 3 lanes, the last one half full
        assert_eq!(lengths, vec![3, 2, 2]);
        assert_eq!(index.lanes[0].header.capacity, 5);
        assert_eq!(file.size().await, 65);
    }

    #[tokio::test]
    async fn test_small_writes_fill_open_tail_first() {
        let (store, fs) = test_fs(RECORD);
        let file = fs.create_file("f", FileOptions::with_lanes(2)).await.unwrap();

        for chunk in b"abcdefghijklmnopqrstuvwxy".chunks(3) {
            file.write(chunk).await.unwrap();
        }

        let index = file.index().await;
        let lane0: Vec<u8> = store
            .record_contents(&file.id(), &index.lanes[0].thread_id)
            .concat();
        let lane1: Vec<u8> = store
            .record_contents(&file.id(), &index.lanes[1].thread_id)
            .concat();
        assert_eq!(lane0, b"1abcdefghij1uvwxy".to_vec());
        assert_eq!(lane1, b"1klmnopqrst".to_vec());
    }

    #[tokio::test]
    async fn test_failure_keeps_prefix_and_rolls_back_rest() {
        let (store, fs) = test_fs(RECORD);
        let file = fs.create_file("f", FileOptions::with_lanes(4)).await.unwrap();
        let index = file.index().await;

        store.inject_fault(Operation::CreateRecord, Some(&index.lanes[2].thread_id), 1, 403);
        let err = file.write(&[7u8; 40]).await.unwrap_err();

        assert_eq!(err.completed(), 20);
        assert!(matches!(err.root(), Error::Remote { code: 403, .. }));
        assert!(!err.is_fatal());
        assert_eq!(file.size().await, 20);
        for lane in &index.lanes[2..] {
            assert!(store.record_contents(&file.id(), &lane.thread_id).is_empty());
        }

        // the next write resumes on lane 2
        assert_eq!(file.write(&[8u8; 20]).await.unwrap(), 20);
        let index = file.index().await;
        let lengths: Vec<u64> = index.lanes.iter().map(|l| l.header.length).collect();
        assert_eq!(lengths, vec![1, 1, 1, 1]);
    }

    #[tokio::test]
    async fn test_failed_rollback_is_reported_as_fatal() {
        let (store, fs) = test_fs(RECORD);
        let file = fs.create_file("f", FileOptions::with_lanes(4)).await.unwrap();
        let index = file.index().await;

        store.inject_fault(Operation::CreateRecord, Some(&index.lanes[1].thread_id), 1, 403);
        store.inject_fault(Operation::DeleteRecord, Some(&index.lanes[3].thread_id), 1, 403);
        let err = file.write(&[1u8; 40]).await.unwrap_err();

        assert_eq!(err.completed(), 10);
        assert!(err.is_fatal());
        match err.root() {
            Error::RollbackFailed { source, rollback } => {
                assert!(matches!(**source, Error::Remote { code: 403, .. }));
                assert!(matches!(**rollback, Error::Remote { code: 403, .. }));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_write_dispatches_nothing() {
        let (store, fs) = test_fs(RECORD);
        let file = fs.create_file("f", FileOptions::with_lanes(2)).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let before = store.mutation_count();
        let err = file.write_ctx(&cancel, b"data").await.unwrap_err();
        assert!(matches!(err.root(), Error::Cancelled));
        assert_eq!(err.completed(), 0);
        assert_eq!(store.mutation_count(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_mid_batch_keeps_prefix_and_rolls_back_rest() {
        let store = Arc::new(MemoryStore::with_max_record_size(RECORD));
        let mut config = test_config(RECORD);
        config.retry.initial_interval_ms = 5_000;
        config.retry.max_interval_ms = 10_000;
        config.retry.max_elapsed_ms = 60_000;
        let fs = Filesystem::with_store(store.clone(), config).unwrap();
        let file = fs.create_file("f", FileOptions::with_lanes(4)).await.unwrap();
        let index = file.index().await;

        // lane 2 is backing off when the token fires; lanes 0, 1 and 3 are done
        store.inject_fault(Operation::CreateRecord, Some(&index.lanes[2].thread_id), 1, 503);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = file.write_ctx(&cancel, &[5u8; 40]).await.unwrap_err();
        assert!(matches!(err.root(), Error::Cancelled));
        assert!(!err.is_fatal());
        assert_eq!(err.completed(), 20);
        assert_eq!(file.size().await, 20);

        let records: Vec<usize> = index
            .lanes
            .iter()
            .map(|lane| store.record_contents(&file.id(), &lane.thread_id).len())
            .collect();
        assert_eq!(records, vec![1, 1, 0, 0]);

        let reopened = fs.open_container(&file.id()).await.unwrap();
        assert_eq!(reopened.index().await, file.index().await);
        assert_eq!(
            reopened.authoritative_size(&CancellationToken::new()).await.unwrap(),
            20
        );
    }
}
