//! Read pipeline
//!
//! Mirrors the write side: one segment per lane in lane-number order, the
//! first one shortened to what is left of the current lane's record. A batch
//! stops at the first lane that fails or returns less than its segment;
//! bytes that later lanes read past that point are pushed back so the
//! stream stays in stripe order.

use super::{Cursors, File};
use crate::error::{Error, Result};
use std::ops::Range;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

impl File {
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.read_ctx(&CancellationToken::new(), buf).await
    }

    /// Fill `buf` from the current read position. Returns fewer bytes only at
    /// the end of the file, and 0 once the end is reached.
    #[instrument(skip(self, cancel, buf), fields(container = %self.id(), len = buf.len()))]
    pub async fn read_ctx(&self, cancel: &CancellationToken, buf: &mut [u8]) -> Result<usize> {
        let mut cursors = self.cursors.lock().await;
        let mut filled = 0;
        while filled < buf.len() {
            let (n, err) = self.read_batch(&mut cursors, cancel, &mut buf[filled..]).await;
            filled += n;
            if let Some(err) = err {
                return Err(Error::Incomplete {
                    completed: filled,
                    source: Box::new(err),
                });
            }
            if n == 0 {
                break;
            }
        }
        Ok(filled)
    }

    async fn plan_read(&self, cursors: &mut Cursors, len: usize) -> Vec<(usize, Range<usize>)> {
        let effective = self.backend.effective_record_size();
        let cursor = self.lanes[cursors.reader.peek()].lock().await.read_cursor();

        let first = (effective - cursor).min(len);
        let mut plan = vec![(cursors.reader.get(), 0..first)];
        let mut offset = first;
        while offset < len && plan.len() < self.lanes.len() {
            let n = effective.min(len - offset);
            plan.push((cursors.reader.get(), offset..offset + n));
            offset += n;
        }
        plan
    }

    async fn read_batch(&self, cursors: &mut Cursors, cancel: &CancellationToken, buf: &mut [u8]) -> (usize, Option<Error>) {
        if buf.is_empty() {
            return (0, None);
        }
        if cancel.is_cancelled() {
            return (0, Some(Error::Cancelled));
        }

        let plan = self.plan_read(cursors, buf.len()).await;
        let handles: Vec<_> = plan
            .iter()
            .map(|(lane, range)| {
                let lane = Arc::clone(&self.lanes[*lane]);
                let cancel = cancel.clone();
                let mut segment = vec![0u8; range.len()];
                tokio::spawn(async move {
                    let n = lane.lock().await.read(&cancel, &mut segment).await?;
                    segment.truncate(n);
                    Ok::<_, Error>(segment)
                })
            })
            .collect();

        let mut total = 0;
        let mut stop = None;
        let mut error = None;
        for (i, handle) in handles.into_iter().enumerate() {
            let result = match handle.await {
                Ok(result) => result,
                Err(join) => Err(Error::Internal(format!("lane read task failed: {}", join))),
            };
            let (lane, range) = &plan[i];
            match result {
                Ok(data) if stop.is_some() => {
                    if !data.is_empty() {
                        self.lanes[*lane].lock().await.unread(data.len() as u64);
                    }
                }
                Ok(data) => {
                    buf[range.start..range.start + data.len()].copy_from_slice(&data);
                    total += data.len();
                    if data.len() < range.len() {
                        stop = Some(i);
                    }
                }
                Err(err) => {
                    if stop.is_none() {
                        stop = Some(i);
                        error = Some(err);
                    }
                }
            }
        }

        match stop {
            Some(i) => {
                cursors.reader.move_to(plan[i].0);
            }
            None => {
                // a lane left mid-record is read next
                if let Some((lane, _)) = plan.last() {
                    if self.lanes[*lane].lock().await.read_cursor() > 0 {
                        cursors.reader.move_to(*lane);
                    }
                }
            }
        }

        cursors.read_pos += total as u64;
        debug!(lanes = plan.len(), bytes = total, "Read batch");
        (total, error)
    }
}
