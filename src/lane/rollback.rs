//! Compensation protocol
//!
//! The store has no transactions, so a lane mutation is undone by hand.
//! Given the header before (`old`) and after (`new`) a mutation:
//!
//! - the tails differ: a record was created. Delete it, then persist `old`.
//! - the tails match: bytes were appended to the tail. Truncate the tail back
//!   to the length `old` describes, then persist `old`.
//!
//! The header is always written last. A crash between the content fix-up and
//! the header restore leaves a lane whose header disagrees with its records;
//! only an out-of-band scan of the lane can reconcile that.

use super::LaneHeader;
use crate::backend::Backend;
use crate::codec;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Return the lane at `thread` from state `new` to state `old`. Returns the
/// modification time of the restored header.
///
/// # Panics
///
/// Panics if `new` is not `old` plus at most one mutation.
pub async fn compensate(
    backend: &Backend,
    cancel: &CancellationToken,
    container: &str,
    thread: &str,
    old: &LaneHeader,
    new: &LaneHeader,
) -> Result<DateTime<Utc>> {
    assert!(
        new.length >= old.length && new.length - old.length <= 1,
        "lane headers must differ by at most one record (old {}, new {})",
        old.length,
        new.length
    );

    if old.tail != new.tail {
        if let Some(created) = new.tail.as_deref() {
            warn!(container, thread, record = created, "Deleting record created by failed batch");
            backend
                .retry(cancel, "delete_record", 1, |client| async move {
                    match client.delete_record(container, thread, created).await {
                        // already gone counts as undone
                        Err(Error::NotFound(_)) => Ok(()),
                        other => other,
                    }
                })
                .await?;
        }
    } else {
        assert!(
            old.capacity >= new.capacity,
            "append rollback with negative capacity difference (old {}, new {})",
            old.capacity,
            new.capacity
        );

        if let Some(tail) = old.tail.as_deref() {
            let keep = backend.effective_record_size() - old.capacity;
            warn!(container, thread, record = tail, keep, "Truncating tail appended by failed batch");

            let record = backend
                .retry(cancel, "get_record", 1, |client| async move {
                    client.get_record(container, thread, tail).await
                })
                .await?;
            let payload = codec::decode(&record.content)?;
            if payload.len() > keep {
                let content = codec::encode(&payload[..keep]);
                let content = &content;
                backend
                    .retry(cancel, "update_record", 1, |client| async move {
                        client.update_record(container, thread, tail, content.clone()).await
                    })
                    .await?;
            }
        }
    }

    let header = old.to_json()?;
    let header = &header;
    let restored = backend
        .retry(cancel, "update_thread", 1, |client| async move {
            client.update_thread(container, thread, header.clone()).await
        })
        .await?;
    Ok(restored.modified)
}
