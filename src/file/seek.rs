//! Seeking
//!
//! An offset is spread over the lanes the way writes stripe it: whole
//! records round robin in lane-number order, with the remainder landing on
//! the lane the offset falls into. Seeking never touches remote state.

use super::{Cursors, File};
use crate::error::{Error, Result};
use std::io::SeekFrom;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

impl File {
    pub async fn seek(&self, pos: SeekFrom) -> Result<u64> {
        self.seek_ctx(&CancellationToken::new(), pos).await
    }

    /// Move the read position. `SeekFrom::End` is not supported; offsets past
    /// the end stop at the end.
    #[instrument(skip(self, cancel), fields(container = %self.id()))]
    pub async fn seek_ctx(&self, cancel: &CancellationToken, pos: SeekFrom) -> Result<u64> {
        let mut cursors = self.cursors.lock().await;
        match pos {
            SeekFrom::Start(offset) => {
                self.reset_lanes(cancel).await?;
                cursors.reader.reset();
                cursors.read_pos = 0;
                self.seek_to_offset(&mut cursors, cancel, offset).await
            }
            SeekFrom::Current(delta) => {
                let target = i128::from(cursors.read_pos) + i128::from(delta);
                if target < 0 {
                    return Err(Error::InvalidArgument(format!(
                        "seek to {} before start of file",
                        target
                    )));
                }
                let target = u64::try_from(target).unwrap_or(u64::MAX);
                self.seek_to_offset(&mut cursors, cancel, target).await
            }
            SeekFrom::End(_) => Err(Error::Unsupported("seeking relative to the end".to_string())),
        }
    }

    /// Drop every lane's read state and list its first page again.
    async fn reset_lanes(&self, cancel: &CancellationToken) -> Result<()> {
        let handles: Vec<_> = self
            .lanes
            .iter()
            .map(|lane| {
                let lane = Arc::clone(lane);
                let cancel = cancel.clone();
                tokio::spawn(async move { lane.lock().await.reset(&cancel).await })
            })
            .collect();

        let mut first_error = None;
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join) => Err(Error::Internal(format!("lane reset task failed: {}", join))),
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

    async fn seek_to_offset(&self, cursors: &mut Cursors, cancel: &CancellationToken, offset: u64) -> Result<u64> {
        let effective = self.backend.effective_record_size() as u64;
        let lanes = self.lanes.len() as u64;
        let offset = offset.min(self.size().await);

        let stripes = offset / effective;
        let current = (stripes % lanes) as usize;

        let mut reached = 0;
        for (i, lane) in self.lanes.iter().enumerate() {
            let mut target = (stripes / lanes + u64::from((i as u64) < stripes % lanes)) * effective;
            if i == current {
                target += offset % effective;
            }
            match lane.lock().await.seek_to(cancel, target).await {
                Ok(pos) => reached += pos,
                Err(err) => {
                    cursors.read_pos = reached;
                    return Err(Error::Incomplete {
                        completed: reached as usize,
                        source: Box::new(err),
                    });
                }
            }
        }

        cursors.reader.move_to(current);
        cursors.read_pos = reached;
        debug!(offset, reached, lane = current, "Seeked");
        Ok(reached)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::test_fs;
    use crate::error::Error;
    use crate::index::FileOptions;
    use std::io::SeekFrom;

    const RECORD: usize = 12;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[tokio::test]
    async fn test_seek_start_then_read() {
        let (_store, fs) = test_fs(RECORD);
        let file = fs.create_file("f", FileOptions::with_lanes(3)).await.unwrap();
        let data = pattern(83);
        file.write(&data).await.unwrap();

        for offset in [0u64, 5, 10, 29, 30, 47, 82] {
            assert_eq!(file.seek(SeekFrom::Start(offset)).await.unwrap(), offset);
            let mut out = vec![0u8; 83];
            let n = file.read(&mut out).await.unwrap();
            assert_eq!(&out[..n], &data[offset as usize..], "offset {}", offset);
        }
    }

    #[tokio::test]
    async fn test_seek_current_moves_relative() {
        let (_store, fs) = test_fs(RECORD);
        let file = fs.create_file("f", FileOptions::with_lanes(2)).await.unwrap();
        let data = pattern(50);
        file.write(&data).await.unwrap();

        let mut buf = [0u8; 4];
        file.read(&mut buf).await.unwrap();
        assert_eq!(file.seek(SeekFrom::Current(20)).await.unwrap(), 24);
        let n = file.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &data[24..28]);

        assert_eq!(file.seek(SeekFrom::Current(-10)).await.unwrap(), 18);
        let n = file.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &data[18..22]);

        assert!(matches!(
            file.seek(SeekFrom::Current(-100)).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_seek_clamps_and_rejects_end() {
        let (_store, fs) = test_fs(RECORD);
        let file = fs.create_file("f", FileOptions::with_lanes(2)).await.unwrap();
        file.write(&pattern(15)).await.unwrap();

        assert_eq!(file.seek(SeekFrom::Start(1000)).await.unwrap(), 15);
        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut buf).await.unwrap(), 0);

        assert!(matches!(
            file.seek(SeekFrom::End(0)).await,
            Err(Error::Unsupported(_))
        ));
    }
}
