use super::File;
use crate::error::Result;

/// Write buffer sized to one full batch, so every flush writes one record
/// to each lane.
pub struct BufferedWriter<'a> {
    file: &'a File,
    buf: Vec<u8>,
    capacity: usize,
}

impl<'a> BufferedWriter<'a> {
    pub fn new(file: &'a File) -> Self {
        let capacity = file.lane_count() * file.backend.effective_record_size();
        Self::with_capacity(file, capacity)
    }

    pub fn with_capacity(file: &'a File, capacity: usize) -> Self {
        Self {
            file,
            buf: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes waiting for the next flush
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Buffer `data`, writing out every full batch. All of `data` is accepted
    /// unless a write fails.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.capacity {
            self.write_out(self.capacity).await?;
        }
        Ok(data.len())
    }

    /// Write out everything buffered.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            self.write_out(self.buf.len()).await?;
        }
        Ok(())
    }

    async fn write_out(&mut self, len: usize) -> Result<()> {
        match self.file.write(&self.buf[..len]).await {
            Ok(n) => {
                self.buf.drain(..n);
                Ok(())
            }
            Err(err) => {
                // committed bytes leave the buffer, the rest stays for a retry
                self.buf.drain(..err.completed());
                Err(err)
            }
        }
    }
}

impl Drop for BufferedWriter<'_> {
    fn drop(&mut self) {
        if !self.buf.is_empty() {
            tracing::warn!(bytes = self.buf.len(), "Buffered writer dropped with unflushed data");
        }
    }
}

impl std::fmt::Debug for BufferedWriter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedWriter")
            .field("capacity", &self.capacity)
            .field("buffered", &self.buf.len())
            .finish()
    }
}
