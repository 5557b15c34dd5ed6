use super::{BufferedWriter, File, Filesystem};
use crate::error::Result;
use crate::index::FileOptions;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{info, instrument};

impl Filesystem {
    /// Stream `reader` into a new file named `name`. Returns the file and the
    /// number of bytes copied.
    ///
    /// Writes go through a [`BufferedWriter`], so every flush fills one record
    /// on each lane.
    #[instrument(skip(self, reader, options), fields(lanes = options.lanes))]
    pub async fn copy_from<R>(&self, reader: &mut R, name: &str, options: FileOptions) -> Result<(File, u64)>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let file = self.create_file(name, options).await?;
        let copied = copy_into(reader, &file).await?;
        info!(container = %file.id(), bytes = copied, "Copied into file");
        Ok((file, copied))
    }
}

async fn copy_into<R>(reader: &mut R, file: &File) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut writer = BufferedWriter::new(file);
    let mut chunk = vec![0u8; writer.capacity()];
    let mut copied = 0u64;
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        writer.write(&chunk[..n]).await?;
        copied += n as u64;
    }
    writer.flush().await?;
    Ok(copied)
}
