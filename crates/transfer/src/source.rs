//! Sequential chunk reader with one-chunk background prefetch.

use std::path::Path;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::TransferError;

type Prefetch<R> = JoinHandle<(R, std::io::Result<Bytes>)>;

/// Reads a file front to back in caller-chosen chunk sizes.
///
/// [`prefetch`](Self::prefetch) moves the reader into a background task
/// that reads the next chunk; the following [`next_chunk`](Self::next_chunk)
/// returns that chunk instead of reading again.
pub struct FileSource<R> {
    reader: Option<R>,
    pending: Option<Prefetch<R>>,
    /// Bytes read or being read by a prefetch.
    offset: u64,
    size: u64,
}

impl FileSource<tokio::fs::File> {
    /// Opens `path` and takes its current length as the transfer size.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok(Self::new(file, size))
    }
}

impl<R> FileSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(reader: R, size: u64) -> Self {
        Self {
            reader: Some(reader),
            pending: None,
            offset: 0,
            size,
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes not yet read or claimed by a prefetch.
    pub fn remaining(&self) -> u64 {
        self.size - self.offset
    }

    pub fn has_prefetched(&self) -> bool {
        self.pending.is_some()
    }

    /// Returns the next chunk of at most `max_len` bytes, or `None` at EOF.
    pub async fn next_chunk(&mut self, max_len: usize) -> Result<Option<Bytes>, TransferError> {
        if let Some(handle) = self.pending.take() {
            let (reader, result) = handle.await.map_err(std::io::Error::other)?;
            self.reader = Some(reader);
            return Ok(Some(result?));
        }

        let len = self.claim(max_len);
        if len == 0 {
            return Ok(None);
        }
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| std::io::Error::other("file source reader missing"))?;
        Ok(Some(read_chunk(reader, len).await?))
    }

    /// Starts reading the next chunk in the background if nothing is pending.
    pub fn prefetch(&mut self, max_len: usize) {
        if self.pending.is_some() || self.remaining() == 0 {
            return;
        }
        let Some(mut reader) = self.reader.take() else {
            return;
        };
        let len = self.claim(max_len);
        self.pending = Some(tokio::spawn(async move {
            let result = read_chunk(&mut reader, len).await;
            (reader, result)
        }));
    }

    fn claim(&mut self, max_len: usize) -> usize {
        let len = self.remaining().min(max_len as u64);
        self.offset += len;
        len as usize
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, len: usize) -> std::io::Result<Bytes> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}
