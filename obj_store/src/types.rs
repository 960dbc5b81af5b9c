use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use url::Url;

use crate::error::StoreResult;

/// Metadata reported by a backend for one object. Never synthesized by the
/// dispatch layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMetadata {
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
}

/// A listed object: its locator plus the metadata the backend reported.
#[derive(Debug, Clone)]
pub struct Object {
    pub url: Url,
    pub metadata: ObjectMetadata,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Only objects whose full path sorts strictly after this value are
    /// returned.
    pub start_after: Option<String>,
}

impl ListOptions {
    pub fn start_after(s: impl Into<String>) -> Self {
        ListOptions {
            start_after: Some(s.into()),
        }
    }
}

/// Streaming read handle over one object.
///
/// `close` must be called to release backend resources; for chunked readers
/// it waits for all in-flight part downloads to stop and reports every
/// error encountered, not just the first.
#[async_trait]
pub trait ObjectReader: Send {
    /// Next chunk of the byte stream, `None` at end of object.
    async fn next_chunk(&mut self) -> StoreResult<Option<Bytes>>;

    async fn close(&mut self) -> StoreResult<()> {
        Ok(())
    }

    /// Drains the remainder of the stream into memory and closes the reader.
    async fn read_to_end(&mut self) -> StoreResult<Bytes>
    where
        Self: Sized,
    {
        let mut buf = BytesMut::new();
        loop {
            match self.next_chunk().await {
                Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(err) => {
                    let _ = self.close().await;
                    return Err(err);
                }
            }
        }
        self.close().await?;
        Ok(buf.freeze())
    }
}

impl std::fmt::Debug for dyn ObjectReader + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ObjectReader")
    }
}

/// Positional read handle over one object.
#[async_trait]
pub trait RandomAccessReader: Send + Sync {
    /// Reads exactly `len` bytes at `offset`, short only at end of object.
    async fn read_at(&self, offset: u64, len: usize) -> StoreResult<Bytes>;

    async fn close(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn RandomAccessReader + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn RandomAccessReader")
    }
}

/// Streaming write handle for one object.
///
/// Nothing is guaranteed durable until `close` returns: for multipart
/// backends, `close` is the commit point that finalizes the object.
#[async_trait]
pub trait ObjectWriter: Send {
    async fn write(&mut self, chunk: Bytes) -> StoreResult<()>;

    /// Flushes, commits and releases the handle, aggregating every shutdown
    /// error.
    async fn close(&mut self) -> StoreResult<()>;
}

impl std::fmt::Debug for dyn ObjectWriter + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn ObjectWriter")
    }
}
