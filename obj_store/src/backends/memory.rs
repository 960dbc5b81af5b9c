use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use url::Url;

use crate::{
    backend::Backend,
    error::{StoreError, StoreResult},
    types::{ListOptions, Object, ObjectMetadata, ObjectReader, ObjectWriter, RandomAccessReader},
};

#[derive(Clone)]
struct Entry {
    data: Bytes,
    modified: DateTime<Utc>,
}

type ObjectMap = Arc<RwLock<HashMap<String, Entry>>>;

/// In-memory backend, mainly for tests and embedding. Objects are keyed by
/// `authority + path`; listing is not supported.
#[derive(Default)]
pub struct MemoryBackend {
    objects: ObjectMap,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn object_key(url: &Url) -> StoreResult<String> {
    let host = url.host_str().unwrap_or("");
    let path = url.path();
    if host.is_empty() && path.is_empty() {
        return Err(StoreError::InvalidLocator {
            url: url.to_string(),
            reason: "path and host can't both be empty".to_string(),
        });
    }
    Ok(format!("{host}{path}"))
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn list_prefix(&self, _url: &Url, _opts: &ListOptions) -> StoreResult<Vec<Object>> {
        Err(StoreError::Unsupported("list_prefix"))
    }

    async fn read_metadata(&self, url: &Url) -> StoreResult<ObjectMetadata> {
        let key = object_key(url)?;
        let objects = self.objects.read().unwrap();
        let entry = objects.get(&key).ok_or(StoreError::ObjectNotFound)?;
        Ok(ObjectMetadata {
            size: entry.data.len() as u64,
            modified: Some(entry.modified),
            etag: None,
        })
    }

    async fn reader(&self, url: &Url) -> StoreResult<Box<dyn ObjectReader>> {
        let key = object_key(url)?;
        let objects = self.objects.read().unwrap();
        let entry = objects.get(&key).ok_or(StoreError::ObjectNotFound)?;
        Ok(Box::new(BytesReader {
            data: Some(entry.data.clone()),
        }))
    }

    async fn reader_at(&self, url: &Url) -> StoreResult<Box<dyn RandomAccessReader>> {
        let key = object_key(url)?;
        let objects = self.objects.read().unwrap();
        let entry = objects.get(&key).ok_or(StoreError::ObjectNotFound)?;
        Ok(Box::new(BytesReaderAt {
            data: entry.data.clone(),
        }))
    }

    async fn writer(&self, url: &Url) -> StoreResult<Box<dyn ObjectWriter>> {
        Ok(Box::new(MemoryWriter {
            key: object_key(url)?,
            buf: BytesMut::new(),
            objects: self.objects.clone(),
        }))
    }

    async fn delete(&self, url: &Url) -> StoreResult<()> {
        let key = object_key(url)?;
        let mut objects = self.objects.write().unwrap();
        objects
            .remove(&key)
            .map(|_| ())
            .ok_or(StoreError::ObjectNotFound)
    }
}

/// Single-shot reader over an owned byte buffer. Shared with the
/// version-controlled-tree backend, which materializes blobs the same way.
pub(crate) struct BytesReader {
    pub(crate) data: Option<Bytes>,
}

#[async_trait]
impl ObjectReader for BytesReader {
    async fn next_chunk(&mut self) -> StoreResult<Option<Bytes>> {
        Ok(self.data.take().filter(|d| !d.is_empty()))
    }
}

struct BytesReaderAt {
    data: Bytes,
}

#[async_trait]
impl RandomAccessReader for BytesReaderAt {
    async fn read_at(&self, offset: u64, len: usize) -> StoreResult<Bytes> {
        let start = (offset as usize).min(self.data.len());
        let end = start.saturating_add(len).min(self.data.len());
        Ok(self.data.slice(start..end))
    }
}

struct MemoryWriter {
    key: String,
    buf: BytesMut,
    objects: ObjectMap,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    async fn write(&mut self, chunk: Bytes) -> StoreResult<()> {
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn close(&mut self) -> StoreResult<()> {
        let mut objects = self.objects.write().unwrap();
        objects.insert(
            self.key.clone(),
            Entry {
                data: self.buf.split().freeze(),
                modified: Utc::now(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn write_then_read_back() {
        let backend = MemoryBackend::new();
        let u = url("memory://cache/obj");

        let mut w = backend.writer(&u).await.unwrap();
        w.write(Bytes::from_static(b"abc")).await.unwrap();
        w.write(Bytes::from_static(b"def")).await.unwrap();

        // Not visible until close.
        assert!(backend.read_metadata(&u).await.unwrap_err().is_not_found());
        w.close().await.unwrap();

        assert_eq!(backend.read_metadata(&u).await.unwrap().size, 6);

        let mut r = backend.reader(&u).await.unwrap();
        assert_eq!(r.next_chunk().await.unwrap().unwrap(), &b"abcdef"[..]);
        assert!(r.next_chunk().await.unwrap().is_none());

        let ra = backend.reader_at(&u).await.unwrap();
        assert_eq!(&ra.read_at(1, 3).await.unwrap()[..], b"bcd");
        assert_eq!(&ra.read_at(4, 10).await.unwrap()[..], b"ef");

        backend.delete(&u).await.unwrap();
        assert!(backend.delete(&u).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn listing_is_unsupported() {
        let backend = MemoryBackend::new();
        let err = backend
            .list_prefix(&url("memory://cache/"), &ListOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_unsupported());
    }
}
