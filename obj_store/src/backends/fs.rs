use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Url;

use super::start_after_key;
use crate::{
    backend::{Backend, Capabilities},
    error::{StoreError, StoreResult},
    types::{ListOptions, Object, ObjectMetadata, ObjectReader, ObjectWriter, RandomAccessReader},
};

const READ_CHUNK_SIZE: usize = 1024 * 1024;

/// Local filesystem backend. The object path is `join(authority, path)`,
/// so both `file:///abs/path` and relative `file://rel/path` locators work.
#[derive(Default)]
pub struct FsBackend;

impl FsBackend {
    pub fn new() -> Self {
        FsBackend
    }
}

fn local_path(url: &Url) -> StoreResult<PathBuf> {
    let host = url.host_str().unwrap_or("");
    let path = url.path();

    if host.is_empty() && path.is_empty() {
        return Err(StoreError::InvalidLocator {
            url: url.to_string(),
            reason: "path and host can't both be empty".to_string(),
        });
    }

    if host.is_empty() {
        Ok(PathBuf::from(path))
    } else {
        Ok(PathBuf::from(host).join(path.trim_start_matches('/')))
    }
}

fn not_found(err: std::io::Error) -> StoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StoreError::ObjectNotFound
    } else {
        err.into()
    }
}

fn metadata_of(meta: &std::fs::Metadata) -> ObjectMetadata {
    ObjectMetadata {
        size: meta.len(),
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
        etag: None,
    }
}

/// Walks up from the prefix to the nearest existing directory, so listing
/// a partial filename prefix still works.
fn walk_root(prefix: &Path) -> PathBuf {
    let mut dir = prefix.to_path_buf();
    loop {
        if dir.is_dir() {
            return dir;
        }
        if !dir.pop() {
            return PathBuf::from(".");
        }
    }
}

#[async_trait]
impl Backend for FsBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities { atomic_move: true }
    }

    async fn list_prefix(&self, url: &Url, opts: &ListOptions) -> StoreResult<Vec<Object>> {
        let prefix = std::path::absolute(local_path(url)?)?;
        let start_after = start_after_key(opts);

        tokio::task::spawn_blocking(move || {
            let root = walk_root(&prefix);
            let prefix_str = prefix.to_string_lossy().into_owned();
            let mut objects = Vec::new();

            for entry in walkdir::WalkDir::new(&root).sort_by_file_name() {
                let entry = entry.map_err(|e| {
                    StoreError::Io(std::io::Error::other(e.to_string()))
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }

                let path = entry.path().to_string_lossy().into_owned();
                if !path.starts_with(&prefix_str) {
                    continue;
                }
                if let Some(after) = &start_after {
                    if path.as_str() <= after.as_str() {
                        continue;
                    }
                }

                let meta = entry.metadata().map_err(|e| {
                    StoreError::Io(std::io::Error::other(e.to_string()))
                })?;
                let url = Url::from_file_path(entry.path()).map_err(|_| {
                    StoreError::InvalidLocator {
                        url: path.clone(),
                        reason: "not an absolute path".to_string(),
                    }
                })?;

                objects.push(Object {
                    url,
                    metadata: metadata_of(&meta),
                });
            }

            Ok(objects)
        })
        .await?
    }

    async fn read_metadata(&self, url: &Url) -> StoreResult<ObjectMetadata> {
        let meta = tokio::fs::metadata(local_path(url)?)
            .await
            .map_err(not_found)?;
        Ok(metadata_of(&meta))
    }

    async fn reader(&self, url: &Url) -> StoreResult<Box<dyn ObjectReader>> {
        let file = tokio::fs::File::open(local_path(url)?)
            .await
            .map_err(not_found)?;
        Ok(Box::new(FsReader { file }))
    }

    async fn reader_at(&self, url: &Url) -> StoreResult<Box<dyn RandomAccessReader>> {
        let file = std::fs::File::open(local_path(url)?).map_err(not_found)?;
        Ok(Box::new(FsReaderAt {
            file: std::sync::Arc::new(file),
        }))
    }

    async fn writer(&self, url: &Url) -> StoreResult<Box<dyn ObjectWriter>> {
        let path = local_path(url)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&path).await?;
        Ok(Box::new(FsWriter { file }))
    }

    async fn delete(&self, url: &Url) -> StoreResult<()> {
        tokio::fs::remove_file(local_path(url)?)
            .await
            .map_err(not_found)
    }

    async fn move_object(&self, src: &Url, dst: &Url) -> StoreResult<()> {
        let src_path = local_path(src)?;
        let dst_path = local_path(dst)?;
        if let Some(parent) = dst_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(tokio::fs::rename(&src_path, &dst_path).await?)
    }
}

struct FsReader {
    file: tokio::fs::File,
}

#[async_trait]
impl ObjectReader for FsReader {
    async fn next_chunk(&mut self) -> StoreResult<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
        let n = self.file.read_buf(&mut buf).await?;
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some(buf.freeze()))
        }
    }
}

struct FsReaderAt {
    file: std::sync::Arc<std::fs::File>,
}

#[async_trait]
impl RandomAccessReader for FsReaderAt {
    async fn read_at(&self, offset: u64, len: usize) -> StoreResult<Bytes> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || {
            use std::os::unix::fs::FileExt;

            let mut buf = vec![0u8; len];
            let mut read = 0;
            while read < len {
                let n = file.read_at(&mut buf[read..], offset + read as u64)?;
                if n == 0 {
                    break;
                }
                read += n;
            }
            buf.truncate(read);
            Ok(Bytes::from(buf))
        })
        .await?
    }
}

struct FsWriter {
    file: tokio::fs::File,
}

#[async_trait]
impl ObjectWriter for FsWriter {
    async fn write(&mut self, chunk: Bytes) -> StoreResult<()> {
        Ok(self.file.write_all(&chunk).await?)
    }

    async fn close(&mut self) -> StoreResult<()> {
        Ok(self.file.shutdown().await?)
    }
}
