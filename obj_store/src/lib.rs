pub mod assoc;
pub mod backend;
pub mod backends;
pub mod config;
pub mod error;
pub mod session;
pub mod transfer;
pub mod types;
pub mod url_util;

use std::{collections::HashMap, sync::Arc};

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};
use url::Url;

pub use crate::{
    backend::{Backend, Capabilities},
    config::StoreConfig,
    error::{StoreError, StoreResult},
    types::{ListOptions, Object, ObjectMetadata, ObjectReader, ObjectWriter, RandomAccessReader},
};

/// Scheme-dispatched object store.
///
/// Every operation takes a URL locator, resolves its scheme against the
/// registered backends, and delegates. Cross-backend operations (copy,
/// move) are composed here from the per-backend primitives.
pub struct ObjectStore {
    copy_buffer_size: usize,
    default_scheme: String,
    backends: HashMap<String, Arc<dyn Backend>>,
}

impl ObjectStore {
    pub fn new(config: StoreConfig) -> StoreResult<Self> {
        let mut store = ObjectStore {
            copy_buffer_size: config.copy_buffer_size,
            default_scheme: config.default_scheme.to_lowercase(),
            backends: HashMap::new(),
        };

        store.register("file", Arc::new(backends::fs::FsBackend::new()));

        let memory = Arc::new(backends::memory::MemoryBackend::new());
        store.register("memory", memory.clone());
        store.register("mem", memory);

        let http = Arc::new(backends::http::HttpBackend::new()?);
        store.register("http", http.clone());
        store.register("https", http);

        store.register("s3", Arc::new(backends::s3::S3Backend::new(config.s3)));
        store.register("sftp", Arc::new(backends::sftp::SftpBackend::new()));
        store.register(
            "redis",
            Arc::new(backends::redis::RedisBackend::new(config.redis)),
        );

        let git = Arc::new(backends::git::GitBackend::new(config.git));
        store.register("git+https", git.clone());
        store.register("git+ssh", git);

        if !store.backends.contains_key(&store.default_scheme) {
            return Err(StoreError::BackendNotConfigured(
                store.default_scheme.clone(),
            ));
        }

        Ok(store)
    }

    fn register(&mut self, scheme: &str, backend: Arc<dyn Backend>) {
        self.backends.insert(scheme.to_lowercase(), backend);
    }

    /// Register (or replace) the backend serving `scheme`. Schemes are
    /// case-insensitive.
    pub fn with_backend(mut self, scheme: &str, backend: Arc<dyn Backend>) -> Self {
        self.register(scheme, backend);
        self
    }

    /// Parse a locator string, applying the default scheme to bare paths.
    pub fn parse_url(&self, s: &str) -> StoreResult<Url> {
        match Url::parse(s) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                Ok(Url::parse(&format!("{}://{}", self.default_scheme, s))?)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn resolve(&self, url: &Url) -> StoreResult<&Arc<dyn Backend>> {
        let scheme = url.scheme().to_lowercase();
        self.backends
            .get(&scheme)
            .ok_or(StoreError::NoBackendForScheme(scheme))
    }

    /// List objects under `prefix`. Every returned object URL carries the
    /// scheme the caller used, even where the backend reports another
    /// (e.g. a listing through an aliased scheme).
    pub async fn list_prefix(&self, prefix: &Url, opts: &ListOptions) -> StoreResult<Vec<Object>> {
        let backend = self.resolve(prefix)?;
        let mut objects = backend.list_prefix(prefix, opts).await?;

        for object in &mut objects {
            if object.url.scheme() != prefix.scheme() {
                object.url = url_util::with_scheme(&object.url, prefix.scheme())?;
            }
        }

        Ok(objects)
    }

    pub async fn read_metadata(&self, url: &Url) -> StoreResult<ObjectMetadata> {
        self.resolve(url)?.read_metadata(url).await
    }

    pub async fn reader(&self, url: &Url) -> StoreResult<Box<dyn ObjectReader>> {
        self.resolve(url)?.reader(url).await
    }

    pub async fn reader_at(&self, url: &Url) -> StoreResult<Box<dyn RandomAccessReader>> {
        self.resolve(url)?.reader_at(url).await
    }

    pub async fn writer(&self, url: &Url) -> StoreResult<Box<dyn ObjectWriter>> {
        self.resolve(url)?.writer(url).await
    }

    pub async fn delete(&self, url: &Url) -> StoreResult<()> {
        self.resolve(url)?.delete(url).await
    }

    /// Stream `src` into `dst`. The destination is only committed when the
    /// whole source has been pumped; any failure drops the destination
    /// writer without closing it, discarding the partial upload.
    pub async fn copy(&self, src: &Url, dst: &Url) -> StoreResult<()> {
        let mut reader = self.resolve(src)?.reader(src).await?;

        let writer = match self.resolve(dst) {
            Ok(backend) => backend.writer(dst).await,
            Err(err) => Err(err),
        };
        let mut writer = match writer {
            Ok(writer) => writer,
            Err(err) => {
                if let Err(close_err) = reader.close().await {
                    warn!(src = %src, error = %close_err, "closing source reader failed");
                }
                return Err(err);
            }
        };

        match self.pump(reader.as_mut(), writer.as_mut()).await {
            Ok(()) => {
                if let Err(close_err) = reader.close().await {
                    warn!(src = %src, error = %close_err, "closing source reader failed");
                }
                writer.close().await
            }
            Err(err) => {
                if let Err(close_err) = reader.close().await {
                    warn!(src = %src, error = %close_err, "closing source reader failed");
                }
                drop(writer);
                Err(err)
            }
        }
    }

    async fn pump(
        &self,
        reader: &mut dyn ObjectReader,
        writer: &mut dyn ObjectWriter,
    ) -> StoreResult<()> {
        while let Some(chunk) = reader.next_chunk().await? {
            // Backends may hand out chunks of any size; re-slice so the
            // writer never sees more than the configured buffer at once.
            let mut chunk = chunk;
            while chunk.len() > self.copy_buffer_size {
                writer.write(chunk.split_to(self.copy_buffer_size)).await?;
            }
            if !chunk.is_empty() {
                writer.write(chunk).await?;
            }
        }
        Ok(())
    }

    /// Move `src` to `dst`. Uses the backend's native rename when both
    /// locators resolve to the same backend instance and it declares
    /// atomic moves; otherwise falls back to copy-then-delete. The
    /// fallback is not transactional: if the final delete fails the
    /// source copy remains.
    pub async fn move_object(&self, src: &Url, dst: &Url) -> StoreResult<()> {
        let src_backend = self.resolve(src)?;
        let dst_backend = self.resolve(dst)?;

        if Arc::ptr_eq(src_backend, dst_backend) && src_backend.capabilities().atomic_move {
            debug!(src = %src, dst = %dst, "native move");
            return src_backend.move_object(src, dst).await;
        }

        debug!(src = %src, dst = %dst, "move via copy and delete");
        self.copy(src, dst).await?;
        self.resolve(src)?.delete(src).await
    }

    /// Release every registered backend exactly once, even where several
    /// schemes alias the same instance. All close errors are surfaced.
    pub async fn close(&self) -> StoreResult<()> {
        let mut seen = std::collections::HashSet::new();
        let mut errors = Vec::new();

        for backend in self.backends.values() {
            if !seen.insert(Arc::as_ptr(backend) as *const () as usize) {
                continue;
            }
            if let Err(err) = backend.close().await {
                errors.push(err);
            }
        }

        error::aggregate(errors)
    }

    /// Convenience: read an entire object into memory.
    pub async fn read_to_bytes(&self, url: &Url) -> StoreResult<Bytes> {
        let mut reader = self.reader(url).await?;
        let mut buf = BytesMut::new();
        let result = async {
            while let Some(chunk) = reader.next_chunk().await? {
                buf.extend_from_slice(&chunk);
            }
            Ok(())
        }
        .await;
        let close_result = reader.close().await;
        result.and(close_result)?;
        Ok(buf.freeze())
    }

    /// Convenience: write a whole in-memory buffer as one object.
    pub async fn write_bytes(&self, url: &Url, data: Bytes) -> StoreResult<()> {
        let mut writer = self.writer(url).await?;
        let mut data = data;
        while data.len() > self.copy_buffer_size {
            writer.write(data.split_to(self.copy_buffer_size)).await?;
        }
        if !data.is_empty() {
            writer.write(data).await?;
        }
        writer.close().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::backends::memory::MemoryBackend;

    fn store() -> ObjectStore {
        ObjectStore::new(StoreConfig::default()).unwrap()
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn bare_paths_take_the_default_scheme() {
        let store = store();
        let parsed = store.parse_url("/var/data/report.csv").unwrap();
        assert_eq!(parsed.scheme(), "file");
        assert_eq!(parsed.path(), "/var/data/report.csv");

        let parsed = store.parse_url("s3://bucket/key").unwrap();
        assert_eq!(parsed.scheme(), "s3");
    }

    #[test]
    fn unknown_scheme_is_reported() {
        let store = store();
        let err = store.resolve(&url("ftp://host/x")).unwrap_err();
        assert!(matches!(err, StoreError::NoBackendForScheme(s) if s == "ftp"));
    }

    #[test]
    fn scheme_lookup_is_case_insensitive() {
        let store = store();
        assert!(store.resolve(&url("MEM://bucket/x")).is_ok());
    }

    #[test]
    fn every_stock_scheme_resolves() {
        let store = store();
        for scheme in [
            "file", "memory", "mem", "http", "https", "s3", "sftp", "redis", "git+https",
            "git+ssh",
        ] {
            assert!(
                store.resolve(&url(&format!("{scheme}://h/x"))).is_ok(),
                "{scheme} must be registered"
            );
        }
    }

    #[test]
    fn missing_default_scheme_fails_construction() {
        let config = StoreConfig {
            default_scheme: "tape".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ObjectStore::new(config),
            Err(StoreError::BackendNotConfigured(s)) if s == "tape"
        ));
    }

    #[tokio::test]
    async fn copy_streams_between_backends() {
        let store = store();
        let src = url("mem://t/src.bin");
        let dst = url("memory://t/dst.bin");

        store
            .write_bytes(&src, Bytes::from(vec![7u8; 3_000_000]))
            .await
            .unwrap();
        store.copy(&src, &dst).await.unwrap();

        let data = store.read_to_bytes(&dst).await.unwrap();
        assert_eq!(data.len(), 3_000_000);
        assert!(data.iter().all(|&b| b == 7));
    }

    /// Backend double that panics if the dispatcher falls back to the
    /// streamed path instead of the native rename.
    struct RenameOnly {
        inner: MemoryBackend,
        renames: AtomicUsize,
    }

    #[async_trait]
    impl Backend for RenameOnly {
        fn capabilities(&self) -> Capabilities {
            Capabilities { atomic_move: true }
        }

        async fn list_prefix(&self, url: &Url, opts: &ListOptions) -> StoreResult<Vec<Object>> {
            self.inner.list_prefix(url, opts).await
        }

        async fn read_metadata(&self, url: &Url) -> StoreResult<ObjectMetadata> {
            self.inner.read_metadata(url).await
        }

        async fn reader(&self, _url: &Url) -> StoreResult<Box<dyn ObjectReader>> {
            panic!("native move must not open a reader");
        }

        async fn reader_at(&self, url: &Url) -> StoreResult<Box<dyn RandomAccessReader>> {
            self.inner.reader_at(url).await
        }

        async fn writer(&self, _url: &Url) -> StoreResult<Box<dyn ObjectWriter>> {
            panic!("native move must not open a writer");
        }

        async fn delete(&self, _url: &Url) -> StoreResult<()> {
            panic!("native move must not delete");
        }

        async fn move_object(&self, _src: &Url, _dst: &Url) -> StoreResult<()> {
            self.renames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn same_backend_move_uses_native_rename() {
        let backend = Arc::new(RenameOnly {
            inner: MemoryBackend::new(),
            renames: AtomicUsize::new(0),
        });
        let store = store().with_backend("vault", backend.clone());

        store
            .move_object(&url("vault://t/a"), &url("vault://t/b"))
            .await
            .unwrap();
        assert_eq!(backend.renames.load(Ordering::SeqCst), 1);
    }

    /// Backend double whose deletes always fail, to observe the
    /// non-transactional fallback.
    struct UndeletableMemory {
        inner: MemoryBackend,
    }

    #[async_trait]
    impl Backend for UndeletableMemory {
        async fn list_prefix(&self, url: &Url, opts: &ListOptions) -> StoreResult<Vec<Object>> {
            self.inner.list_prefix(url, opts).await
        }

        async fn read_metadata(&self, url: &Url) -> StoreResult<ObjectMetadata> {
            self.inner.read_metadata(url).await
        }

        async fn reader(&self, url: &Url) -> StoreResult<Box<dyn ObjectReader>> {
            self.inner.reader(url).await
        }

        async fn reader_at(&self, url: &Url) -> StoreResult<Box<dyn RandomAccessReader>> {
            self.inner.reader_at(url).await
        }

        async fn writer(&self, url: &Url) -> StoreResult<Box<dyn ObjectWriter>> {
            self.inner.writer(url).await
        }

        async fn delete(&self, _url: &Url) -> StoreResult<()> {
            Err(StoreError::Unsupported("delete"))
        }
    }

    #[tokio::test]
    async fn cross_backend_move_copies_then_deletes() {
        let store = store().with_backend(
            "frozen",
            Arc::new(UndeletableMemory {
                inner: MemoryBackend::new(),
            }),
        );
        let src = url("frozen://t/src");
        let dst = url("mem://t/dst");

        {
            let mut writer = store.writer(&src).await.unwrap();
            writer.write(Bytes::from_static(b"payload")).await.unwrap();
            writer.close().await.unwrap();
        }

        // The copy lands, the source delete fails, and the destination
        // must still be intact.
        let err = store.move_object(&src, &dst).await.unwrap_err();
        assert!(err.is_unsupported());
        assert_eq!(&store.read_to_bytes(&dst).await.unwrap()[..], b"payload");
        assert_eq!(&store.read_to_bytes(&src).await.unwrap()[..], b"payload");
    }

    struct FailingClose {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Backend for FailingClose {
        async fn list_prefix(&self, _url: &Url, _opts: &ListOptions) -> StoreResult<Vec<Object>> {
            Err(StoreError::Unsupported("list"))
        }

        async fn read_metadata(&self, _url: &Url) -> StoreResult<ObjectMetadata> {
            Err(StoreError::Unsupported("stat"))
        }

        async fn reader(&self, _url: &Url) -> StoreResult<Box<dyn ObjectReader>> {
            Err(StoreError::Unsupported("reader"))
        }

        async fn reader_at(&self, _url: &Url) -> StoreResult<Box<dyn RandomAccessReader>> {
            Err(StoreError::Unsupported("reader_at"))
        }

        async fn writer(&self, _url: &Url) -> StoreResult<Box<dyn ObjectWriter>> {
            Err(StoreError::Unsupported("writer"))
        }

        async fn delete(&self, _url: &Url) -> StoreResult<()> {
            Err(StoreError::Unsupported("delete"))
        }

        async fn close(&self) -> StoreResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unsupported("close"))
        }
    }

    #[tokio::test]
    async fn close_visits_aliased_backends_once_and_aggregates_errors() {
        let closes_a = Arc::new(AtomicUsize::new(0));
        let closes_b = Arc::new(AtomicUsize::new(0));

        let aliased = Arc::new(FailingClose {
            closes: closes_a.clone(),
        });
        let store = store()
            .with_backend("xa", aliased.clone())
            .with_backend("xb", aliased)
            .with_backend(
                "xc",
                Arc::new(FailingClose {
                    closes: closes_b.clone(),
                }),
            );

        let err = store.close().await.unwrap_err();
        assert!(matches!(err, StoreError::Aggregate(ref errs) if errs.len() == 2));
        assert_eq!(closes_a.load(Ordering::SeqCst), 1);
        assert_eq!(closes_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listing_keeps_the_caller_scheme() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("one.txt"), b"1").unwrap();

        // Files registered under a second scheme: the fs backend reports
        // file:// URLs, but callers see the scheme they asked with.
        let store = store().with_backend("local", Arc::new(backends::fs::FsBackend::new()));
        let prefix = Url::parse(&format!("local://{}/", dir.path().display())).unwrap();

        let objects = store
            .list_prefix(&prefix, &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].url.scheme(), "local");
        assert!(objects[0].url.path().ends_with("one.txt"));
    }
}
