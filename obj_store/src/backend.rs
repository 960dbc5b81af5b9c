use async_trait::async_trait;
use url::Url;

use crate::{
    error::{StoreError, StoreResult},
    types::{ListOptions, Object, ObjectMetadata, ObjectReader, ObjectWriter, RandomAccessReader},
};

/// Capability set a backend declares once at registration. The dispatcher
/// consults it instead of probing backend types at call sites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// The backend can rename an object natively, without a streamed copy.
    pub atomic_move: bool,
}

/// Contract implemented by every storage backend.
///
/// Backends own all state needed to talk to one storage medium and must be
/// safe for concurrent use. `close` is called exactly once per instance at
/// store shutdown.
#[async_trait]
pub trait Backend: Send + Sync {
    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn list_prefix(&self, url: &Url, opts: &ListOptions) -> StoreResult<Vec<Object>>;

    async fn read_metadata(&self, url: &Url) -> StoreResult<ObjectMetadata>;

    async fn reader(&self, url: &Url) -> StoreResult<Box<dyn ObjectReader>>;

    async fn reader_at(&self, url: &Url) -> StoreResult<Box<dyn RandomAccessReader>>;

    async fn writer(&self, url: &Url) -> StoreResult<Box<dyn ObjectWriter>>;

    async fn delete(&self, url: &Url) -> StoreResult<()>;

    /// Native same-backend rename. Only invoked by the dispatcher when the
    /// backend declared `atomic_move`.
    async fn move_object(&self, _src: &Url, _dst: &Url) -> StoreResult<()> {
        Err(StoreError::Unsupported("move"))
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

impl std::fmt::Debug for dyn Backend + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn Backend")
    }
}
