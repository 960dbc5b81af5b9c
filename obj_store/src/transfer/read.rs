use std::{ops::Range, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::{path::Path, ObjectStore};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{TransferOptions, PART_CHANNEL_CAPACITY};
use crate::{
    error::{aggregate, StoreError, StoreResult},
    types::ObjectReader,
};

/// Ordered, concurrent ranged download of one remote object.
///
/// One metadata probe determines the total size; one download task per
/// part is then driven through a pool bounded by the configured
/// concurrency. Parts are delivered to the consumer strictly in part-index
/// order regardless of completion order. Any part failure cancels the
/// whole transfer; `close` waits for the pool to wind down and reports
/// every error it collected.
pub struct ChunkedReader {
    rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
    driver: Option<JoinHandle<Vec<StoreError>>>,
    done: bool,
}

impl ChunkedReader {
    pub async fn new(
        store: Arc<dyn ObjectStore>,
        location: Path,
        options: TransferOptions,
    ) -> StoreResult<Self> {
        let options = options.normalized();
        let size = store.head(&location).await?.size;
        let parts = split_parts(size, options.part_size);
        debug!(
            object = %location,
            size,
            parts = parts.len(),
            concurrency = options.concurrency,
            "starting chunked download"
        );

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(PART_CHANNEL_CAPACITY);
        let driver = tokio::spawn(drive_parts(
            store,
            location,
            parts,
            options.concurrency,
            tx,
            cancel.child_token(),
        ));

        Ok(ChunkedReader {
            rx,
            cancel,
            driver: Some(driver),
            done: false,
        })
    }

    async fn drain_driver(&mut self) -> Vec<StoreError> {
        match self.driver.take() {
            Some(handle) => match handle.await {
                Ok(errors) => errors,
                Err(err) => vec![err.into()],
            },
            None => vec![],
        }
    }
}

#[async_trait]
impl ObjectReader for ChunkedReader {
    async fn next_chunk(&mut self) -> StoreResult<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }

        match self.rx.recv().await {
            Some(chunk) => Ok(Some(chunk)),
            None => {
                self.done = true;
                aggregate(self.drain_driver().await)?;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> StoreResult<()> {
        self.cancel.cancel();
        self.rx.close();
        let errors = self.drain_driver().await;
        self.done = true;
        aggregate(errors)
    }
}

impl Drop for ChunkedReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Partitions `[0, size)` into contiguous `part_size` ranges, the last one
/// possibly shorter.
fn split_parts(size: u64, part_size: u64) -> Vec<Range<u64>> {
    let mut parts = Vec::with_capacity(size.div_ceil(part_size) as usize);
    let mut start = 0;
    while start < size {
        parts.push(start..(start + part_size).min(size));
        start += part_size;
    }
    parts
}

/// Sequencer: consumes part downloads in submission order and forwards
/// them through the bounded ordered channel. `buffered` keeps at most
/// `concurrency` downloads in flight while preserving FIFO part order.
async fn drive_parts(
    store: Arc<dyn ObjectStore>,
    location: Path,
    parts: Vec<Range<u64>>,
    concurrency: usize,
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
) -> Vec<StoreError> {
    let mut downloads = futures::stream::iter(parts.into_iter().enumerate().map(
        |(index, range)| {
            let store = store.clone();
            let location = location.clone();
            async move { fetch_part(store, location, index, range).await }
        },
    ))
    .buffered(concurrency);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return vec![],
            next = downloads.next() => match next {
                None => return vec![],
                Some(Ok(part)) => {
                    // Send fails only when the consumer went away; the
                    // remaining parts are abandoned.
                    if tx.send(part).await.is_err() {
                        return vec![];
                    }
                }
                Some(Err(err)) => {
                    cancel.cancel();
                    return vec![err];
                }
            }
        }
    }
}

async fn fetch_part(
    store: Arc<dyn ObjectStore>,
    location: Path,
    index: usize,
    range: Range<u64>,
) -> StoreResult<Bytes> {
    let expected = range.end - range.start;
    let bytes = store
        .get_range(&location, range)
        .await
        .map_err(|err| StoreError::TransferPart {
            part: index,
            source: Box::new(err.into()),
        })?;

    // The range is already clamped to the object size, so anything other
    // than an exact-length response is a truncated transfer.
    if bytes.len() as u64 != expected {
        return Err(StoreError::IntegrityMismatch {
            part: index,
            expected,
            actual: bytes.len() as u64,
        });
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use object_store::{
        memory::InMemory,
        GetOptions,
        GetRange,
        GetResult,
        ListResult,
        MultipartUpload,
        ObjectMeta,
        PutMultipartOptions,
        PutOptions,
        PutPayload,
        PutResult,
    };

    use super::*;

    async fn seed(store: &dyn ObjectStore, location: &Path, data: &[u8]) {
        store
            .put(location, PutPayload::from(data.to_vec()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn round_trip_is_exact_for_any_geometry() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

        for (part_size, concurrency) in [(7_000, 4), (100_000, 2), (250_000, 8), (1, 3)] {
            let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
            let location = Path::from("data/blob.bin");
            let data = if part_size == 1 {
                data[..64].to_vec()
            } else {
                data.clone()
            };
            seed(store.as_ref(), &location, &data).await;

            let mut reader = ChunkedReader::new(
                store,
                location,
                TransferOptions {
                    part_size,
                    concurrency,
                    max_parts: 0,
                },
            )
            .await
            .unwrap();

            let read = reader.read_to_end().await.unwrap();
            assert_eq!(&read[..], &data[..], "part_size={part_size}");
        }
    }

    #[tokio::test]
    async fn missing_object_fails_the_probe() {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let res = ChunkedReader::new(
            store,
            Path::from("nope"),
            TransferOptions::default(),
        )
        .await;
        assert!(matches!(res, Err(StoreError::ObjectNotFound)));
    }

    #[tokio::test]
    async fn split_parts_partitions_exactly() {
        assert_eq!(split_parts(10, 4), vec![0..4, 4..8, 8..10]);
        assert_eq!(split_parts(8, 4), vec![0..4, 4..8]);
        assert_eq!(split_parts(3, 4), vec![0..3]);
        assert!(split_parts(0, 4).is_empty());
    }

    /// Delegates to an in-memory store but stalls earlier parts longer
    /// than later ones, forcing workers to complete out of order.
    #[derive(Debug)]
    struct ReorderingStore {
        inner: InMemory,
        part_size: u64,
    }

    impl fmt::Display for ReorderingStore {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "ReorderingStore({})", self.inner)
        }
    }

    #[async_trait]
    impl ObjectStore for ReorderingStore {
        async fn put_opts(
            &self,
            location: &Path,
            payload: PutPayload,
            opts: PutOptions,
        ) -> object_store::Result<PutResult> {
            self.inner.put_opts(location, payload, opts).await
        }

        async fn put_multipart_opts(
            &self,
            location: &Path,
            opts: PutMultipartOptions,
        ) -> object_store::Result<Box<dyn MultipartUpload>> {
            self.inner.put_multipart_opts(location, opts).await
        }

        async fn get_opts(
            &self,
            location: &Path,
            options: GetOptions,
        ) -> object_store::Result<GetResult> {
            if let Some(GetRange::Bounded(range)) = &options.range {
                let index = range.start / self.part_size;
                let delay = 40u64.saturating_sub(index * 10);
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
            self.inner.get_opts(location, options).await
        }

        async fn delete(&self, location: &Path) -> object_store::Result<()> {
            self.inner.delete(location).await
        }

        fn list(
            &self,
            prefix: Option<&Path>,
        ) -> futures::stream::BoxStream<'static, object_store::Result<ObjectMeta>> {
            self.inner.list(prefix)
        }

        async fn list_with_delimiter(
            &self,
            prefix: Option<&Path>,
        ) -> object_store::Result<ListResult> {
            self.inner.list_with_delimiter(prefix).await
        }

        async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy(from, to).await
        }

        async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy_if_not_exists(from, to).await
        }
    }

    #[tokio::test]
    async fn parts_are_delivered_in_index_order_despite_reordering() {
        let part_size = 1_000u64;
        let inner = InMemory::new();
        let location = Path::from("stamped.bin");

        // Each part is filled with its own index so delivery order is
        // visible in the output bytes.
        let mut data = Vec::new();
        for index in 0..5u8 {
            data.extend(std::iter::repeat_n(index, part_size as usize));
        }
        seed(&inner, &location, &data).await;

        let store: Arc<dyn ObjectStore> = Arc::new(ReorderingStore { inner, part_size });
        let mut reader = ChunkedReader::new(
            store,
            location,
            TransferOptions {
                part_size,
                concurrency: 5,
                max_parts: 0,
            },
        )
        .await
        .unwrap();

        let mut last_stamp = 0u8;
        while let Some(chunk) = reader.next_chunk().await.unwrap() {
            for b in &chunk {
                assert!(*b >= last_stamp, "part delivered out of order");
                last_stamp = *b;
            }
        }
        reader.close().await.unwrap();
        assert_eq!(last_stamp, 4);
    }

    /// Shrinks every bounded range before delegating, so each part comes
    /// back one byte short of what the engine asked for.
    #[derive(Debug)]
    struct TruncatingStore {
        inner: InMemory,
    }

    impl fmt::Display for TruncatingStore {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "TruncatingStore({})", self.inner)
        }
    }

    #[async_trait]
    impl ObjectStore for TruncatingStore {
        async fn put_opts(
            &self,
            location: &Path,
            payload: PutPayload,
            opts: PutOptions,
        ) -> object_store::Result<PutResult> {
            self.inner.put_opts(location, payload, opts).await
        }

        async fn put_multipart_opts(
            &self,
            location: &Path,
            opts: PutMultipartOptions,
        ) -> object_store::Result<Box<dyn MultipartUpload>> {
            self.inner.put_multipart_opts(location, opts).await
        }

        async fn get_opts(
            &self,
            location: &Path,
            mut options: GetOptions,
        ) -> object_store::Result<GetResult> {
            if let Some(GetRange::Bounded(range)) = &options.range {
                options.range = Some(GetRange::Bounded(range.start..range.end - 1));
            }
            self.inner.get_opts(location, options).await
        }

        async fn delete(&self, location: &Path) -> object_store::Result<()> {
            self.inner.delete(location).await
        }

        fn list(
            &self,
            prefix: Option<&Path>,
        ) -> futures::stream::BoxStream<'static, object_store::Result<ObjectMeta>> {
            self.inner.list(prefix)
        }

        async fn list_with_delimiter(
            &self,
            prefix: Option<&Path>,
        ) -> object_store::Result<ListResult> {
            self.inner.list_with_delimiter(prefix).await
        }

        async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy(from, to).await
        }

        async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.inner.copy_if_not_exists(from, to).await
        }
    }

    #[tokio::test]
    async fn short_parts_fail_the_transfer() {
        let inner = InMemory::new();
        let location = Path::from("short.bin");
        seed(&inner, &location, &vec![7u8; 4_096]).await;

        let store: Arc<dyn ObjectStore> = Arc::new(TruncatingStore { inner });
        let mut reader = ChunkedReader::new(
            store,
            location,
            TransferOptions {
                part_size: 1_024,
                concurrency: 2,
                max_parts: 0,
            },
        )
        .await
        .unwrap();

        let err = reader.read_to_end().await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::IntegrityMismatch { .. } | StoreError::TransferPart { .. }
        ));
    }
}
