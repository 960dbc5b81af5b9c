use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use object_store::MultipartUpload;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::TransferOptions;
use crate::{
    error::{aggregate, StoreError, StoreResult},
    types::ObjectWriter,
};

/// Streaming multipart upload of one remote object.
///
/// Writes flow through a bounded pipe to a background uploader that slices
/// them into fixed-size parts and keeps at most `concurrency` part uploads
/// in flight. Nothing is visible remotely until `close`, which signals
/// end-of-data, waits for the uploader to finalize the multipart object
/// and reports every error encountered. Dropping the writer without
/// closing aborts the upload.
pub struct ChunkedWriter {
    tx: Option<mpsc::Sender<Bytes>>,
    cancel: CancellationToken,
    uploader: Option<JoinHandle<Vec<StoreError>>>,
}

impl ChunkedWriter {
    pub fn new(upload: Box<dyn MultipartUpload>, options: TransferOptions) -> Self {
        let options = options.normalized();
        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let uploader = tokio::spawn(run_uploader(upload, rx, options, cancel.child_token()));

        ChunkedWriter {
            tx: Some(tx),
            cancel,
            uploader: Some(uploader),
        }
    }

    async fn join_uploader(&mut self) -> StoreResult<()> {
        match self.uploader.take() {
            Some(handle) => match handle.await {
                Ok(errors) => aggregate(errors),
                Err(err) => Err(err.into()),
            },
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectWriter for ChunkedWriter {
    async fn write(&mut self, chunk: Bytes) -> StoreResult<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "write after close",
            )));
        };

        if tx.send(chunk).await.is_err() {
            // The uploader stopped early; its errors explain why.
            self.tx = None;
            self.join_uploader().await?;
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "uploader terminated",
            )));
        }

        Ok(())
    }

    async fn close(&mut self) -> StoreResult<()> {
        // Dropping the sender is the end-of-data signal.
        self.tx = None;
        self.join_uploader().await
    }
}

impl Drop for ChunkedWriter {
    fn drop(&mut self) {
        if self.uploader.is_some() {
            self.cancel.cancel();
        }
    }
}

async fn run_uploader(
    upload: Box<dyn MultipartUpload>,
    rx: mpsc::Receiver<Bytes>,
    options: TransferOptions,
    cancel: CancellationToken,
) -> Vec<StoreError> {
    let mut uploader = Uploader {
        upload,
        in_flight: FuturesUnordered::new(),
        pending: BytesMut::new(),
        started: 0,
        options,
    };

    match uploader.drive(rx, cancel).await {
        Ok(()) => match uploader.upload.complete().await {
            Ok(_) => vec![],
            Err(err) => vec![err.into()],
        },
        Err(err) => {
            let mut errors = vec![err];
            if let Err(abort_err) = uploader.upload.abort().await {
                errors.push(abort_err.into());
            }
            errors
        }
    }
}

struct Uploader {
    upload: Box<dyn MultipartUpload>,
    in_flight: FuturesUnordered<BoxFuture<'static, (usize, object_store::Result<()>)>>,
    pending: BytesMut,
    started: usize,
    options: TransferOptions,
}

impl Uploader {
    async fn drive(
        &mut self,
        mut rx: mpsc::Receiver<Bytes>,
        cancel: CancellationToken,
    ) -> StoreResult<()> {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                chunk = rx.recv() => match chunk {
                    Some(chunk) => self.feed(chunk).await?,
                    None => {
                        self.flush_tail()?;
                        self.drain(0).await?;
                        debug!(parts = self.started, "multipart upload body complete");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn feed(&mut self, chunk: Bytes) -> StoreResult<()> {
        self.pending.extend_from_slice(&chunk);
        let part_size = self.options.part_size as usize;

        while self.pending.len() >= part_size {
            let part = self.pending.split_to(part_size).freeze();
            self.start_part(part)?;
            self.drain(self.options.concurrency - 1).await?;
        }

        Ok(())
    }

    fn flush_tail(&mut self) -> StoreResult<()> {
        if !self.pending.is_empty() {
            let tail = self.pending.split().freeze();
            self.start_part(tail)?;
        }
        Ok(())
    }

    fn start_part(&mut self, part: Bytes) -> StoreResult<()> {
        if self.options.max_parts > 0 && self.started >= self.options.max_parts {
            return Err(StoreError::TooManyParts(self.options.max_parts));
        }

        let index = self.started;
        self.started += 1;
        let fut = self.upload.put_part(part.into());
        self.in_flight
            .push(async move { (index, fut.await) }.boxed());
        Ok(())
    }

    /// Awaits completed part uploads until at most `target` remain in
    /// flight.
    async fn drain(&mut self, target: usize) -> StoreResult<()> {
        while self.in_flight.len() > target {
            if let Some((index, result)) = self.in_flight.next().await {
                result.map_err(|err| StoreError::TransferPart {
                    part: index,
                    source: Box::new(err.into()),
                })?;
            }
        }
        Ok(())
    }
}
