use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use url::Url;

use crate::{
    backend::Backend,
    error::{StoreError, StoreResult},
    types::{ListOptions, Object, ObjectMetadata, ObjectReader, ObjectWriter, RandomAccessReader},
};

/// Read-only HTTP backend: `reader` is a streaming GET, everything else is
/// unsupported. One instance serves both `http` and `https`.
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new() -> StoreResult<Self> {
        Ok(HttpBackend {
            client: reqwest::Client::builder().build()?,
        })
    }
}

fn validate(url: &Url) -> StoreResult<()> {
    if url.host_str().unwrap_or("").is_empty() {
        return Err(StoreError::InvalidLocator {
            url: url.to_string(),
            reason: "host can't be empty".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl Backend for HttpBackend {
    async fn list_prefix(&self, _url: &Url, _opts: &ListOptions) -> StoreResult<Vec<Object>> {
        Err(StoreError::Unsupported("list_prefix"))
    }

    async fn read_metadata(&self, _url: &Url) -> StoreResult<ObjectMetadata> {
        Err(StoreError::Unsupported("read_metadata"))
    }

    async fn reader(&self, url: &Url) -> StoreResult<Box<dyn ObjectReader>> {
        validate(url)?;

        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();

        if status.as_u16() == 404 {
            return Err(StoreError::ObjectNotFound);
        }
        if !status.is_success() {
            return Err(StoreError::HttpStatus(status.as_u16()));
        }

        Ok(Box::new(HttpReader {
            stream: response.bytes_stream().boxed(),
        }))
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
}

struct HttpReader {
    stream: BoxStream<'static, reqwest::Result<Bytes>>,
}

#[async_trait]
impl ObjectReader for HttpReader {
    async fn next_chunk(&mut self) -> StoreResult<Option<Bytes>> {
        match self.stream.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(err)) => Err(err.into()),
            None => Ok(None),
        }
    }
}
