use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use object_store::{aws::AmazonS3Builder, path::Path, ObjectStore};
use tracing::debug;
use url::Url;

use super::start_after_key;
use crate::{
    backend::Backend,
    config::S3Config,
    error::{StoreError, StoreResult},
    session::{Session, SessionCache},
    transfer::{ChunkedReader, ChunkedWriter, TransferOptions},
    types::{ListOptions, Object, ObjectMetadata, ObjectReader, ObjectWriter, RandomAccessReader},
};

/// Range-addressable remote object backend. The locator's authority is the
/// bucket and its path is the key; one client per bucket is established
/// lazily and shared through the session cache.
pub struct S3Backend {
    conf: S3Config,
    clients: SessionCache<BucketClient>,
}

struct BucketClient {
    store: Arc<dyn ObjectStore>,
}

#[async_trait]
impl Session for BucketClient {}

impl S3Backend {
    pub fn new(conf: S3Config) -> Self {
        S3Backend {
            conf,
            clients: SessionCache::new(),
        }
    }

    fn bucket<'a>(&self, url: &'a Url) -> StoreResult<&'a str> {
        match url.host_str() {
            Some(bucket) if !bucket.is_empty() => Ok(bucket),
            _ => Err(StoreError::InvalidLocator {
                url: url.to_string(),
                reason: "bucket must be specified".to_string(),
            }),
        }
    }

    fn key(url: &Url) -> Path {
        Path::from(url.path().trim_start_matches('/'))
    }

    async fn client(&self, url: &Url) -> StoreResult<Arc<dyn ObjectStore>> {
        let bucket = self.bucket(url)?;
        let conf = self.conf.clone();

        let client = self
            .clients
            .get_or_create(bucket, || async {
                debug!(bucket, "building s3 client");
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);

                if let Some(key_id) = &conf.access_key_id {
                    builder = builder.with_access_key_id(key_id);
                }
                if let Some(secret) = &conf.secret_access_key {
                    builder = builder.with_secret_access_key(secret);
                }
                if let Some(token) = &conf.session_token {
                    builder = builder.with_token(token);
                }
                if let Some(endpoint) = &conf.endpoint {
                    builder = builder.with_endpoint(endpoint);
                }
                if let Some(region) = &conf.region {
                    builder = builder.with_region(region);
                }
                if conf.allow_http {
                    builder = builder.with_allow_http(true);
                }
                if conf.force_path_style {
                    builder = builder.with_virtual_hosted_style_request(false);
                }

                let store = builder.build()?;
                Ok(BucketClient {
                    store: Arc::new(store),
                })
            })
            .await?;

        Ok(client.store.clone())
    }

    fn download_options(&self) -> TransferOptions {
        TransferOptions {
            part_size: self.conf.download_part_size,
            concurrency: self.conf.download_concurrency,
            max_parts: 0,
        }
        .normalized()
    }

    fn upload_options(&self) -> TransferOptions {
        TransferOptions {
            part_size: self.conf.upload_part_size,
            concurrency: self.conf.upload_concurrency,
            max_parts: self.conf.upload_max_parts,
        }
        .normalized()
    }
}

fn object_meta_to_metadata(meta: &object_store::ObjectMeta) -> ObjectMetadata {
    ObjectMetadata {
        size: meta.size,
        modified: Some(meta.last_modified),
        etag: meta.e_tag.clone(),
    }
}

#[async_trait]
impl Backend for S3Backend {
    async fn list_prefix(&self, url: &Url, opts: &ListOptions) -> StoreResult<Vec<Object>> {
        let bucket = self.bucket(url)?.to_string();
        let client = self.client(url).await?;
        let prefix = Self::key(url);

        let stream = match start_after_key(opts) {
            Some(after) => {
                let offset = Path::from(after.trim_start_matches('/'));
                client.list_with_offset(Some(&prefix), &offset)
            }
            None => client.list(Some(&prefix)),
        };

        let metas: Vec<object_store::ObjectMeta> = stream.try_collect().await?;
        metas
            .iter()
            .map(|meta| {
                let url = Url::parse(&format!("s3://{bucket}/{}", meta.location))?;
                Ok(Object {
                    url,
                    metadata: object_meta_to_metadata(meta),
                })
            })
            .collect()
    }

    async fn read_metadata(&self, url: &Url) -> StoreResult<ObjectMetadata> {
        let client = self.client(url).await?;
        let meta = client.head(&Self::key(url)).await?;
        Ok(object_meta_to_metadata(&meta))
    }

    async fn reader(&self, url: &Url) -> StoreResult<Box<dyn ObjectReader>> {
        let client = self.client(url).await?;
        let location = Self::key(url);
        let options = self.download_options();

        if options.concurrency <= 1 {
            let result = client.get(&location).await?;
            return Ok(Box::new(SerialReader {
                stream: result.into_stream(),
            }));
        }

        Ok(Box::new(
            ChunkedReader::new(client, location, options).await?,
        ))
    }

    async fn reader_at(&self, url: &Url) -> StoreResult<Box<dyn RandomAccessReader>> {
        let client = self.client(url).await?;
        let location = Self::key(url);
        let size = client.head(&location).await?.size;
        Ok(Box::new(RangedReaderAt {
            client,
            location,
            size,
        }))
    }

    async fn writer(&self, url: &Url) -> StoreResult<Box<dyn ObjectWriter>> {
        let client = self.client(url).await?;
        let upload = client.put_multipart(&Self::key(url)).await?;
        Ok(Box::new(ChunkedWriter::new(upload, self.upload_options())))
    }

    async fn delete(&self, url: &Url) -> StoreResult<()> {
        let client = self.client(url).await?;
        Ok(client.delete(&Self::key(url)).await?)
    }

    async fn close(&self) -> StoreResult<()> {
        self.clients.close_all().await
    }
}

struct SerialReader {
    stream: BoxStream<'static, object_store::Result<Bytes>>,
}

#[async_trait]
impl ObjectReader for SerialReader {
    async fn next_chunk(&mut self) -> StoreResult<Option<Bytes>> {
        match self.stream.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(err)) => Err(err.into()),
            None => Ok(None),
        }
    }
}

struct RangedReaderAt {
    client: Arc<dyn ObjectStore>,
    location: Path,
    size: u64,
}

#[async_trait]
impl RandomAccessReader for RangedReaderAt {
    async fn read_at(&self, offset: u64, len: usize) -> StoreResult<Bytes> {
        let start = offset.min(self.size);
        let end = offset.saturating_add(len as u64).min(self.size);
        if start == end {
            return Ok(Bytes::new());
        }

        let bytes = self.client.get_range(&self.location, start..end).await?;
        if bytes.len() as u64 != end - start {
            return Err(StoreError::IntegrityMismatch {
                part: 0,
                expected: end - start,
                actual: bytes.len() as u64,
            });
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_and_key_come_from_authority_and_path() {
        let backend = S3Backend::new(S3Config::default());
        let url = Url::parse("s3://my-bucket/some/deep/key.bin").unwrap();

        assert_eq!(backend.bucket(&url).unwrap(), "my-bucket");
        assert_eq!(S3Backend::key(&url).as_ref(), "some/deep/key.bin");

        let bad = Url::parse("s3:///no-bucket").unwrap();
        assert!(matches!(
            backend.bucket(&bad),
            Err(StoreError::InvalidLocator { .. })
        ));
    }

    #[test]
    fn transfer_options_fall_back_to_serial_defaults() {
        let backend = S3Backend::new(S3Config::default());
        let opts = backend.download_options();
        assert_eq!(opts.concurrency, 1);
        assert_eq!(opts.part_size, crate::config::DEFAULT_PART_SIZE);
    }
}
