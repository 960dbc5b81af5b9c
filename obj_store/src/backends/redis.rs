use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::debug;
use url::Url;

use super::memory::BytesReader;
use crate::{
    backend::Backend,
    config::RedisConfig,
    error::{StoreError, StoreResult},
    session::{Session, SessionCache},
    types::{ListOptions, Object, ObjectMetadata, ObjectReader, ObjectWriter, RandomAccessReader},
};

/// Key-value backend: each object is one whole value under the flattened
/// `{host}{path}` key of its locator. Reads and writes buffer the entire
/// value in memory; listing, stat and positional reads are unsupported.
pub struct RedisBackend {
    conf: RedisConfig,
    connections: SessionCache<RedisConnection>,
}

struct RedisConnection {
    conn: redis::aio::MultiplexedConnection,
}

#[async_trait]
impl Session for RedisConnection {}

impl RedisBackend {
    pub fn new(conf: RedisConfig) -> Self {
        RedisBackend {
            conf,
            connections: SessionCache::new(),
        }
    }

    /// The configured DSN wins; without one the server address comes from
    /// the locator's authority.
    fn connection_url(&self, url: &Url) -> StoreResult<String> {
        if let Some(dsn) = &self.conf.dsn {
            return Ok(dsn.clone());
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| StoreError::InvalidLocator {
                url: url.to_string(),
                reason: "host can't be empty without a configured dsn".to_string(),
            })?;

        Ok(match url.port() {
            Some(port) => format!("redis://{host}:{port}/"),
            None => format!("redis://{host}/"),
        })
    }

    async fn connection(&self, url: &Url) -> StoreResult<redis::aio::MultiplexedConnection> {
        let dsn = self.connection_url(url)?;

        let session = self
            .connections
            .get_or_create(&dsn, || async {
                debug!("connecting to key-value store");
                let client = redis::Client::open(dsn.as_str())?;
                let conn = client.get_multiplexed_async_connection().await?;
                Ok(RedisConnection { conn })
            })
            .await?;

        Ok(session.conn.clone())
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
impl Backend for RedisBackend {
    async fn list_prefix(&self, _url: &Url, _opts: &ListOptions) -> StoreResult<Vec<Object>> {
        Err(StoreError::Unsupported("list_prefix"))
    }

    async fn read_metadata(&self, _url: &Url) -> StoreResult<ObjectMetadata> {
        Err(StoreError::Unsupported("read_metadata"))
    }

    async fn reader(&self, url: &Url) -> StoreResult<Box<dyn ObjectReader>> {
        let key = object_key(url)?;
        let mut conn = self.connection(url).await?;

        let value: Option<Vec<u8>> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
        match value {
            Some(data) => Ok(Box::new(BytesReader {
                data: Some(Bytes::from(data)),
            })),
            None => Err(StoreError::ObjectNotFound),
        }
    }

    async fn reader_at(&self, _url: &Url) -> StoreResult<Box<dyn RandomAccessReader>> {
        Err(StoreError::Unsupported("reader_at"))
    }

    async fn writer(&self, url: &Url) -> StoreResult<Box<dyn ObjectWriter>> {
        Ok(Box::new(RedisWriter {
            key: object_key(url)?,
            buf: BytesMut::new(),
            conn: self.connection(url).await?,
        }))
    }

    async fn delete(&self, url: &Url) -> StoreResult<()> {
        let key = object_key(url)?;
        let mut conn = self.connection(url).await?;

        let removed: i64 = redis::cmd("DEL").arg(&key).query_async(&mut conn).await?;
        if removed == 0 {
            return Err(StoreError::ObjectNotFound);
        }
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        self.connections.close_all().await
    }
}

/// Buffers every chunk; the value only reaches the server when `close`
/// issues the SET, keeping the commit-on-close contract.
struct RedisWriter {
    key: String,
    buf: BytesMut,
    conn: redis::aio::MultiplexedConnection,
}

#[async_trait]
impl ObjectWriter for RedisWriter {
    async fn write(&mut self, chunk: Bytes) -> StoreResult<()> {
        self.buf.extend_from_slice(&chunk);
        Ok(())
    }

    async fn close(&mut self) -> StoreResult<()> {
        let value = self.buf.split().freeze();
        let () = redis::cmd("SET")
            .arg(&self.key)
            .arg(&value[..])
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_flatten_host_and_path() {
        let url = Url::parse("redis://cache-1:6379/jobs/42/state").unwrap();
        assert_eq!(object_key(&url).unwrap(), "cache-1/jobs/42/state");
    }

    #[test]
    fn configured_dsn_overrides_the_locator_authority() {
        let backend = RedisBackend::new(RedisConfig {
            dsn: Some("redis://:hunter2@10.0.0.9:6390/2".to_string()),
        });
        let url = Url::parse("redis://cache-1/jobs/42").unwrap();
        assert_eq!(
            backend.connection_url(&url).unwrap(),
            "redis://:hunter2@10.0.0.9:6390/2"
        );

        let derived = RedisBackend::new(RedisConfig::default());
        assert_eq!(
            derived.connection_url(&url).unwrap(),
            "redis://cache-1/"
        );
        let url = Url::parse("redis://cache-1:6390/jobs/42").unwrap();
        assert_eq!(
            derived.connection_url(&url).unwrap(),
            "redis://cache-1:6390/"
        );
    }

    #[tokio::test]
    async fn enumeration_operations_are_unsupported() {
        let backend = RedisBackend::new(RedisConfig::default());
        let url = Url::parse("redis://cache-1/jobs/42").unwrap();

        assert!(backend
            .list_prefix(&url, &ListOptions::default())
            .await
            .unwrap_err()
            .is_unsupported());
        assert!(backend
            .read_metadata(&url)
            .await
            .unwrap_err()
            .is_unsupported());
        assert!(backend.reader_at(&url).await.unwrap_err().is_unsupported());
    }
}
