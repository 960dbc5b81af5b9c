use std::{collections::HashMap, future::Future, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{aggregate, StoreResult};

/// An expensive remote handle cached by [`SessionCache`]: a transport
/// connection, a cloned repository snapshot, a per-bucket client.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Keyed lazy cache of shared sessions.
///
/// A single mutex guards the whole map, so at most one session is ever
/// established per identity: concurrent callers for the same identity block
/// until the first establishment completes. A failed establishment is not
/// cached; the next caller retries it.
pub struct SessionCache<S> {
    sessions: Mutex<HashMap<String, Arc<S>>>,
}

impl<S: Session> SessionCache<S> {
    pub fn new() -> Self {
        SessionCache {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub async fn get_or_create<F, Fut>(&self, identity: &str, init: F) -> StoreResult<Arc<S>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = StoreResult<S>>,
    {
        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get(identity) {
            return Ok(session.clone());
        }

        let session = Arc::new(init().await?);
        sessions.insert(identity.to_string(), session.clone());
        Ok(session)
    }

    /// Closes every cached session, aggregating errors instead of stopping
    /// at the first.
    pub async fn close_all(&self) -> StoreResult<()> {
        let mut sessions = self.sessions.lock().await;
        let mut errors = Vec::new();

        for (_, session) in sessions.drain() {
            if let Err(err) = session.close().await {
                errors.push(err);
            }
        }

        aggregate(errors)
    }
}

impl<S: Session> Default for SessionCache<S> {
    fn default() -> Self {
        Self::new()
    }
}
