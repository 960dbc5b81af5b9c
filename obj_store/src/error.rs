use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the object store and its backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found")]
    ObjectNotFound,

    #[error("no backend found for scheme \"{0}\"")]
    NoBackendForScheme(String),

    #[error("backend for scheme \"{0}\" is not configured")]
    BackendNotConfigured(String),

    #[error("operation \"{0}\" is not supported by this backend")]
    Unsupported(&'static str),

    #[error("invalid locator \"{url}\": {reason}")]
    InvalidLocator { url: String, reason: String },

    #[error("transfer of part {part} failed: {source}")]
    TransferPart {
        part: usize,
        #[source]
        source: Box<StoreError>,
    },

    #[error("multipart upload exceeds the configured limit of {0} parts")]
    TooManyParts(usize),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("part {part} length mismatch: expected {expected} bytes, got {actual}")]
    IntegrityMismatch {
        part: usize,
        expected: u64,
        actual: u64,
    },

    #[error("unexpected HTTP status code: {0}")]
    HttpStatus(u16),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("remote object store error: {0}")]
    Remote(object_store::Error),

    #[error(transparent)]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Ssh(#[from] ssh2::Error),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    UrlParse(#[from] url::ParseError),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Aggregate(Vec<StoreError>),
}

impl From<object_store::Error> for StoreError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => StoreError::ObjectNotFound,
            other => StoreError::Remote(other),
        }
    }
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::ObjectNotFound)
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, StoreError::Unsupported(_))
    }
}

/// Collapses a list of errors into nothing, the sole error, or an aggregate.
pub fn aggregate(mut errors: Vec<StoreError>) -> StoreResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(StoreError::Aggregate(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_joins_messages() {
        let err = aggregate(vec![
            StoreError::ObjectNotFound,
            StoreError::Unsupported("list_prefix"),
        ])
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("object not found"));
        assert!(msg.contains("list_prefix"));
    }

    #[test]
    fn aggregate_of_one_returns_it_unwrapped() {
        let err = aggregate(vec![StoreError::ObjectNotFound]).unwrap_err();
        assert!(err.is_not_found());
        assert!(aggregate(vec![]).is_ok());
    }

    #[test]
    fn remote_not_found_maps_to_object_not_found() {
        let err: StoreError = object_store::Error::NotFound {
            path: "a/b".to_string(),
            source: "gone".into(),
        }
        .into();
        assert!(err.is_not_found());
    }
}
