//! Backend implementations of the storage contract, one per medium.

pub mod fs;
pub mod git;
pub mod http;
pub mod memory;
pub mod redis;
pub mod s3;
pub mod sftp;

use url::Url;

use crate::types::ListOptions;

/// Normalizes a caller-supplied `start_after` into a comparable path key.
/// Callers may pass either a full locator or a bare path.
pub(crate) fn start_after_key(opts: &ListOptions) -> Option<String> {
    let raw = opts.start_after.as_deref()?;
    match Url::parse(raw) {
        Ok(url) => Some(url.path().to_string()),
        Err(_) => Some(raw.to_string()),
    }
}
