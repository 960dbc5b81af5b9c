use serde::{Deserialize, Serialize};

pub const DEFAULT_COPY_BUFFER_SIZE: usize = 1024 * 1024;
pub const DEFAULT_PART_SIZE: u64 = 32 * 1024 * 1024;

/// Top-level store configuration. Each backend gets its own explicit,
/// self-contained section; absent sections fall back to that backend's
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Size of the fixed buffer used when pumping bytes between two
    /// backends during a streamed copy.
    pub copy_buffer_size: usize,
    /// Scheme a locator with no scheme resolves to.
    pub default_scheme: String,
    pub s3: S3Config,
    pub git: GitConfig,
    pub redis: RedisConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            default_scheme: "file".to_string(),
            s3: S3Config::default(),
            git: GitConfig::default(),
            redis: RedisConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub allow_http: bool,
    pub force_path_style: bool,
    /// Part size for ranged downloads, in bytes. 0 means the default.
    pub download_part_size: u64,
    /// Number of concurrent part downloads. Values <= 1 read serially.
    pub download_concurrency: usize,
    /// Part size for multipart uploads, in bytes. 0 means the default.
    pub upload_part_size: u64,
    /// Number of concurrent part uploads. Values <= 1 upload serially.
    pub upload_concurrency: usize,
    /// Upper bound on multipart upload parts. 0 means unlimited.
    pub upload_max_parts: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Directory repository snapshots are cloned under. Defaults to the
    /// system temp directory.
    pub tmp_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection string override. When unset the connection is derived
    /// from the locator's authority.
    pub dsn: Option<String>,
}
