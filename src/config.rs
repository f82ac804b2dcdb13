//! Configuration loading and types for bucketsync.
//!
//! Settings come from four layers, lowest precedence first: built-in
//! defaults, an optional YAML file deserialized into [`Config`], the
//! process environment ([`Config::apply_env`]), and command-line flags
//! applied by the binary.  [`Config::validate`] runs last.

use garde::Validate;
use serde::Deserialize;
use std::path::Path;

use crate::errors::SyncError;
use crate::retry::RetryConfig;

/// Environment variable holding the access key.
pub const ENV_ACCESS_KEY: &str = "AWS_ACCESS_KEY_ID";
/// Environment variable holding the secret key.
pub const ENV_SECRET_KEY: &str = "AWS_SECRET_ACCESS_KEY";
/// Environment variable holding the database connection string.
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
/// Environment variable overriding the signing region.
pub const ENV_REGION: &str = "AWS_REGION";
/// Environment variable overriding the listing endpoint.
pub const ENV_ENDPOINT_URL: &str = "S3_ENDPOINT_URL";

/// Largest page the listing API will return.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct Config {
    /// Bucket being mirrored and how to reach it.
    #[serde(default)]
    #[garde(dive)]
    pub source: SourceConfig,

    /// Destination database.
    #[serde(default)]
    #[garde(dive)]
    pub database: DatabaseConfig,

    /// Worker pool and error policy.
    #[serde(default)]
    #[garde(dive)]
    pub mirror: MirrorConfig,

    /// Logging settings.
    #[serde(default)]
    #[garde(skip)]
    pub logging: LoggingConfig,

    /// Metrics output.
    #[serde(default)]
    #[garde(skip)]
    pub observability: ObservabilityConfig,
}

/// The bucket to list.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SourceConfig {
    /// Bucket name.
    #[serde(default)]
    #[garde(length(min = 3, max = 63), pattern(r"^[a-z0-9][a-z0-9.\-]*[a-z0-9]$"))]
    pub bucket: String,

    /// Only keys starting with this prefix are listed.
    #[serde(default)]
    #[garde(skip)]
    pub prefix: String,

    /// Region used in the SigV4 credential scope.
    #[serde(default = "default_region")]
    #[garde(length(min = 1))]
    pub region: String,

    /// Custom S3-compatible endpoint (e.g. MinIO). Empty means AWS.
    #[serde(default)]
    #[garde(skip)]
    pub endpoint_url: String,

    /// Address the bucket as `{endpoint}/{bucket}` instead of a subdomain.
    #[serde(default)]
    #[garde(skip)]
    pub use_path_style: bool,

    /// Access key (also accepts `access_key_id`).
    #[serde(alias = "access_key_id", default)]
    #[garde(skip)]
    pub access_key: String,

    /// Secret key (also accepts `secret_access_key`).
    #[serde(alias = "secret_access_key", default)]
    #[garde(skip)]
    pub secret_key: String,

    /// Per-request timeout in seconds. 0 disables the timeout.
    #[serde(default)]
    #[garde(skip)]
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            prefix: String::new(),
            region: default_region(),
            endpoint_url: String::new(),
            use_path_style: false,
            access_key: String::new(),
            secret_key: String::new(),
            request_timeout_secs: 0,
        }
    }
}

/// Destination database.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// `postgres://...`, `sqlite://path`, `sqlite::memory:` or `memory://`.
    #[serde(default)]
    #[garde(skip)]
    pub url: String,

    /// Connection pool size. 0 means one connection per worker.
    #[serde(default)]
    #[garde(range(max = 1024))]
    pub max_connections: u32,
}

/// What to do with a unit of work that failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stop the whole run on the first failure.
    #[default]
    Abort,
    /// Log the failure, count it, and keep going.
    Skip,
}

/// How a truncated page continues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PaginationMode {
    /// Each continuation becomes a new task on the queue.
    #[default]
    Enqueue,
    /// The listing task keeps fetching pages itself.
    Inline,
}

/// Worker pool settings.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MirrorConfig {
    /// Number of concurrent workers.
    #[serde(default = "default_workers")]
    #[garde(range(min = 1, max = 1024))]
    pub workers: usize,

    /// Objects requested per page.
    #[serde(default = "default_page_size")]
    #[garde(range(min = 1, max = 1000))]
    pub page_size: u32,

    /// Failure handling.
    #[serde(default)]
    #[garde(skip)]
    pub on_error: ErrorPolicy,

    /// Continuation strategy.
    #[serde(default)]
    #[garde(skip)]
    pub pagination: PaginationMode,

    /// Retry of transient failures.
    #[serde(default)]
    #[garde(skip)]
    pub retry: RetryConfig,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            page_size: default_page_size(),
            on_error: ErrorPolicy::default(),
            pagination: PaginationMode::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Metrics output settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObservabilityConfig {
    /// Write Prometheus exposition text here when the run ends.
    #[serde(default)]
    pub metrics_textfile: Option<String>,
}

// -- Defaults ----------------------------------------------------------------

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_workers() -> usize {
    5
}

fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Layering ----------------------------------------------------------------

impl Config {
    /// Overlay values found in the environment.
    ///
    /// `lookup` is `std::env::var(..).ok()` in the binary. Empty values
    /// count as unset.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = get(ENV_ACCESS_KEY) {
            self.source.access_key = v;
        }
        if let Some(v) = get(ENV_SECRET_KEY) {
            self.source.secret_key = v;
        }
        if let Some(v) = get(ENV_REGION) {
            self.source.region = v;
        }
        if let Some(v) = get(ENV_ENDPOINT_URL) {
            self.source.endpoint_url = v;
        }
        if let Some(v) = get(ENV_DATABASE_URL) {
            self.database.url = v;
        }
    }

    /// Check required settings, then value ranges.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.source.bucket.is_empty() {
            return Err(SyncError::Config("bucket is not set".to_string()));
        }
        if self.source.access_key.is_empty() {
            return Err(SyncError::Config(format!("{ENV_ACCESS_KEY} not set")));
        }
        if self.source.secret_key.is_empty() {
            return Err(SyncError::Config(format!("{ENV_SECRET_KEY} not set")));
        }
        if self.database.url.is_empty() {
            return Err(SyncError::Config(format!("{ENV_DATABASE_URL} not set")));
        }
        Validate::validate(self)?;
        Ok(())
    }

    /// Connection pool size to open.
    pub fn pool_size(&self) -> u32 {
        match self.database.max_connections {
            0 => self.mirror.workers as u32,
            n => n,
        }
    }
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, SyncError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}
