//! Error types for a mirror run.
//!
//! Every unit of work returns a [`SyncError`].  Whether an error ends the
//! run, is skipped, or is retried is decided by the coordinator from the
//! error's [`ErrorKind`], never by the code that produced it.

use thiserror::Error;

/// Broad classification used by the error policy and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required setting is missing or invalid.
    Config,
    /// The listing request could not be sent or was rejected by the service.
    Transport,
    /// The listing request could not be signed.
    Signing,
    /// The listing response body is malformed.
    Decode,
    /// A last-modified timestamp did not match the expected format.
    Timestamp,
    /// A query or statement failed.
    Database,
    /// A worker failed outside of any task's control.
    Internal,
}

impl ErrorKind {
    /// Label value for metrics and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Transport => "transport",
            ErrorKind::Signing => "signing",
            ErrorKind::Decode => "decode",
            ErrorKind::Timestamp => "timestamp",
            ErrorKind::Database => "database",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Anything that can go wrong while configuring or running a mirror.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A required setting is absent or unusable.
    #[error("{0}")]
    Config(String),

    /// Configuration values failed validation.
    #[error("invalid configuration: {0}")]
    Validation(#[from] garde::Report),

    /// Reading a file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration file is not valid YAML for [`crate::config::Config`].
    #[error("invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The listing request failed in transit.
    #[error("listing request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The listing request could not be signed.
    #[error("request signing failed: {0}")]
    Signing(String),

    /// The service answered with a non-success status.
    #[error("listing returned HTTP {status} ({code}): {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },

    /// The response body could not be decoded.
    #[error("malformed listing response: {0}")]
    Decode(String),

    /// A last-modified value did not parse.
    #[error("invalid last-modified {value:?} for key {key:?}: {source}")]
    Timestamp {
        key: String,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    /// SQLite failure.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL failure.
    #[error("database error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A task panicked or its worker was cancelled.
    #[error("worker failed: {0}")]
    TaskPanicked(String),
}

impl SyncError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Config(_)
            | SyncError::Validation(_)
            | SyncError::Io(_)
            | SyncError::Yaml(_) => ErrorKind::Config,
            SyncError::Transport(_) | SyncError::Status { .. } => ErrorKind::Transport,
            SyncError::Signing(_) => ErrorKind::Signing,
            SyncError::Decode(_) => ErrorKind::Decode,
            SyncError::Timestamp { .. } => ErrorKind::Timestamp,
            SyncError::Sqlite(_) | SyncError::Postgres(_) => ErrorKind::Database,
            SyncError::TaskPanicked(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Connection failures, timeouts, server-side 5xx answers, S3
    /// throttling (`SlowDown`), an exhausted connection pool and a locked
    /// SQLite database qualify.  Everything else is deterministic.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Transport(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            SyncError::Status { status, code, .. } => *status >= 500 || code == "SlowDown",
            SyncError::Postgres(err) => {
                matches!(err, sqlx::Error::PoolTimedOut | sqlx::Error::Io(_))
            }
            SyncError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
