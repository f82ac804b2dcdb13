//! Abstract metadata store trait.
//!
//! Any destination table must implement [`MetadataStore`].  The trait
//! uses `async_trait`-style methods (manual desugaring with pinned
//! futures) so SQLite, PostgreSQL and in-memory stores share one seam.

use chrono::{DateTime, TimeZone, Utc};
use std::future::Future;
use std::pin::Pin;

use crate::errors::SyncError;
use crate::listing::lister::ListedObject;

/// Format of `LastModified` values in listing responses.
pub const LAST_MODIFIED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

// ── Record types ───────────────────────────────────────────────────

/// The persisted metadata of one object.
///
/// The listing's storage class is intentionally not part of the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Object key; the sole lookup key.
    pub key: String,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Size exactly as listed.
    pub size: String,
    /// ETag exactly as listed, quotes included.
    pub etag: String,
}

impl ObjectRecord {
    /// Convert a listing entry, parsing its timestamp.
    pub fn from_listing(object: ListedObject) -> Result<Self, SyncError> {
        let last_modified = parse_last_modified(&object.last_modified).map_err(|source| {
            SyncError::Timestamp {
                key: object.key.clone(),
                value: object.last_modified.clone(),
                source,
            }
        })?;
        Ok(Self {
            key: object.key,
            last_modified,
            size: object.size,
            etag: object.etag,
        })
    }
}

/// Parse a `2006-01-02T15:04:05.000Z` style timestamp.
pub fn parse_last_modified(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let naive = chrono::NaiveDateTime::parse_from_str(value, LAST_MODIFIED_FORMAT)?;
    Ok(Utc.from_utc_datetime(&naive))
}

/// Which branch an upsert took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No row existed for the key.
    Inserted,
    /// An existing row was overwritten in place.
    Updated,
}

impl UpsertOutcome {
    /// Label value for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpsertOutcome::Inserted => "inserted",
            UpsertOutcome::Updated => "updated",
        }
    }
}

// ── Trait ───────────────────────────────────────────────────────────

/// Async metadata store contract.
pub trait MetadataStore: Send + Sync + 'static {
    /// Update the row for `record.key` if one exists, otherwise insert one.
    ///
    /// This is a lookup followed by a write, not an atomic upsert: two
    /// concurrent calls for the same new key may both try to insert.
    fn upsert(
        &self,
        record: ObjectRecord,
    ) -> Pin<Box<dyn Future<Output = Result<UpsertOutcome, SyncError>> + Send + '_>>;

    /// Get the row stored for `key`.
    fn get_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ObjectRecord>, SyncError>> + Send + '_>>;

    /// Number of stored rows.
    fn count_objects(&self) -> Pin<Box<dyn Future<Output = Result<u64, SyncError>> + Send + '_>>;
}
