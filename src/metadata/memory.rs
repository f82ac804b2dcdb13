//! In-memory metadata store.
//!
//! Keeps rows in a `RwLock<HashMap>` with no persistence. Selected with a
//! `memory://` database URL for dry runs; also the store used by the
//! mirror tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;

use super::store::{MetadataStore, ObjectRecord, UpsertOutcome};
use crate::errors::SyncError;

#[derive(Default)]
pub struct MemoryMetadataStore {
    objects: RwLock<HashMap<String, ObjectRecord>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every stored row, sorted by key.
    pub fn snapshot(&self) -> Vec<ObjectRecord> {
        let objects = self.objects.read().expect("rwlock poisoned");
        let mut rows: Vec<ObjectRecord> = objects.values().cloned().collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn upsert(
        &self,
        record: ObjectRecord,
    ) -> Pin<Box<dyn Future<Output = Result<UpsertOutcome, SyncError>> + Send + '_>> {
        Box::pin(async move {
            let mut objects = self.objects.write().expect("rwlock poisoned");
            let outcome = match objects.get_mut(&record.key) {
                Some(existing) => {
                    existing.last_modified = record.last_modified;
                    existing.size = record.size;
                    existing.etag = record.etag;
                    UpsertOutcome::Updated
                }
                None => {
                    objects.insert(record.key.clone(), record);
                    UpsertOutcome::Inserted
                }
            };
            Ok(outcome)
        })
    }

    fn get_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ObjectRecord>, SyncError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().expect("rwlock poisoned");
            Ok(objects.get(&key).cloned())
        })
    }

    fn count_objects(&self) -> Pin<Box<dyn Future<Output = Result<u64, SyncError>> + Send + '_>> {
        Box::pin(async move {
            let objects = self.objects.read().expect("rwlock poisoned");
            Ok(objects.len() as u64)
        })
    }
}
