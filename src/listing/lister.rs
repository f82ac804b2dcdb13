//! Listing contract consumed by the mirror.

use std::future::Future;
use std::pin::Pin;

use crate::errors::SyncError;

/// One object as reported by a listing page. Every field is the literal
/// text of the response; nothing is parsed yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub last_modified: String,
    pub size: String,
    pub etag: String,
    /// Logged, never stored.
    pub storage_class: String,
}

/// One page of a listing, in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ListedObject>,
    pub is_truncated: bool,
}

impl ListPage {
    /// Marker for the following page: the key of the last object.
    pub fn next_marker(&self) -> Option<&str> {
        self.objects.last().map(|o| o.key.as_str())
    }
}

/// Fetches listing pages starting strictly after a marker.
///
/// An empty marker requests the first page.
pub trait ObjectLister: Send + Sync + 'static {
    fn fetch_page(
        &self,
        marker: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ListPage, SyncError>> + Send + '_>>;
}
