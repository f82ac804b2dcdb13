//! S3 XML response decoding.
//!
//! Listing and error responses from the object store are XML documents.
//! This module maps them onto plain structs with `quick-xml`'s serde
//! deserializer; unknown elements (`Owner`, `RequestId`, ...) are ignored.

use serde::Deserialize;

use crate::errors::SyncError;

// ── ListBucketResult ────────────────────────────────────────────────

/// Decoded `<ListBucketResult>` for a `GET /?marker=` listing.
///
/// ```xml
/// <ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
///   <Name>bucket</Name>
///   <Prefix/>
///   <Marker/>
///   <MaxKeys>1000</MaxKeys>
///   <IsTruncated>false</IsTruncated>
///   <Contents>
///     <Key>my-image.jpg</Key>
///     <LastModified>2009-10-12T17:50:30.000Z</LastModified>
///     <ETag>"fba9dede5f27731c9771645a39863328"</ETag>
///     <Size>434234</Size>
///     <StorageClass>STANDARD</StorageClass>
///   </Contents>
/// </ListBucketResult>
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ListBucketResult {
    pub name: String,
    pub prefix: String,
    pub marker: String,
    pub next_marker: Option<String>,
    pub max_keys: Option<u32>,
    pub is_truncated: bool,
    pub contents: Vec<Contents>,
}

/// One `<Contents>` entry. Every field is kept as the literal text.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Contents {
    pub key: String,
    pub last_modified: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    pub size: String,
    pub storage_class: String,
}

/// Parse a `<ListBucketResult>` body.
pub fn parse_list_bucket_result(body: &str) -> Result<ListBucketResult, SyncError> {
    quick_xml::de::from_str(body)
        .map_err(|e| SyncError::Decode(format!("malformed ListBucketResult: {e}")))
}

// ── Error ───────────────────────────────────────────────────────────

/// Decoded S3 `<Error>` document.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub resource: Option<String>,
    pub request_id: Option<String>,
}

/// Parse an `<Error>` body. Returns `None` when the body is not one.
pub fn parse_error(body: &str) -> Option<ErrorResponse> {
    quick_xml::de::from_str::<ErrorResponse>(body)
        .ok()
        .filter(|e| !e.code.is_empty())
}

// ── Tests ───────────────────────────────────────────────────────────
