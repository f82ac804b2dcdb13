//! ListObjects client for S3 and S3-compatible endpoints.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use reqwest::Url;
use tracing::debug;

use super::lister::{ListPage, ListedObject, ObjectLister};
use crate::auth::{self, Credentials};
use crate::config::SourceConfig;
use crate::errors::SyncError;
use crate::xml;

const DEFAULT_ENDPOINT: &str = "https://s3.amazonaws.com";

/// Lists one bucket with signed `GET /?marker=..&max-keys=..&prefix=..`
/// requests.
pub struct S3Lister {
    client: reqwest::Client,
    credentials: Credentials,
    region: String,
    scheme: String,
    /// `Host` value as signed, including a non-default port.
    host: String,
    /// `/` for virtual-hosted style, `/{bucket}` for path style.
    path: String,
    prefix: String,
    page_size: u32,
}

impl std::fmt::Debug for S3Lister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Lister")
            .field("host", &self.host)
            .field("path", &self.path)
            .field("prefix", &self.prefix)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl S3Lister {
    pub fn new(source: &SourceConfig, page_size: u32) -> Result<Self, SyncError> {
        let endpoint = if source.endpoint_url.is_empty() {
            DEFAULT_ENDPOINT
        } else {
            source.endpoint_url.as_str()
        };
        let url = Url::parse(endpoint)
            .map_err(|e| SyncError::Config(format!("invalid endpoint url {endpoint:?}: {e}")))?;
        let endpoint_host = url
            .host_str()
            .ok_or_else(|| SyncError::Config(format!("endpoint url {endpoint:?} has no host")))?;
        let endpoint_host = match url.port() {
            Some(port) => format!("{endpoint_host}:{port}"),
            None => endpoint_host.to_string(),
        };

        let (host, path) = if source.use_path_style {
            (endpoint_host, format!("/{}", source.bucket))
        } else {
            (format!("{}.{endpoint_host}", source.bucket), "/".to_string())
        };

        let mut builder = reqwest::Client::builder();
        if source.request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(source.request_timeout_secs));
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            credentials: Credentials {
                access_key: source.access_key.clone(),
                secret_key: source.secret_key.clone(),
            },
            region: source.region.clone(),
            scheme: url.scheme().to_string(),
            host,
            path,
            prefix: source.prefix.clone(),
            page_size,
        })
    }

    /// Canonical (and wire) query string for the page after `marker`.
    fn query(&self, marker: &str) -> String {
        let max_keys = self.page_size.to_string();
        auth::build_canonical_query_string(&[
            ("marker", marker),
            ("max-keys", &max_keys),
            ("prefix", &self.prefix),
        ])
    }

    fn request_url(&self, query: &str) -> String {
        format!("{}://{}{}?{query}", self.scheme, self.host, self.path)
    }

    async fn list(&self, marker: &str) -> Result<ListPage, SyncError> {
        let query = self.query(marker);
        let signed = auth::sign_request(
            &self.credentials,
            &self.region,
            "GET",
            &self.host,
            &self.path,
            &query,
            Utc::now(),
        )?;

        let response = self
            .client
            .get(self.request_url(&query))
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-content-sha256", &signed.content_sha256)
            .header("authorization", &signed.authorization)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body));
        }

        let page = page_from_body(&body)?;
        debug!(
            op = "list",
            marker,
            objects = page.objects.len(),
            truncated = page.is_truncated,
            "listing page received"
        );
        Ok(page)
    }
}

impl ObjectLister for S3Lister {
    fn fetch_page(
        &self,
        marker: &str,
    ) -> Pin<Box<dyn Future<Output = Result<ListPage, SyncError>> + Send + '_>> {
        let marker = marker.to_string();
        Box::pin(async move { self.list(&marker).await })
    }
}

/// Decode a successful listing body into a page, preserving entry order.
fn page_from_body(body: &str) -> Result<ListPage, SyncError> {
    let result = xml::parse_list_bucket_result(body)?;
    let objects = result
        .contents
        .into_iter()
        .map(|c| ListedObject {
            key: c.key,
            last_modified: c.last_modified,
            size: c.size,
            etag: c.etag,
            storage_class: c.storage_class,
        })
        .collect();
    Ok(ListPage {
        objects,
        is_truncated: result.is_truncated,
    })
}

/// Map a non-2xx answer to [`SyncError::Status`].
fn status_error(status: u16, body: &str) -> SyncError {
    match xml::parse_error(body) {
        Some(err) => SyncError::Status {
            status,
            code: err.code,
            message: err.message,
        },
        None => SyncError::Status {
            status,
            code: String::new(),
            message: body.chars().take(256).collect(),
        },
    }
}
