//! Metadata storage layer.
//!
//! The [`store::MetadataStore`] trait defines the upsert target;
//! [`postgres::PostgresMetadataStore`] is the production backend,
//! [`sqlite::SqliteMetadataStore`] and [`memory::MemoryMetadataStore`]
//! serve local runs and tests. [`open_store`] picks one by URL scheme.

pub mod memory;
pub mod postgres;
pub mod sqlite;
pub mod store;

use std::sync::Arc;

use tracing::info;

use crate::errors::SyncError;
use store::MetadataStore;

/// Open the store named by `url`.
///
/// - `postgres://…` / `postgresql://…`: PostgreSQL with `max_connections`
/// - `sqlite://<path>` or `sqlite::memory:`: SQLite file or in-memory database
/// - `memory://`: process-local map, discarded on exit
pub async fn open_store(
    url: &str,
    max_connections: u32,
) -> Result<Arc<dyn MetadataStore>, SyncError> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let store = postgres::PostgresMetadataStore::connect(url, max_connections).await?;
        return Ok(Arc::new(store));
    }
    if let Some(path) = sqlite_path(url) {
        if path != ":memory:" {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        let store = sqlite::SqliteMetadataStore::new(path)?;
        info!("SQLite metadata store initialized at {}", path);
        return Ok(Arc::new(store));
    }
    if url == "memory://" || url == "memory:" {
        info!("in-memory metadata store initialized; rows are discarded on exit");
        return Ok(Arc::new(memory::MemoryMetadataStore::new()));
    }

    let scheme = url.split(':').next().unwrap_or_default();
    Err(SyncError::Config(format!(
        "unsupported database url scheme {scheme:?}"
    )))
}

fn sqlite_path(url: &str) -> Option<&str> {
    if url == "sqlite::memory:" {
        return Some(":memory:");
    }
    url.strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .filter(|path| !path.is_empty())
}
