//! PostgreSQL-backed metadata store.
//!
//! Uses a `sqlx` connection pool shared by every worker. TLS is always
//! disabled on the connection, whatever `sslmode` the URL carries.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Row};
use tracing::info;

use super::store::{MetadataStore, ObjectRecord, UpsertOutcome};
use crate::errors::SyncError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS objects (
        id             BIGSERIAL PRIMARY KEY,
        key            TEXT NOT NULL UNIQUE,
        last_modified  TIMESTAMPTZ NOT NULL,
        size           TEXT NOT NULL,
        etag           TEXT NOT NULL
    )";

/// Metadata store backed by a PostgreSQL `objects` table.
pub struct PostgresMetadataStore {
    pool: PgPool,
}

impl PostgresMetadataStore {
    /// Connect to `url` with up to `max_connections` pooled connections and
    /// create the table if it is missing.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, SyncError> {
        let opts = connect_options(url)?;
        info!(
            host = opts.get_host(),
            port = opts.get_port(),
            database = opts.get_database().unwrap_or("<default>"),
            max_connections,
            "connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(opts)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }
}

/// Parse a `postgres://` URL into connection options with TLS disabled.
pub fn connect_options(url: &str) -> Result<PgConnectOptions, SyncError> {
    let opts = PgConnectOptions::from_str(url)
        .map_err(|e| SyncError::Config(format!("invalid database url: {e}")))?;
    Ok(opts.ssl_mode(PgSslMode::Disable))
}

impl MetadataStore for PostgresMetadataStore {
    fn upsert(
        &self,
        record: ObjectRecord,
    ) -> Pin<Box<dyn Future<Output = Result<UpsertOutcome, SyncError>> + Send + '_>> {
        Box::pin(async move {
            let id: Option<i64> = sqlx::query_scalar("SELECT id FROM objects WHERE key = $1")
                .bind(&record.key)
                .fetch_optional(&self.pool)
                .await?;

            match id {
                Some(id) => {
                    sqlx::query(
                        "UPDATE objects SET last_modified = $2, size = $3, etag = $4 WHERE id = $1",
                    )
                    .bind(id)
                    .bind(record.last_modified)
                    .bind(&record.size)
                    .bind(&record.etag)
                    .execute(&self.pool)
                    .await?;
                    Ok(UpsertOutcome::Updated)
                }
                None => {
                    sqlx::query(
                        "INSERT INTO objects (key, last_modified, size, etag) VALUES ($1, $2, $3, $4)",
                    )
                    .bind(&record.key)
                    .bind(record.last_modified)
                    .bind(&record.size)
                    .bind(&record.etag)
                    .execute(&self.pool)
                    .await?;
                    Ok(UpsertOutcome::Inserted)
                }
            }
        })
    }

    fn get_object(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ObjectRecord>, SyncError>> + Send + '_>> {
        let key = key.to_string();
        Box::pin(async move {
            let row = sqlx::query("SELECT key, last_modified, size, etag FROM objects WHERE key = $1")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await?;
            let record = match row {
                Some(row) => Some(ObjectRecord {
                    key: row.try_get("key")?,
                    last_modified: row.try_get("last_modified")?,
                    size: row.try_get("size")?,
                    etag: row.try_get("etag")?,
                }),
                None => None,
            };
            Ok(record)
        })
    }

    fn count_objects(&self) -> Pin<Box<dyn Future<Output = Result<u64, SyncError>> + Send + '_>> {
        Box::pin(async move {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM objects")
                .fetch_one(&self.pool)
                .await?;
            Ok(count as u64)
        })
    }
}
