//! Persistent backends for the record cache.
//!
//! Both backends hold one opaque JSON payload under a fixed key and are
//! overwritten wholesale on every flush.

use std::path::PathBuf;

use sqlx::PgPool;

use crate::error::CacheError;

// ---

/// Key the cache payload lives under.
pub const CACHE_KEY: &str = "data";

/// Where the cache payload is persisted.
#[derive(Debug, Clone)]
pub enum CacheStore {
    /// A JSON file on local disk.
    File(PathBuf),
    /// A row in the `cache_store` table.
    Postgres(PgPool),
    /// Nothing is persisted.
    Memory,
}

impl CacheStore {
    // ---
    /// Read the stored payload, `None` if nothing was ever written.
    pub async fn read(&self) -> Result<Option<String>, CacheError> {
        // ---
        match self {
            Self::File(path) => match tokio::fs::read_to_string(path).await {
                Ok(text) => Ok(Some(text)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            },
            Self::Postgres(pool) => {
                let row: Option<(String,)> =
                    sqlx::query_as("SELECT value FROM cache_store WHERE key = $1")
                        .bind(CACHE_KEY)
                        .fetch_optional(pool)
                        .await?;
                Ok(row.map(|(value,)| value))
            }
            Self::Memory => Ok(None),
        }
    }

    /// Replace the stored payload.
    pub async fn write(&self, payload: &str) -> Result<(), CacheError> {
        // ---
        match self {
            Self::File(path) => {
                // Readers only ever see a complete payload.
                let tmp = path.with_extension("tmp");
                tokio::fs::write(&tmp, payload).await?;
                tokio::fs::rename(&tmp, path).await?;
                Ok(())
            }
            Self::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO cache_store (key, value, updated_at)
                    VALUES ($1, $2, now())
                    ON CONFLICT (key) DO UPDATE SET
                        value = EXCLUDED.value,
                        updated_at = EXCLUDED.updated_at
                    "#,
                )
                .bind(CACHE_KEY)
                .bind(payload)
                .execute(pool)
                .await?;
                Ok(())
            }
            Self::Memory => Ok(()),
        }
    }

    pub fn describe(&self) -> String {
        // ---
        match self {
            Self::File(path) => format!("file {}", path.display()),
            Self::Postgres(_) => "postgres table cache_store".to_string(),
            Self::Memory => "memory".to_string(),
        }
    }
}
