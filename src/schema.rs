//! Database schema management for the PostgreSQL cache backend.
//!
//! Ensures the key/value table backing the record cache exists before the
//! cache is loaded. Applied once on startup from `main.rs`, and only when
//! `DATABASE_URL` is configured.

use anyhow::Result;
use sqlx::PgPool;

// ---

/// Create the cache table (idempotent).
///
/// The cache is stored wholesale as one serialized JSON array of raw records
/// under a fixed key, so a single narrow table is enough. Safe to call on
/// every startup; no-op if the table already exists.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_store (
            key        TEXT        PRIMARY KEY,
            value      TEXT        NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
