use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// `harvest init`: create the catalog schema and the storage root.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.catalog.path).await?;
    create_schema(&pool).await?;
    pool.close().await;

    std::fs::create_dir_all(&config.pipeline.storage_root)?;
    if let Some(parent) = config.index.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Idempotent schema creation, also run whenever the catalog is opened.
pub async fn create_schema(pool: &SqlitePool) -> sqlx::Result<()> {
    // Create catalog table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS catalog (
            source_id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            url TEXT NOT NULL,
            title TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            content_hash TEXT,
            storage_path TEXT,
            byte_size INTEGER,
            content_type TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            error_kind TEXT,
            discovered_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create checkpoints table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            source TEXT PRIMARY KEY,
            cursor TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_catalog_source ON catalog(source)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_catalog_status ON catalog(status)")
        .execute(pool)
        .await?;

    Ok(())
}
