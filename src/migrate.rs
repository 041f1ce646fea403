use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::{self, PoolSettings};

/// Create the document and embedding tables. Idempotent.
///
/// The `similar_docs` relation is not created here; it appears on the
/// first consolidation append.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Timestamps are Unix milliseconds.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            meta_json TEXT NOT NULL DEFAULT '{}',
            updated_at INTEGER NOT NULL,
            sim_updated_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            document_id TEXT NOT NULL,
            slot TEXT NOT NULL,
            dims INTEGER NOT NULL,
            vector BLOB NOT NULL,
            PRIMARY KEY (document_id, slot),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_updated_at ON documents(updated_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_documents_sim_updated_at ON documents(sim_updated_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create both store files and their schema.
pub async fn init_stores(config: &Config) -> Result<()> {
    let settings = PoolSettings::from_config(&config.stores);
    for path in [&config.stores.local_path, &config.stores.remote_path] {
        let pool = db::connect(path, &settings).await?;
        run_migrations(&pool).await?;
        pool.close().await;
    }
    Ok(())
}
