//! SQLite connection pool.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::config::StoresConfig;

/// Pool limits shared by both stores.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub timeout: Duration,
    pub max_connections: u32,
}

impl PoolSettings {
    pub fn from_config(stores: &StoresConfig) -> Self {
        Self {
            timeout: Duration::from_secs(stores.timeout_secs),
            max_connections: stores.max_connections,
        }
    }
}

pub async fn connect(db_path: &Path, settings: &PoolSettings) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(settings.timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.timeout)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;

    Ok(pool)
}
