//! Database bootstrap for the image store.
//!
//! This module handles:
//! - Creating the SQLite database and its parent directory on first use
//! - Applying the embedded migrations
//! - Reading the configuration table and checking the schema version

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use sqlx::{
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite,
};
use tokio::fs;

use crate::{FunctronError, FunctronResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Migrator for the image store database.
pub static STORE_DB_MIGRATOR: Migrator = sqlx::migrate!("lib/migrations");

/// The configuration key holding the schema version.
pub const SCHEMA_VERSION_KEY: &str = "db_schema";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Schema versions this build can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVersion {
    /// The first and only schema.
    V1,
}

/// A row of the configuration table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct KeyValueConfig {
    /// The key.
    pub key: String,

    /// The value.
    pub value: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Opens the database at `db_path`, creating it if needed, and applies `migrator`.
///
/// Migrations only ever create what is missing, so an existing store is opened unchanged.
pub async fn get_or_create_pool(
    db_path: &Path,
    migrator: &Migrator,
) -> FunctronResult<Pool<Sqlite>> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    if db_path.exists() {
        tracing::info!("using existing database at {}", db_path.display());
    } else {
        tracing::info!("creating a database at {}", db_path.display());
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    // One connection serialises writers, which SQLite would do anyway
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    migrator.run(&pool).await?;

    Ok(pool)
}

/// Returns every row of the configuration table.
pub async fn get_configuration_values(pool: &Pool<Sqlite>) -> FunctronResult<Vec<KeyValueConfig>> {
    let rows = sqlx::query_as::<_, KeyValueConfig>("SELECT key, value FROM configuration")
        .fetch_all(pool)
        .await?;

    Ok(rows)
}

/// Returns the configuration row for `key`, if there is one.
pub async fn get_configuration_value(
    pool: &Pool<Sqlite>,
    key: &str,
) -> FunctronResult<Option<KeyValueConfig>> {
    let row = sqlx::query_as::<_, KeyValueConfig>(
        "SELECT key, value FROM configuration WHERE key = ?",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Reads and checks the schema version of the store.
pub async fn get_schema_version(pool: &Pool<Sqlite>) -> FunctronResult<SchemaVersion> {
    match get_configuration_value(pool, SCHEMA_VERSION_KEY).await? {
        Some(row) if row.value == "v1" => Ok(SchemaVersion::V1),
        Some(row) => Err(FunctronError::UnsupportedSchemaVersion(row.value)),
        None => Err(FunctronError::UnknownSchemaVersion),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test_log::test(tokio::test)]
    async fn test_pool_creation_is_idempotent() -> FunctronResult<()> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("nested").join("images.db");

        let pool = get_or_create_pool(&db_path, &STORE_DB_MIGRATOR).await?;
        assert!(db_path.exists());
        assert_eq!(get_schema_version(&pool).await?, SchemaVersion::V1);
        pool.close().await;

        // Reopening applies nothing and keeps the stamp
        let pool = get_or_create_pool(&db_path, &STORE_DB_MIGRATOR).await?;
        let values = get_configuration_values(&pool).await?;
        assert_eq!(
            values,
            vec![KeyValueConfig {
                key: "db_schema".to_string(),
                value: "v1".to_string(),
            }]
        );

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_schema_version_errors() -> FunctronResult<()> {
        let temp_dir = TempDir::new()?;
        let pool =
            get_or_create_pool(&temp_dir.path().join("images.db"), &STORE_DB_MIGRATOR).await?;

        sqlx::query("UPDATE configuration SET value = 'v2' WHERE key = 'db_schema'")
            .execute(&pool)
            .await?;
        assert!(matches!(
            get_schema_version(&pool).await,
            Err(FunctronError::UnsupportedSchemaVersion(v)) if v == "v2"
        ));

        sqlx::query("DELETE FROM configuration").execute(&pool).await?;
        assert!(matches!(
            get_schema_version(&pool).await,
            Err(FunctronError::UnknownSchemaVersion)
        ));

        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_key_is_none() -> FunctronResult<()> {
        let temp_dir = TempDir::new()?;
        let pool =
            get_or_create_pool(&temp_dir.path().join("images.db"), &STORE_DB_MIGRATOR).await?;

        assert!(get_configuration_value(&pool, "missing").await?.is_none());

        Ok(())
    }
}
