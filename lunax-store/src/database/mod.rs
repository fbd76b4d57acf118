//! Database module
//!
//! This module provides all persistence for the journal:
//! - Schema and migrations for the generic record tables
//! - The record store with its secondary indexes
//! - The journal's collection catalog and models
//! - Repository layer for typed CRUD and list views

pub mod catalog;
pub mod index;
pub mod models;
pub mod repository;
pub mod schema;
pub mod store;

pub use catalog::{journal_catalog, Catalog, CollectionDef, IndexDef};
pub use index::{Direction, IndexKey, KeyRange};
pub use models::*;
pub use repository::Repository;
pub use schema::initialize_database;
pub use store::{Cursor, CursorItem, Record, RecordStore, Snapshot, WriteTxn};

use crate::config::{SETTINGS, SETTINGS_KEY};
use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Build connection options shared by every connection to one file.
fn connect_options(db_path: &Path) -> std::result::Result<SqliteConnectOptions, sqlx::Error> {
    SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display())).map(
        |opts| {
            opts.create_if_missing(true)
                .busy_timeout(Duration::from_secs(5))
                .journal_mode(SqliteJournalMode::Wal)
                .foreign_keys(true)
        },
    )
}

/// Create a connection pool over a database file.
///
/// Migrations run on a dedicated single-connection pool that is closed
/// before the application pool is created, so no pooled connection caches
/// a pre-migration schema.
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool> {
    tracing::info!("Creating database connection pool at: {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let migration_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options(db_path)?)
        .await?;

    initialize_database(&migration_pool).await?;
    migration_pool.close().await;

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options(db_path)?)
        .await?;

    tracing::info!("Database pool created successfully");

    Ok(pool)
}

/// A private in-memory database.
///
/// Every connection to `sqlite::memory:` is its own database, so the pool
/// keeps exactly one connection alive for its whole life.
pub async fn create_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open the journal's collections over `pool`.
///
/// On the open that creates the settings collection, the default settings
/// record is written so it is never read back partially specified.
pub async fn open_journal_store(pool: SqlitePool) -> Result<RecordStore> {
    let store = RecordStore::open(pool, journal_catalog()).await?;

    if store.newly_created(SETTINGS) {
        let defaults = serde_json::to_value(Settings::default())?;
        store.put(SETTINGS, Some(SETTINGS_KEY), &defaults).await?;
        tracing::info!("Wrote default settings");
    }

    Ok(store)
}
