//! Database schema and migrations
//!
//! Creates the generic tables every collection lives in. Collection and
//! index registration happens later in `RecordStore::open`, against the
//! catalog; migrations here are additive only.

use crate::error::{AppError, Result};
use sqlx::sqlite::{SqliteConnection, SqlitePool};

/// One numbered step of the base schema
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: include_str!("migrations/001_initial_schema.sql"),
}];

/// Highest schema version this build knows how to use
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Bring the base tables up to date.
///
/// Runs on a single connection. A database already past `latest_version`
/// is refused rather than opened by an older build.
pub async fn initialize_database(pool: &SqlitePool) -> Result<()> {
    let mut conn = pool.acquire().await?;

    // WAL lets the cursor and export snapshots read while a batch commits
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    let current = schema_version(&mut conn).await?;
    if current > latest_version() {
        return Err(AppError::SchemaTooNew {
            found: current,
            supported: latest_version(),
        });
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        tracing::debug!("Journal schema is current (version {})", current);
        return Ok(());
    }

    for migration in pending {
        apply(&mut conn, migration).await?;
    }
    Ok(())
}

async fn schema_version(conn: &mut SqliteConnection) -> Result<i64> {
    let version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM migrations")
        .fetch_one(&mut *conn)
        .await?;
    Ok(version)
}

async fn apply(conn: &mut SqliteConnection, migration: &Migration) -> Result<()> {
    tracing::info!(
        "Applying schema migration {} ({})",
        migration.version,
        migration.name
    );

    let mut tx = sqlx::Connection::begin(&mut *conn).await?;
    sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
    sqlx::query("INSERT INTO migrations (version, name) VALUES (?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(())
}
