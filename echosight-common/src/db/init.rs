//! Store initialization
//!
//! Opens (or creates) the SQLite store, then reconciles its schema. Any error
//! here is fatal for the caller: consumption must not start against a store
//! whose row shape has not been verified.

use crate::db::reconcile::ReconcileReport;
use crate::db::table_schemas::reconcile_all_tables;
use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default number of pooled store connections
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Open the store and reconcile its schema
///
/// Creates the parent directory and the database file when missing.
pub async fn init_store(db_path: &Path, max_connections: u32) -> Result<(SqlitePool, Vec<ReconcileReport>)> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new store: {}", db_path.display());
    } else {
        info!("Opened existing store: {}", db_path.display());
    }

    let reports = reconcile_all_tables(&pool).await?;

    Ok((pool, reports))
}

/// Cheap round trip used by the liveness report
pub async fn ping(pool: &SqlitePool) -> Result<()> {
    sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await?;
    Ok(())
}
