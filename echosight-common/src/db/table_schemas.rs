//! Table Schema Declarations
//!
//! Single source of truth for the row shape of every table the services write.
//! Adding a field to the record shape means adding a column here, tagged with
//! the shape version that introduced it, and bumping [`RECORD_SHAPE_VERSION`].

use crate::db::reconcile::{ColumnDefinition, ReconcileReport, SchemaReconciler, TableSchema};
use crate::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Current version of the enriched record shape
///
/// - v1: platform, content, author, sentiment_score, timestamp
/// - v2: author_followers, impact_score, entities
/// - v3: media_meta, source_id
pub const RECORD_SHAPE_VERSION: i64 = 3;

/// Table holding one row per enriched mention
pub const SENTIMENT_HISTORY_TABLE: &str = "sentiment_history";

/// `sentiment_history` table schema
pub struct SentimentHistorySchema;

impl TableSchema for SentimentHistorySchema {
    fn table_name() -> &'static str {
        SENTIMENT_HISTORY_TABLE
    }

    fn shape_version() -> i64 {
        RECORD_SHAPE_VERSION
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER")
                .primary_key()
                .autoincrement(),

            ColumnDefinition::new("platform", "TEXT")
                .not_null()
                .default("'Unknown'"),

            ColumnDefinition::new("content", "TEXT")
                .not_null()
                .default("''"),

            ColumnDefinition::new("author", "TEXT")
                .default("'Anonymous'"),

            ColumnDefinition::new("sentiment_score", "REAL")
                .not_null()
                .check("sentiment_score BETWEEN -1.0 AND 1.0"),

            ColumnDefinition::new("timestamp", "TIMESTAMP")
                .not_null()
                .default("CURRENT_TIMESTAMP"),

            ColumnDefinition::new("author_followers", "INTEGER")
                .not_null()
                .default("0")
                .since(2),

            ColumnDefinition::new("impact_score", "REAL")
                .not_null()
                .default("0.0")
                .since(2),

            // JSON array of {"text", "label"}
            ColumnDefinition::new("entities", "TEXT")
                .not_null()
                .default("'[]'")
                .since(2),

            // JSON object of string -> string
            ColumnDefinition::new("media_meta", "TEXT")
                .not_null()
                .default("'{}'")
                .since(3),

            ColumnDefinition::new("source_id", "TEXT")
                .since(3),
        ]
    }

    fn post_create_statements() -> Vec<String> {
        vec![format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_platform ON {table}(platform)",
            table = SENTIMENT_HISTORY_TABLE
        )]
    }
}

/// Reconcile every declared table
///
/// Runs once at startup, before any message is consumed.
pub async fn reconcile_all_tables(pool: &SqlitePool) -> Result<Vec<ReconcileReport>> {
    info!("=== Schema Reconciliation (record shape v{}) ===", RECORD_SHAPE_VERSION);

    let reports = vec![SchemaReconciler::reconcile::<SentimentHistorySchema>(pool).await?];

    info!("=== Schema Reconciliation Complete ===");
    Ok(reports)
}
