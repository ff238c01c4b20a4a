//! Persistence Writer
//!
//! One transaction per record. The transaction is committed on success and
//! rolled back on any failure; the connection always goes back to the pool.

use crate::error::PersistError;
use async_trait::async_trait;
use echosight_common::db::SENTIMENT_HISTORY_TABLE;
use echosight_common::EnrichedRecord;
use sqlx::SqlitePool;
use tracing::{debug, warn};

/// Destination for enriched records
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Store one record and return its row id
    async fn persist(&self, record: &EnrichedRecord) -> Result<i64, PersistError>;
}

/// Writes records into `sentiment_history`
#[derive(Clone)]
pub struct MentionWriter {
    pool: SqlitePool,
}

impl MentionWriter {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RecordSink for MentionWriter {
    async fn persist(&self, record: &EnrichedRecord) -> Result<i64, PersistError> {
        let entities = record
            .entities_json()
            .map_err(|source| PersistError::Encode {
                column: "entities",
                source,
            })?;
        let media_meta = record
            .media_meta_json()
            .map_err(|source| PersistError::Encode {
                column: "media_meta",
                source,
            })?;

        let sql = format!(
            "INSERT INTO {} (source_id, platform, content, author, sentiment_score, timestamp, \
             author_followers, impact_score, entities, media_meta) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            SENTIMENT_HISTORY_TABLE
        );

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(&sql)
            .bind(&record.source_id)
            .bind(&record.platform)
            .bind(&record.content)
            .bind(&record.author)
            .bind(record.sentiment_score)
            .bind(record.timestamp)
            .bind(record.author_followers)
            .bind(record.impact_score)
            .bind(&entities)
            .bind(&media_meta)
            .execute(&mut *tx)
            .await;

        match result {
            Ok(done) => {
                tx.commit().await?;
                let id = done.last_insert_rowid();
                debug!(id, platform = %record.platform, "Persisted mention");
                Ok(id)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback after failed insert also failed: {}", rollback);
                }
                Err(e.into())
            }
        }
    }
}
