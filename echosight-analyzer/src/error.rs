//! Error types for echosight-analyzer
//!
//! One enum per pipeline stage, plus [`PipelineError`] for everything that can
//! go wrong with a single message.

use echosight_common::mention::DecodeError;
use thiserror::Error;

/// Sentiment capability failure
#[derive(Debug, Error)]
pub enum EnrichmentError {
    /// Model raised an unexpected error
    #[error("sentiment model '{model}' failed: {reason}")]
    Sentiment { model: &'static str, reason: String },

    /// Model produced NaN or infinity
    #[error("sentiment model '{model}' returned a non-finite score")]
    NonFiniteScore { model: &'static str },
}

/// Entity capability failure (never fails a message)
#[derive(Debug, Error)]
pub enum EntityError {
    /// Model could not be loaded
    #[error("entity model could not be loaded: {0}")]
    Load(String),

    /// Model failed on one text
    #[error("entity model failed: {0}")]
    Extract(String),
}

/// Persistence Writer failure; the transaction has been rolled back
#[derive(Debug, Error)]
pub enum PersistError {
    /// A JSON column could not be encoded
    #[error("failed to encode column '{column}': {source}")]
    Encode {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Store rejected the write or the connection failed
    #[error("store rejected the record: {0}")]
    Store(#[from] sqlx::Error),
}

/// Message source failure, not tied to any one message
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport-level failure reported by the source
    #[error("source transport error: {0}")]
    Transport(String),

    /// Underlying reader failed
    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Kafka client error
    #[cfg(feature = "kafka")]
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),
}

/// Dead-letter routing failure
#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("dead-letter publish failed: {0}")]
    Publish(String),
}

/// Everything that can make the pipeline skip one message
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("enrichment failed: {0}")]
    Enrichment(#[from] EnrichmentError),

    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistError),
}

/// Stage at which a message was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Decode,
    Enrichment,
    Persistence,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Enrichment => "enrichment",
            Self::Persistence => "persistence",
        }
    }
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Decode(_) => FailureKind::Decode,
            Self::Enrichment(_) => FailureKind::Enrichment,
            Self::Persistence(_) => FailureKind::Persistence,
        }
    }
}
