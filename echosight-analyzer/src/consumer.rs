//! Ingestion Consumer
//!
//! Pulls messages from a [`MessageSource`] and runs each through
//! decode -> enrich -> persist. A failure in any step skips that message only;
//! the loop ends on cancellation, source exhaustion, or a source error.

use crate::dead_letter::{DeadLetterSink, DiscardDeadLetters};
use crate::enrichment::Enricher;
use crate::error::{FailureKind, PipelineError, SourceError};
use crate::persistence::RecordSink;
use crate::source::{MessageSource, SourceMessage};
use chrono::Utc;
use echosight_common::{EnrichedRecord, MentionEvent};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Message counters shared with the liveness endpoint
#[derive(Debug, Default)]
pub struct ConsumerStats {
    received: AtomicU64,
    persisted: AtomicU64,
    skipped_decode: AtomicU64,
    skipped_enrichment: AtomicU64,
    skipped_persistence: AtomicU64,
    last_error: RwLock<Option<String>>,
}

/// Point-in-time copy of [`ConsumerStats`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub persisted: u64,
    pub skipped: u64,
    pub skipped_decode: u64,
    pub skipped_enrichment: u64,
    pub skipped_persistence: u64,
    pub last_error: Option<String>,
}

impl ConsumerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }

    pub async fn snapshot(&self) -> StatsSnapshot {
        let skipped_decode = self.skipped_decode.load(Ordering::Relaxed);
        let skipped_enrichment = self.skipped_enrichment.load(Ordering::Relaxed);
        let skipped_persistence = self.skipped_persistence.load(Ordering::Relaxed);

        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            persisted: self.persisted(),
            skipped: skipped_decode + skipped_enrichment + skipped_persistence,
            skipped_decode,
            skipped_enrichment,
            skipped_persistence,
            last_error: self.last_error.read().await.clone(),
        }
    }

    fn count_skip(&self, kind: FailureKind) {
        let counter = match kind {
            FailureKind::Decode => &self.skipped_decode,
            FailureKind::Enrichment => &self.skipped_enrichment,
            FailureKind::Persistence => &self.skipped_persistence,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Why a consumer run ended without a source error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerExit {
    Cancelled,
    SourceExhausted,
}

pub struct IngestionConsumer {
    source: Box<dyn MessageSource>,
    pipeline: Pipeline,
}

/// Per-message stages; kept apart from the source so handling a message
/// never borrows it
struct Pipeline {
    enricher: Arc<Enricher>,
    sink: Arc<dyn RecordSink>,
    dead_letters: Arc<dyn DeadLetterSink>,
    stats: Arc<ConsumerStats>,
}

impl IngestionConsumer {
    pub fn new(source: Box<dyn MessageSource>, enricher: Arc<Enricher>, sink: Arc<dyn RecordSink>) -> Self {
        Self {
            source,
            pipeline: Pipeline {
                enricher,
                sink,
                dead_letters: Arc::new(DiscardDeadLetters),
                stats: Arc::new(ConsumerStats::new()),
            },
        }
    }

    pub fn with_dead_letters(mut self, dead_letters: Arc<dyn DeadLetterSink>) -> Self {
        self.pipeline.dead_letters = dead_letters;
        self
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.pipeline.stats)
    }

    pub fn source_description(&self) -> String {
        self.source.describe()
    }

    /// Consume until cancelled, the source ends, or the source fails
    ///
    /// Cancellation is checked between messages and while waiting for the
    /// next one. A message already being processed is finished first.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<ConsumerExit, SourceError> {
        info!("Consuming from {}", self.source.describe());

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(ConsumerExit::Cancelled),
                next = self.source.next_message() => next,
            };

            match next? {
                Some(message) => self.pipeline.handle(&message).await,
                None => {
                    info!("Source {} exhausted", self.source.describe());
                    return Ok(ConsumerExit::SourceExhausted);
                }
            }
        }
    }

    /// Run one message through the pipeline and return the new row id
    pub async fn process_message(&self, message: &SourceMessage) -> Result<i64, PipelineError> {
        self.pipeline.process(message).await
    }
}

impl Pipeline {
    async fn process(&self, message: &SourceMessage) -> Result<i64, PipelineError> {
        let event = MentionEvent::decode(&message.payload)?;
        let enrichment = self.enricher.enrich(&event.content)?;
        let record = EnrichedRecord::new(event, enrichment.sentiment_score, enrichment.entities, Utc::now());
        let id = self.sink.persist(&record).await?;

        debug!(
            id,
            platform = %record.platform,
            sentiment = record.sentiment_score,
            entities = record.entities.len(),
            "Processed mention"
        );
        Ok(id)
    }

    async fn handle(&self, message: &SourceMessage) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        match self.process(message).await {
            Ok(_) => {
                self.stats.persisted.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                let kind = e.kind();
                warn!(
                    partition = message.partition,
                    offset = message.offset,
                    stage = kind.as_str(),
                    error = %e,
                    "Skipping message"
                );
                self.stats.count_skip(kind);
                self.stats.record_error(e.to_string()).await;

                if let Err(dl) = self.dead_letters.route(message, &e).await {
                    warn!(offset = message.offset, error = %dl, "Dead-letter routing failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistError;
    use crate::source::channel_source;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Collects records in memory
    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<EnrichedRecord>>,
    }

    #[async_trait]
    impl RecordSink for MemorySink {
        async fn persist(&self, record: &EnrichedRecord) -> Result<i64, PersistError> {
            let mut records = self.records.lock().unwrap();
            records.push(record.clone());
            Ok(records.len() as i64)
        }
    }

    fn consumer_with(sink: Arc<MemorySink>) -> (crate::source::ChannelSender, IngestionConsumer) {
        let (sender, source) = channel_source(16);
        let enricher = Arc::new(Enricher::from_config(
            &echosight_common::config::EntityModelSource::Builtin,
        ));
        (sender, IngestionConsumer::new(Box::new(source), enricher, sink))
    }

    #[tokio::test]
    async fn test_process_message_enriches() {
        let sink = Arc::new(MemorySink::default());
        let (_sender, consumer) = consumer_with(sink.clone());

        let message = SourceMessage::new(0, r#"{"platform":"X","content":"I love Apple in Paris"}"#);
        consumer.process_message(&message).await.unwrap();

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].sentiment_score > 0.0);
        assert_eq!(records[0].entities.len(), 2);
    }

    #[tokio::test]
    async fn test_decode_failure_is_isolated() {
        let sink = Arc::new(MemorySink::default());
        let (sender, mut consumer) = consumer_with(sink.clone());
        let stats = consumer.stats();

        sender.send(Ok(SourceMessage::new(0, "{broken"))).await.unwrap();
        sender.send(Ok(SourceMessage::new(1, r#"{"content":"fine"}"#))).await.unwrap();
        drop(sender);

        let exit = consumer.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(exit, ConsumerExit::SourceExhausted);

        let snapshot = stats.snapshot().await;
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.persisted, 1);
        assert_eq!(snapshot.skipped_decode, 1);
        assert!(snapshot.last_error.unwrap().starts_with("decode failed"));
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let sink = Arc::new(MemorySink::default());
        let (sender, mut consumer) = consumer_with(sink.clone());
        sender.send(Ok(SourceMessage::new(0, r#"{"content":"x"}"#))).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(consumer.run(&cancel).await.unwrap(), ConsumerExit::Cancelled);
        assert!(sink.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_source_error_ends_run() {
        let sink = Arc::new(MemorySink::default());
        let (sender, mut consumer) = consumer_with(sink);
        sender
            .send(Err(SourceError::Transport("broker went away".to_string())))
            .await
            .unwrap();

        let err = consumer.run(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SourceError::Transport(_)));
    }
}
