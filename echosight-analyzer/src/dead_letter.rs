//! Dead-letter routing for skipped messages
//!
//! The default sink discards. With a dead-letter topic configured (and the
//! `kafka` feature built), the original bytes are republished with the
//! failure attached as headers.

use crate::error::{DeadLetterError, PipelineError};
use crate::source::SourceMessage;
use async_trait::async_trait;

/// Header carrying the failure message
pub const ERROR_HEADER: &str = "x-echosight-error";

/// Header carrying the failure stage (decode, enrichment, persistence)
pub const ERROR_KIND_HEADER: &str = "x-echosight-error-kind";

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn route(&self, message: &SourceMessage, error: &PipelineError) -> Result<(), DeadLetterError>;
}

/// Drops skipped messages; the consumer has already logged them
pub struct DiscardDeadLetters;

#[async_trait]
impl DeadLetterSink for DiscardDeadLetters {
    async fn route(&self, _message: &SourceMessage, _error: &PipelineError) -> Result<(), DeadLetterError> {
        Ok(())
    }
}

#[cfg(feature = "kafka")]
pub use kafka::KafkaDeadLetters;

#[cfg(feature = "kafka")]
mod kafka {
    use super::*;
    use rdkafka::config::ClientConfig;
    use rdkafka::message::{Header, OwnedHeaders};
    use rdkafka::producer::{FutureProducer, FutureRecord};
    use rdkafka::util::Timeout;
    use std::time::Duration;
    use tracing::info;

    const SEND_TIMEOUT: Duration = Duration::from_secs(5);

    /// Republishes skipped messages to a Kafka topic
    pub struct KafkaDeadLetters {
        producer: FutureProducer,
        topic: String,
    }

    impl KafkaDeadLetters {
        pub fn connect(broker: &str, topic: &str) -> Result<Self, DeadLetterError> {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", broker)
                .set("message.timeout.ms", "5000")
                .create()
                .map_err(|e| DeadLetterError::Publish(format!("producer setup failed: {}", e)))?;

            info!("Routing skipped messages to dead-letter topic '{}'", topic);
            Ok(Self {
                producer,
                topic: topic.to_string(),
            })
        }
    }

    #[async_trait]
    impl DeadLetterSink for KafkaDeadLetters {
        async fn route(&self, message: &SourceMessage, error: &PipelineError) -> Result<(), DeadLetterError> {
            let error_text = error.to_string();
            let headers = OwnedHeaders::new()
                .insert(Header {
                    key: ERROR_HEADER,
                    value: Some(error_text.as_str()),
                })
                .insert(Header {
                    key: ERROR_KIND_HEADER,
                    value: Some(error.kind().as_str()),
                });

            let mut record: FutureRecord<'_, Vec<u8>, Vec<u8>> = FutureRecord::to(&self.topic)
                .payload(&message.payload)
                .headers(headers);
            if let Some(key) = &message.key {
                record = record.key(key);
            }

            self.producer
                .send(record, Timeout::After(SEND_TIMEOUT))
                .await
                .map(|_| ())
                .map_err(|(e, _)| DeadLetterError::Publish(e.to_string()))
        }
    }
}
