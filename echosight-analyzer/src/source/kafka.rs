//! Kafka consumer-group source

use super::{MessageSource, SourceMessage};
use crate::error::SourceError;
use async_trait::async_trait;
use echosight_common::config::KafkaConfig;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use tracing::info;

/// Subscribes to the input topic. Offsets are auto-committed as messages are
/// consumed, independent of whether they were persisted.
pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
    broker: String,
}

impl KafkaSource {
    pub fn connect(config: &KafkaConfig) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.broker)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .set("enable.partition.eof", "false")
            .create()?;

        consumer.subscribe(&[config.input_topic.as_str()])?;
        info!(
            "Subscribed to '{}' on {} as group '{}'",
            config.input_topic, config.broker, config.group_id
        );

        Ok(Self {
            consumer,
            topic: config.input_topic.clone(),
            broker: config.broker.clone(),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    fn describe(&self) -> String {
        format!("kafka://{}/{}", self.broker, self.topic)
    }

    async fn next_message(&mut self) -> Result<Option<SourceMessage>, SourceError> {
        let message = self.consumer.recv().await?;

        Ok(Some(SourceMessage {
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            // Tombstones arrive with no payload and fail decoding downstream
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }))
    }
}
