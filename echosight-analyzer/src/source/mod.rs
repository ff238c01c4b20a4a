//! Message sources
//!
//! A source yields raw message bodies in order. Transport failures surface as
//! [`SourceError`] and end the current consumer run; the supervisor decides
//! whether to start another.

mod channel;
#[cfg(feature = "kafka")]
mod kafka;
mod lines;

pub use channel::{channel_source, ChannelSender, ChannelSource};
#[cfg(feature = "kafka")]
pub use kafka::KafkaSource;
pub use lines::LineSource;

use crate::error::SourceError;
use async_trait::async_trait;

/// One message as delivered by a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl SourceMessage {
    /// Message without a key on partition 0
    pub fn new(offset: i64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            partition: 0,
            offset,
            key: None,
            payload: payload.into(),
        }
    }
}

#[async_trait]
pub trait MessageSource: Send {
    /// Human-readable origin for logs
    fn describe(&self) -> String;

    /// Next message, or `None` once the source is exhausted
    ///
    /// Must be safe to drop mid-await; the consumer races it against
    /// cancellation.
    async fn next_message(&mut self) -> Result<Option<SourceMessage>, SourceError>;
}
