//! In-process source fed through a tokio channel

use super::{MessageSource, SourceMessage};
use crate::error::SourceError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Sending half; send `Err` to simulate a transport failure
pub type ChannelSender = mpsc::Sender<Result<SourceMessage, SourceError>>;

/// Source that ends when every sender is dropped
pub struct ChannelSource {
    receiver: mpsc::Receiver<Result<SourceMessage, SourceError>>,
}

/// Create a bounded channel source
pub fn channel_source(capacity: usize) -> (ChannelSender, ChannelSource) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (sender, ChannelSource { receiver })
}

#[async_trait]
impl MessageSource for ChannelSource {
    fn describe(&self) -> String {
        "channel".to_string()
    }

    async fn next_message(&mut self) -> Result<Option<SourceMessage>, SourceError> {
        match self.receiver.recv().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}
