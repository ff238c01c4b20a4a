//! Newline-delimited JSON source

use super::{MessageSource, SourceMessage};
use crate::error::SourceError;
use async_trait::async_trait;
use echosight_common::mention::MAX_PAYLOAD_BYTES;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tracing::warn;

/// One message per non-blank line; the offset is the line number
///
/// At most `max_line_bytes + 1` bytes of a line are buffered. The rest of an
/// oversized line is discarded, and the kept prefix is delivered so that it
/// fails decoding as too large.
pub struct LineSource<R> {
    reader: R,
    name: String,
    line_number: i64,
    max_line_bytes: usize,
    buf: Vec<u8>,
}

impl LineSource<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), "stdin")
    }
}

impl<R> LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            name: name.into(),
            line_number: 0,
            max_line_bytes: MAX_PAYLOAD_BYTES,
            buf: Vec::new(),
        }
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes;
        self
    }

    /// Read one line into `buf`, keeping at most `max_line_bytes + 1` bytes
    ///
    /// Returns the full line length including the newline; 0 means EOF.
    async fn read_capped_line(&mut self) -> Result<usize, SourceError> {
        let keep = self.max_line_bytes.saturating_add(1);
        let mut total = 0;

        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(total);
            }

            let (len, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            };
            let room = keep.saturating_sub(self.buf.len()).min(len);
            self.buf.extend_from_slice(&available[..room]);

            self.reader.consume(len);
            total += len;
            if complete {
                return Ok(total);
            }
        }
    }
}

#[async_trait]
impl<R> MessageSource for LineSource<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    fn describe(&self) -> String {
        self.name.clone()
    }

    async fn next_message(&mut self) -> Result<Option<SourceMessage>, SourceError> {
        loop {
            self.buf.clear();
            let read = self.read_capped_line().await?;
            if read == 0 {
                return Ok(None);
            }
            self.line_number += 1;

            if self.buf.len() > self.max_line_bytes {
                warn!(
                    line = self.line_number,
                    size = read,
                    limit = self.max_line_bytes,
                    "Line exceeds size limit, truncated"
                );
                return Ok(Some(SourceMessage::new(self.line_number, self.buf.clone())));
            }

            // Raw bytes are kept so invalid UTF-8 reaches the decoder
            let line = self.buf.trim_ascii();
            if line.is_empty() {
                continue;
            }
            return Ok(Some(SourceMessage::new(self.line_number, line.to_vec())));
        }
    }
}
