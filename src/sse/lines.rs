//! Line splitting over a chunked byte source.

use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use crate::error::ApiError;

/// Chunks as they arrive from the connection.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, ApiError>>;

/// Longest line accepted before the stream is treated as broken.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Yields `\n`-terminated lines (a trailing `\r` is stripped). Reads from the
/// source only when no complete line is buffered, and never buffers more than
/// `max_line` bytes of an unterminated line.
pub(crate) struct LineReader {
    source: ByteStream,
    buffer: Vec<u8>,
    max_line: usize,
    eof: bool,
}

impl LineReader {
    pub(crate) fn new(source: ByteStream) -> Self {
        Self::with_max_line(source, MAX_LINE_BYTES)
    }

    pub(crate) fn with_max_line(source: ByteStream, max_line: usize) -> Self {
        Self {
            source,
            buffer: Vec::new(),
            max_line,
            eof: false,
        }
    }

    /// Next line, or `None` once the source is exhausted. A final line
    /// without a terminator is still returned.
    pub(crate) async fn next_line(&mut self) -> Result<Option<String>, ApiError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                line.pop();
                return Ok(Some(into_text(line)));
            }

            if self.eof {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.buffer);
                return Ok(Some(into_text(line)));
            }

            if self.buffer.len() > self.max_line {
                return Err(ApiError::transport_message(format!(
                    "event stream line exceeds {} bytes",
                    self.max_line
                )));
            }

            match self.source.next().await {
                Some(Ok(chunk)) => self.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e),
                None => self.eof = true,
            }
        }
    }
}

fn into_text(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    match String::from_utf8(line) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}
