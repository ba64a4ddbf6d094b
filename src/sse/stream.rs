//! Event framing and the pull-based `EventStream`.

use futures_util::Stream;
use futures_util::stream;
use log::debug;

use super::lines::{ByteStream, LineReader};
use super::{DEFAULT_EVENT, EventData, SseEvent};
use crate::error::ApiError;

/// Pull-based sequence of events read from one streaming connection.
///
/// Each call to [`EventStream::next_event`] reads only as many lines as it
/// takes to complete the next event. The stream cannot be rewound; once it
/// ends, fails or is closed every further call returns `Ok(None)`.
pub struct EventStream {
    lines: Option<LineReader>,
}

impl EventStream {
    pub fn from_byte_stream(source: ByteStream) -> Self {
        Self {
            lines: Some(LineReader::new(source)),
        }
    }

    /// Next event, or `None` at end of stream. A read error is returned once
    /// and closes the stream.
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>, ApiError> {
        let mut block: Vec<String> = Vec::new();

        loop {
            let Some(lines) = self.lines.as_mut() else {
                return Ok(None);
            };

            let line = match lines.next_line().await {
                Ok(line) => line,
                Err(e) => {
                    debug!("Event stream read failed: {}", e);
                    self.close();
                    return Err(e);
                }
            };

            match line {
                Some(line) if line.is_empty() => {
                    if block.is_empty() {
                        continue;
                    }
                    if let Some(event) = parse_block(&block) {
                        return Ok(Some(event));
                    }
                    block.clear();
                }
                Some(line) => block.push(line),
                None => {
                    // Tolerate a missing blank line before EOF.
                    self.close();
                    return Ok(parse_block(&block));
                }
            }
        }
    }

    /// Releases the connection. Safe to call any number of times, including
    /// before the stream was drained.
    pub fn close(&mut self) {
        if self.lines.take().is_some() {
            debug!("Event stream closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lines.is_none()
    }

    /// Adapts the stream to `futures::Stream`. The connection is released
    /// when the returned stream ends or is dropped.
    pub fn into_stream(self) -> impl Stream<Item = Result<SseEvent, ApiError>> + Send {
        stream::unfold(Some(self), |state| async move {
            let mut events = state?;
            match events.next_event().await {
                Ok(Some(event)) => Some((Ok(event), Some(events))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    /// Drains every remaining event.
    pub async fn collect_events(mut self) -> Result<Vec<SseEvent>, ApiError> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await? {
            events.push(event);
        }
        Ok(events)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Frames one blank-line-delimited block. Returns `None` when the block
/// carries no data.
pub fn parse_block(lines: &[String]) -> Option<SseEvent> {
    let mut event: Option<&str> = None;
    let mut id: Option<&str> = None;
    let mut data: Vec<&str> = Vec::new();

    for line in lines {
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);

        match field {
            "event" => event = Some(value),
            "data" => data.push(value),
            "id" => id = Some(value),
            _ => {}
        }
    }

    let text = data.join("\n");
    if text.is_empty() {
        return None;
    }

    Some(SseEvent {
        event: event
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_EVENT)
            .to_string(),
        data: EventData::parse(text),
        id: id.map(ToString::to_string),
    })
}
