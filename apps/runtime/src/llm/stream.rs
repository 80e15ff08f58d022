// Server-sent event decoding for streamed completions
//
// The response body is split into lines; `data: {json}` lines become chunks,
// `data: [DONE]` ends the stream, anything else is ignored. A data line that
// does not parse is skipped with a warning instead of failing the stream.
// Dropping the stream drops the body reader with it.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use tracing::warn;

use super::errors::{ApiClientError, ApiResult};
use super::types::ChatCompletionChunk;

/// Lazy, finite sequence of completion chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = ApiResult<ChatCompletionChunk>> + Send>>;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug)]
enum EventLine {
    Chunk(ChatCompletionChunk),
    Done,
    Ignored,
}

fn parse_event_line(line: &str) -> EventLine {
    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
        return EventLine::Ignored;
    };
    let data = data.trim();
    if data == DONE_SENTINEL {
        return EventLine::Done;
    }
    if data.is_empty() {
        return EventLine::Ignored;
    }

    match serde_json::from_str(data) {
        Ok(chunk) => EventLine::Chunk(chunk),
        Err(e) => {
            warn!(error = %e, line = %data, "skipping unparsable stream line");
            EventLine::Ignored
        }
    }
}

/// Accumulates raw bytes and hands back complete lines
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(decode_line(&raw));
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.pending);
        Some(decode_line(&raw))
    }
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(&['\n', '\r'][..])
        .to_string()
}

/// Turn a raw event-stream body into a [`ChunkStream`]
pub fn decode_event_stream<S, E>(body: S) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ApiClientError> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buffer = LineBuffer::default();

        while let Some(next) = body.next().await {
            let bytes = match next {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(e.into());
                    return;
                }
            };
            for line in buffer.push(&bytes) {
                match parse_event_line(&line) {
                    EventLine::Chunk(chunk) => yield Ok(chunk),
                    EventLine::Done => return,
                    EventLine::Ignored => {}
                }
            }
        }

        if let Some(line) = buffer.finish() {
            if let EventLine::Chunk(chunk) = parse_event_line(&line) {
                yield Ok(chunk);
            }
        }
    })
}
