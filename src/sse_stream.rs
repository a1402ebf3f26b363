//! Server-Sent Events framing over a byte stream.

use crate::Error;
use futures_util::{Stream, StreamExt};
use memchr::memmem;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

/// Largest amount of unframed data tolerated before the stream is abandoned.
const MAX_BUFFERED_BYTES: usize = 1_000_000;

/// A Server-Sent Events (SSE) event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            event_type: None,
            data: data.into(),
            id: None,
        }
    }

    /// The `[DONE]` terminator used by OpenAI-style streams.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }

    /// Parse one event block (the text between two blank lines).
    fn parse(block: &str) -> Option<Self> {
        let mut event_type = None;
        let mut id = None;
        let mut data = Vec::new();

        for line in block.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with(':') {
                continue;
            }

            let (field, value) = line.split_once(':').unwrap_or((line, ""));
            let value = value.strip_prefix(' ').unwrap_or(value);

            match field {
                "event" => event_type = Some(value.to_string()),
                "data" => data.push(value),
                "id" => id = Some(value.to_string()),
                _ => {}
            }
        }

        if data.is_empty() {
            return None;
        }

        Some(Self {
            event_type,
            data: data.join("\n"),
            id,
        })
    }
}

/// Incremental SSE decoder: feed raw bytes, collect complete events.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, Error> {
        // CRLF framing is folded to LF so one separator search covers both
        for &byte in chunk {
            if byte == b'\n' && self.buffer.last() == Some(&b'\r') {
                self.buffer.pop();
            }
            self.buffer.push(byte);
        }

        if self.buffer.len() > MAX_BUFFERED_BYTES {
            self.buffer.clear();
            return Err(Error::streaming("SSE buffer exceeded maximum size"));
        }

        let mut events = Vec::new();
        let mut consumed = 0;
        let finder = memmem::Finder::new(b"\n\n");

        while let Some(pos) = finder.find(&self.buffer[consumed..]) {
            let end = consumed + pos;
            let block = std::str::from_utf8(&self.buffer[consumed..end])
                .map_err(|e| Error::streaming(format!("Invalid UTF-8 in SSE event: {e}")))?;
            events.extend(SseEvent::parse(block));
            consumed = end + 2;
        }

        self.buffer.drain(..consumed);
        Ok(events)
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        let text = std::str::from_utf8(&rest).ok()?;
        SseEvent::parse(text.trim())
    }
}

/// A stream adapter that parses SSE events from a byte stream.
pub struct SseStream<S> {
    inner: S,
    decoder: SseDecoder,
    pending: VecDeque<SseEvent>,
    finished: bool,
}

impl<S> SseStream<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for SseStream<S>
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<SseEvent, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match ready!(self.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => match self.decoder.feed(&chunk) {
                    Ok(events) => self.pending.extend(events),
                    Err(e) => {
                        self.finished = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Some(Err(e)) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(Error::streaming(format!("Stream error: {e}")))));
                }
                None => {
                    self.finished = true;
                    let tail = self.decoder.finish();
                    self.pending.extend(tail);
                }
            }
        }
    }
}

/// Extension trait to add SSE parsing to byte streams.
pub trait SseStreamExt: Stream + Sized {
    fn sse_events(self) -> SseStream<Self> {
        SseStream::new(self)
    }
}

impl<S: Stream> SseStreamExt for S {}
