//! Normalizes provider event streams into plain text fragments.

use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::accumulator::ResponseAccumulator;
use crate::response::{CompleteResponse, EventStream, Response};
use crate::types::{OutputItemInfo, StreamChunk, StreamEvent};
use crate::Error;

/// Final fragment delivered when the transport fails mid-stream.
pub const INTERRUPTION_NOTICE: &str =
    "Sorry, it looks like the response was interrupted. Please try again.";

/// A lazy, forward-only sequence of text fragments.
///
/// Mid-stream failures never surface as errors: the stream yields
/// [`INTERRUPTION_NOTICE`] as its last element and ends. Fragments delivered
/// before the failure stand.
pub struct TextStream {
    /// `None` once the sequence has ended or was closed.
    inner: Option<EventStream>,
    /// A fragment read ahead of the consumer.
    pending: Option<String>,
    provider: &'static str,
    interrupted: bool,
}

impl TextStream {
    pub fn new(provider: &'static str, response: Response) -> Self {
        Self::resume(provider, None, response.stream())
    }

    /// Continue a partly read event stream, delivering `first` before anything else.
    pub fn resume(provider: &'static str, first: Option<String>, events: EventStream) -> Self {
        Self {
            inner: Some(events),
            pending: first,
            provider,
            interrupted: false,
        }
    }

    /// Replay the text of an already buffered reply.
    pub fn from_reply(provider: &'static str, reply: &CompleteResponse) -> Self {
        let events = vec![
            Ok(StreamEvent::ContentDelta {
                delta: reply.content(),
            }),
            Ok(StreamEvent::Done {
                finish_reason: reply.finish_reason.clone(),
                usage: reply.usage.clone(),
            }),
        ];
        Self::new(provider, Response::from_stream(stream::iter(events)))
    }

    /// Stop consuming and release the underlying transport stream.
    pub fn close(&mut self) {
        self.pending = None;
        if self.inner.take().is_some() {
            tracing::debug!(provider = self.provider, "text stream closed by consumer");
        }
    }

    /// Whether the sequence ended with the interruption notice.
    pub fn was_interrupted(&self) -> bool {
        self.interrupted
    }

    /// View the sequence as chunks with explicit terminal sentinels.
    pub fn chunks(self) -> ChunkStream {
        ChunkStream {
            text: self,
            done: false,
        }
    }

    fn poll_chunk(&mut self, cx: &mut Context<'_>) -> Poll<Option<StreamChunk>> {
        if let Some(text) = self.pending.take() {
            return Poll::Ready(Some(StreamChunk::Text(text)));
        }
        loop {
            let Some(inner) = self.inner.as_mut() else {
                return Poll::Ready(None);
            };

            let failure = match inner.as_mut().poll_next(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(Ok(StreamEvent::ContentDelta { delta }))) => {
                    if delta.is_empty() {
                        continue;
                    }
                    return Poll::Ready(Some(StreamChunk::Text(delta)));
                }
                Poll::Ready(Some(Ok(StreamEvent::Done { .. }))) | Poll::Ready(None) => {
                    self.inner = None;
                    return Poll::Ready(Some(StreamChunk::Completed));
                }
                Poll::Ready(Some(Ok(StreamEvent::Error { error }))) => error,
                Poll::Ready(Some(Err(e))) => e.to_string(),
                Poll::Ready(Some(Ok(_))) => continue,
            };

            tracing::warn!(provider = self.provider, error = %failure, "stream interrupted");
            self.inner = None;
            self.interrupted = true;
            return Poll::Ready(Some(StreamChunk::Interrupted(INTERRUPTION_NOTICE.to_string())));
        }
    }
}

impl Stream for TextStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.poll_chunk(cx) {
            Poll::Ready(Some(StreamChunk::Text(text))) | Poll::Ready(Some(StreamChunk::Interrupted(text))) => {
                Poll::Ready(Some(text))
            }
            Poll::Ready(Some(StreamChunk::Completed)) | Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A [`TextStream`] viewed as [`StreamChunk`]s, ending with exactly one terminal chunk.
pub struct ChunkStream {
    text: TextStream,
    done: bool,
}

impl ChunkStream {
    pub fn close(&mut self) {
        self.text.close();
        self.done = true;
    }
}

impl Stream for ChunkStream {
    type Item = StreamChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        match this.text.poll_chunk(cx) {
            Poll::Ready(Some(chunk)) => {
                this.done = chunk.is_terminal();
                Poll::Ready(Some(chunk))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A streamed model turn, inspected until it is clear what kind of round it is.
pub enum StreamedTurn {
    /// The model is answering in text; the rest is still streaming.
    Text(TextStream),
    /// The model produced no text before the turn ended or a function call
    /// began; the whole turn is buffered.
    Complete(CompleteResponse),
}

impl StreamedTurn {
    /// Read `response` up to its first text fragment.
    ///
    /// Failures before that point are returned as errors so the caller can
    /// still retry or report them. Once text has been seen, the turn is handed
    /// over as a [`TextStream`] and later failures become the interruption
    /// notice. A turn that announces a function call first is buffered in full.
    pub async fn open(provider: &'static str, response: Response) -> Result<Self, Error> {
        let mut events = response.stream();
        let mut accumulator = ResponseAccumulator::new();
        let mut calling = false;

        while let Some(event) = events.next().await {
            match event? {
                StreamEvent::ContentDelta { delta } if !calling && !delta.is_empty() => {
                    return Ok(StreamedTurn::Text(TextStream::resume(provider, Some(delta), events)));
                }
                StreamEvent::Error { error } => return Err(Error::streaming(error)),
                event @ StreamEvent::Done { .. } => {
                    accumulator.process_event(event);
                    break;
                }
                event => {
                    calling |= matches!(
                        event,
                        StreamEvent::OutputItemAdded {
                            item: OutputItemInfo::FunctionCall { .. }
                        } | StreamEvent::FunctionCallComplete { .. }
                    );
                    accumulator.process_event(event);
                }
            }
        }

        let reply = accumulator.finalize();
        if calling {
            tracing::debug!(
                provider,
                calls = reply.function_calls().len(),
                "streamed turn requested function calls"
            );
        }
        Ok(StreamedTurn::Complete(reply))
    }

    /// The text of this turn as a stream.
    pub fn into_text_stream(self, provider: &'static str) -> TextStream {
        match self {
            StreamedTurn::Text(stream) => stream,
            StreamedTurn::Complete(reply) => TextStream::from_reply(provider, &reply),
        }
    }
}
