//! Types for streaming responses.

use crate::types::{FinishReason, FunctionCall, Usage};

/// Events that can be emitted during streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A chunk of content was received.
    ContentDelta { delta: String },
    /// A new output item was added (text or function call).
    OutputItemAdded { item: OutputItemInfo },
    /// A function call has completed with full arguments.
    FunctionCallComplete { call: FunctionCall },
    /// The stream has finished.
    Done {
        finish_reason: FinishReason,
        usage: Usage,
    },
    /// The provider reported an error inside the stream.
    Error { error: String },
}

/// Information about an output item being added.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputItemInfo {
    /// Text/message output item.
    Text,
    /// Function call output item with name and ID.
    FunctionCall { name: String, id: String },
}

/// One element of a normalized text stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// A text fragment.
    Text(String),
    /// The provider finished the reply normally.
    Completed,
    /// The transport failed mid-stream; carries the user-facing notice.
    Interrupted(String),
}

impl StreamChunk {
    /// Whether this chunk ends the sequence.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamChunk::Text(_))
    }

    /// The text a consumer displays for this chunk, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            StreamChunk::Text(text) | StreamChunk::Interrupted(text) => Some(text),
            StreamChunk::Completed => None,
        }
    }
}
