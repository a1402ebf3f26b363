//! Response handling for LLM generations.

use crate::types::{FinishReason, FunctionCall, InputItem, Message, StreamEvent, Usage};
use crate::Error;
use futures_util::stream::Stream;
use std::pin::Pin;

/// A boxed stream of provider events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>;

/// A complete (buffered) response from an LLM provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CompleteResponse {
    /// Ordered sequence of output items (text, function calls)
    pub output: Vec<OutputItem>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

/// An item in the LLM response output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputItem {
    /// Text content
    Text { content: String },
    /// Function call
    FunctionCall { call: FunctionCall },
}

impl OutputItem {
    /// Text items become assistant messages, function calls become function call items.
    pub fn to_input_item(&self) -> InputItem {
        match self {
            OutputItem::Text { content } => InputItem::Message(Message::assistant(content.clone())),
            OutputItem::FunctionCall { call } => InputItem::FunctionCall(call.clone()),
        }
    }
}

impl CompleteResponse {
    /// A plain text reply.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            output: vec![OutputItem::Text {
                content: content.into(),
            }],
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
        }
    }

    /// A reply requesting the given function calls.
    pub fn function_calls_only(calls: Vec<FunctionCall>) -> Self {
        Self {
            output: calls
                .into_iter()
                .map(|call| OutputItem::FunctionCall { call })
                .collect(),
            finish_reason: FinishReason::ToolCalls,
            usage: Usage::default(),
        }
    }

    /// Get all text content concatenated together.
    pub fn content(&self) -> String {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The first text item with non-whitespace content.
    pub fn first_text(&self) -> Option<&str> {
        self.output.iter().find_map(|item| match item {
            OutputItem::Text { content } if !content.trim().is_empty() => Some(content.as_str()),
            _ => None,
        })
    }

    /// Get all function calls in order.
    pub fn function_calls(&self) -> Vec<&FunctionCall> {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::FunctionCall { call } => Some(call),
                _ => None,
            })
            .collect()
    }

    pub fn has_function_calls(&self) -> bool {
        self.output
            .iter()
            .any(|item| matches!(item, OutputItem::FunctionCall { .. }))
    }

    /// Convert this response to transcript items, preserving the ordering of text and
    /// function calls. Empty text items are skipped.
    pub fn to_items(&self) -> Vec<InputItem> {
        self.output
            .iter()
            .filter(|item| !matches!(item, OutputItem::Text { content } if content.is_empty()))
            .map(OutputItem::to_input_item)
            .collect()
    }
}

/// Response from an LLM generation that can be streamed or buffered.
pub struct Response {
    stream: EventStream,
}

impl Response {
    /// Create a new response from a stream of events.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<StreamEvent, Error>> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
        }
    }

    /// Stream the response events.
    pub fn stream(self) -> EventStream {
        self.stream
    }
}
