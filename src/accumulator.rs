//! Folds streaming events into a complete response.

use crate::types::{FinishReason, FunctionCall, OutputItemInfo, StreamEvent, Usage};
use crate::{CompleteResponse, OutputItem};

/// Accumulates streaming deltas into a complete response.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    /// Ordered output items (text, function calls)
    output_items: Vec<OutputItem>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a stream event and update the accumulation.
    pub fn process_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::ContentDelta { delta } => match self.output_items.last_mut() {
                Some(OutputItem::Text { content }) => content.push_str(&delta),
                // Providers that never announce items still deliver deltas
                _ => self.output_items.push(OutputItem::Text { content: delta }),
            },
            StreamEvent::OutputItemAdded {
                item: OutputItemInfo::Text,
            } => {
                self.output_items.push(OutputItem::Text {
                    content: String::new(),
                });
            }
            // Calls are recorded once complete
            StreamEvent::OutputItemAdded {
                item: OutputItemInfo::FunctionCall { .. },
            } => {}
            StreamEvent::FunctionCallComplete { call } => {
                let seen = self.output_items.iter().any(|item| {
                    matches!(item, OutputItem::FunctionCall { call: existing } if existing.call_id == call.call_id)
                });
                if !seen {
                    self.output_items.push(OutputItem::FunctionCall { call });
                }
            }
            StreamEvent::Done {
                finish_reason,
                usage,
            } => {
                self.finish_reason = Some(finish_reason);
                self.usage = Some(usage);
            }
            StreamEvent::Error { .. } => {}
        }
    }

    /// Finalize and return the complete response.
    pub fn finalize(self) -> CompleteResponse {
        let finish_reason = self.finish_reason.unwrap_or_else(|| {
            if self
                .output_items
                .iter()
                .any(|item| matches!(item, OutputItem::FunctionCall { .. }))
            {
                FinishReason::ToolCalls
            } else {
                FinishReason::Stop
            }
        });

        CompleteResponse {
            output: self.output_items,
            finish_reason,
            usage: self.usage.unwrap_or_default(),
        }
    }

    /// Concatenated text accumulated so far.
    pub fn current_content(&self) -> String {
        self.output_items
            .iter()
            .filter_map(|item| match item {
                OutputItem::Text { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Function calls completed so far.
    pub fn completed_function_calls(&self) -> Vec<FunctionCall> {
        self.output_items
            .iter()
            .filter_map(|item| match item {
                OutputItem::FunctionCall { call } => Some(call.clone()),
                _ => None,
            })
            .collect()
    }
}
