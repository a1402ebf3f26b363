use super::message::{InputItem, Message};

/// An append-only conversation transcript.
///
/// Items can be added but never modified or removed once appended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    items: Vec<InputItem>,
}

impl Prompt {
    /// Create a new empty prompt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a prompt with a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new().with_system(content)
    }

    /// Create a prompt with a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new().with_user(content)
    }

    /// Add a system message.
    pub fn with_system(self, content: impl Into<String>) -> Self {
        self.with_item(InputItem::system(content))
    }

    /// Add a user message.
    pub fn with_user(self, content: impl Into<String>) -> Self {
        self.with_item(InputItem::user(content))
    }

    /// Add a message (for instance one carrying file references).
    pub fn with_message(self, message: Message) -> Self {
        self.with_item(InputItem::Message(message))
    }

    /// Add an assistant message.
    pub fn with_assistant(self, content: impl Into<String>) -> Self {
        self.with_item(InputItem::assistant(content))
    }

    /// Add an input item.
    pub fn with_item(mut self, item: InputItem) -> Self {
        self.push(item);
        self
    }

    /// Add multiple input items.
    pub fn with_items(mut self, items: impl IntoIterator<Item = InputItem>) -> Self {
        self.extend(items);
        self
    }

    /// Add a response to the conversation, preserving the ordering of text and function calls.
    pub fn with_response(mut self, response: &crate::response::CompleteResponse) -> Self {
        self.extend(response.to_items());
        self
    }

    /// Append one item.
    pub fn push(&mut self, item: InputItem) {
        self.items.push(item);
    }

    /// Append several items in order.
    pub fn extend(&mut self, items: impl IntoIterator<Item = InputItem>) {
        self.items.extend(items);
    }

    /// Get the input items.
    pub fn items(&self) -> &[InputItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl From<&str> for Prompt {
    fn from(s: &str) -> Self {
        Prompt::user(s)
    }
}

impl From<String> for Prompt {
    fn from(s: String) -> Self {
        Prompt::user(s)
    }
}

impl From<InputItem> for Prompt {
    fn from(item: InputItem) -> Self {
        Prompt { items: vec![item] }
    }
}

impl From<Vec<InputItem>> for Prompt {
    fn from(items: Vec<InputItem>) -> Self {
        Prompt { items }
    }
}
