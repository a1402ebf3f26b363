use serde::{Deserialize, Serialize};

/// An item in a conversation transcript (mirrors OutputItem).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputItem {
    /// A message with role and content
    Message(Message),
    /// A function call requested by the model
    FunctionCall(FunctionCall),
    /// Output of a function call, correlated by `call_id`
    FunctionCallOutput {
        call_id: String,
        name: String,
        output: String,
    },
}

/// A reference to an uploaded attachment.
///
/// Produced by an attachment store; the driver only passes it through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReference {
    /// Provider file id (OpenAI / Azure `file_id`).
    pub id: String,
    /// File URI (Gemini `fileData.fileUri`).
    pub uri: Option<String>,
    pub mime_type: Option<String>,
}

impl FileReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: None,
            mime_type: None,
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>, mime_type: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// A message with role and content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileReference>,
}

impl InputItem {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        InputItem::Message(Message::system(content))
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        InputItem::Message(Message::user(content))
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        InputItem::Message(Message::assistant(content))
    }

    /// Create a function call item.
    pub fn function_call(call: FunctionCall) -> Self {
        InputItem::FunctionCall(call)
    }

    /// Create a function call output item.
    pub fn function_call_output(
        call_id: impl Into<String>,
        name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        InputItem::FunctionCallOutput {
            call_id: call_id.into(),
            name: name.into(),
            output: output.into(),
        }
    }

    /// Get the role of this item. Function calls and their outputs belong to the tool role.
    pub fn role(&self) -> Role {
        match self {
            InputItem::Message(msg) => msg.role,
            InputItem::FunctionCall(_) | InputItem::FunctionCallOutput { .. } => Role::Tool,
        }
    }

    /// Get the text content of this item (if any).
    pub fn content(&self) -> Option<&str> {
        match self {
            InputItem::Message(msg) => msg.content(),
            InputItem::FunctionCallOutput { output, .. } => Some(output),
            InputItem::FunctionCall(_) => None,
        }
    }

    /// Get the function call from this item (if any).
    pub fn get_function_call(&self) -> Option<&FunctionCall> {
        match self {
            InputItem::FunctionCall(call) => Some(call),
            _ => None,
        }
    }

    /// Get the function call ID from this item (if any).
    pub fn function_call_id(&self) -> Option<&str> {
        match self {
            InputItem::FunctionCall(call) => Some(&call.call_id),
            InputItem::FunctionCallOutput { call_id, .. } => Some(call_id),
            InputItem::Message(_) => None,
        }
    }
}

impl Message {
    /// Create a new message with role and text content.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Message {
            role,
            content: content.into(),
            files: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Attach files to this message.
    pub fn with_files(mut self, files: impl IntoIterator<Item = FileReference>) -> Self {
        self.files.extend(files);
        self
    }

    /// Get the text content of this message (if any).
    pub fn content(&self) -> Option<&str> {
        if self.content.is_empty() {
            None
        } else {
            Some(&self.content)
        }
    }
}

/// Role of a transcript participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Tool definition for function calling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub r#type: ToolType,
    pub function: Function,
}

impl Tool {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Tool {
            r#type: ToolType::Function,
            function: Function {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Type of tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    Function,
}

/// Function definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value, // JSON Schema
}

/// A function call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub call_id: String, // The call_id used for function results
    pub name: String,
    pub arguments: String, // JSON string
}

/// Reason why generation finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}
