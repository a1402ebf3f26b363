use crate::types::Usage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One item of the Responses API `input` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum OpenAIInputItem {
    #[serde(rename = "message")]
    Message {
        role: String,
        content: Vec<ContentPart>,
    },
    /// A call the model made earlier, replayed so its output can be correlated.
    #[serde(rename = "function_call")]
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(rename = "function_call_output")]
    FunctionCallOutput { call_id: String, output: String },
}

/// A content part of a message.
///
/// Assistant turns replay as `output_text`; everything else is input.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    OutputText { text: String },
    InputFile { file_id: String },
}

/// OpenAI tool format for Responses API.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAITool {
    pub r#type: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The `text` block: verbosity and structured output format.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TextConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<TextFormat>,
}

impl TextConfig {
    pub fn is_empty(&self) -> bool {
        self.verbosity.is_none() && self.format.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextFormat {
    pub r#type: String, // "json_schema"
    pub name: String,
    pub schema: Value,
    pub strict: bool,
}

/// OpenAI Responses API request.
#[derive(Debug, Clone, Serialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: Vec<OpenAIInputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    #[serde(skip_serializing_if = "TextConfig::is_empty")]
    pub text: TextConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
}

/// OpenAI Responses API response. Only the fields the adapter reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Vec<Value>,
    #[serde(default)]
    pub output_text: Option<String>,
    #[serde(default)]
    pub usage: Option<ResponsesUsage>,
    #[serde(default)]
    pub incomplete_details: Option<IncompleteDetails>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncompleteDetails {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponsesUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub input_tokens_details: Option<TokenDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenDetails {
    #[serde(default)]
    pub cached_tokens: Option<u32>,
}

impl From<ResponsesUsage> for Usage {
    fn from(usage: ResponsesUsage) -> Self {
        Usage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cached_tokens: usage.input_tokens_details.and_then(|d| d.cached_tokens),
        }
    }
}

/// OpenAI streaming Responses API event.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesStreamEvent {
    pub r#type: String,
    #[serde(default)]
    pub delta: Option<String>,
    #[serde(default)]
    pub response: Option<ResponsesResponse>,
    #[serde(default)]
    pub item: Option<ResponseItem>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

/// An output item announced or completed in a streaming response.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseItem {
    #[serde(default)]
    pub id: String,
    pub r#type: String,
    #[serde(default)]
    pub arguments: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}
