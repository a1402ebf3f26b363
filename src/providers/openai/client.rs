use super::types::{
    ContentPart, OpenAIInputItem, OpenAITool, ResponseItem, ResponsesRequest, ResponsesResponse,
    ResponsesStreamEvent, TextConfig, TextFormat,
};
use crate::classify::{StructuredError, TransportFailure};
use crate::extract;
use crate::provider::LLMProvider;
use crate::response::OutputItem;
use crate::types::{FinishReason, FunctionCall, InputItem, OutputItemInfo, Role, ToolChoice, Usage};
use crate::{CompleteResponse, Error, LLMRequest, Response, StreamEvent};
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// How a Responses API endpoint authenticates.
#[derive(Debug, Clone)]
pub(crate) enum Credential {
    Bearer(String),
    /// Azure's `api-key` header.
    ApiKey(String),
}

/// The Responses API wire protocol, shared by OpenAI and Azure OpenAI.
#[derive(Debug, Clone)]
pub(crate) struct ResponsesClient {
    name: &'static str,
    client: Client,
    url: String,
    query: Vec<(String, String)>,
    credential: Credential,
    /// Whether `text.verbosity` is honored by this deployment.
    verbosity: bool,
}

impl ResponsesClient {
    pub(crate) fn new(
        name: &'static str,
        url: String,
        credential: Credential,
        verbosity: bool,
    ) -> Result<Self, Error> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;

        Ok(Self {
            name,
            client,
            url,
            query: Vec::new(),
            credential,
            verbosity,
        })
    }

    pub(crate) fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Convert internal request to OpenAI Responses API format.
    pub(crate) fn convert_request(&self, request: &LLMRequest, stream: bool) -> ResponsesRequest {
        let tools = request.tools.as_deref().map(convert_tools);
        let tool_choice = tools.as_ref().map(|_| match request.tool_choice {
            ToolChoice::Auto => "auto".to_string(),
            ToolChoice::None => "none".to_string(),
        });

        let text = TextConfig {
            verbosity: self
                .verbosity
                .then(|| request.verbosity.as_str().to_string()),
            format: request.response_format.as_ref().map(|format| TextFormat {
                r#type: "json_schema".to_string(),
                name: format.name.clone(),
                schema: strict_schema(format.schema.clone()),
                strict: true,
            }),
        };

        ResponsesRequest {
            model: request.model.clone(),
            input: request.messages.iter().map(convert_item).collect(),
            temperature: request.temperature,
            max_output_tokens: request.max_tokens,
            parallel_tool_calls: tools.as_ref().map(|_| true),
            tools,
            tool_choice,
            text,
            stream: stream.then_some(true),
            store: Some(false),
        }
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = match &self.credential {
            Credential::Bearer(key) => builder.header("Authorization", format!("Bearer {key}")),
            Credential::ApiKey(key) => builder.header("api-key", key),
        };
        if self.query.is_empty() {
            builder
        } else {
            builder.query(&self.query)
        }
    }

    async fn send(&self, body: &ResponsesRequest) -> Result<reqwest::Response, Error> {
        let response = self
            .authorize(self.client.post(&self.url))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(provider = self.name, error = %e, "upstream request failed");
                Error::transport(self.name, TransportFailure::from(&e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(provider = self.name, status = status.as_u16(), "upstream returned an error status");
            return Err(Error::transport(
                self.name,
                TransportFailure::from_response(status.as_u16(), &error_text),
            ));
        }

        Ok(response)
    }

    pub(crate) async fn complete(&self, request: &LLMRequest) -> Result<CompleteResponse, Error> {
        let response = self.send(&self.convert_request(request, false)).await?;
        let body: Value = response.json().await?;
        convert_reply(self.name, body)
    }

    pub(crate) async fn generate(&self, request: &LLMRequest) -> Result<Response, Error> {
        let response = self.send(&self.convert_request(request, true)).await?;
        let provider = self.name;

        use crate::sse_stream::SseStreamExt;
        let event_stream = response
            .bytes_stream()
            .sse_events()
            .filter_map(move |sse_result| async move {
                match sse_result {
                    Ok(sse_event) if sse_event.is_done() => None,
                    Ok(sse_event) => match serde_json::from_str::<ResponsesStreamEvent>(&sse_event.data) {
                        Ok(event) => Some(convert_stream_event(event).into_iter().map(Ok).collect::<Vec<_>>()),
                        Err(e) => {
                            tracing::debug!(provider, error = %e, "skipping unparseable stream event");
                            None
                        }
                    },
                    Err(e) => Some(vec![Err(e)]),
                }
            })
            .flat_map(futures_util::stream::iter);

        Ok(Response::from_stream(event_stream))
    }
}

/// Convert a transcript item to OpenAI format.
fn convert_item(item: &InputItem) -> OpenAIInputItem {
    match item {
        InputItem::Message(msg) => {
            let (role, assistant) = match msg.role {
                Role::System => ("system", false),
                Role::User | Role::Tool => ("user", false),
                Role::Assistant => ("assistant", true),
            };

            let mut content = Vec::with_capacity(1 + msg.files.len());
            if !msg.content.is_empty() || msg.files.is_empty() {
                let text = msg.content.clone();
                content.push(if assistant {
                    ContentPart::OutputText { text }
                } else {
                    ContentPart::InputText { text }
                });
            }
            content.extend(msg.files.iter().map(|file| ContentPart::InputFile {
                file_id: file.id.clone(),
            }));

            OpenAIInputItem::Message {
                role: role.to_string(),
                content,
            }
        }
        InputItem::FunctionCall(call) => OpenAIInputItem::FunctionCall {
            call_id: call.call_id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        },
        InputItem::FunctionCallOutput { call_id, output, .. } => OpenAIInputItem::FunctionCallOutput {
            call_id: call_id.clone(),
            output: output.clone(),
        },
    }
}

fn convert_tools(tools: &[crate::types::Tool]) -> Vec<OpenAITool> {
    tools
        .iter()
        .map(|tool| OpenAITool {
            r#type: "function".to_string(),
            name: tool.function.name.clone(),
            description: tool.function.description.clone(),
            parameters: close_object_schemas(tool.function.parameters.clone()),
        })
        .collect()
}

/// Set `additionalProperties: false` on every object schema that leaves it open.
pub(crate) fn close_object_schemas(mut schema: Value) -> Value {
    close_in_place(&mut schema, false);
    schema
}

/// Close every object schema and list all of its properties as required.
///
/// Strict structured output rejects object schemas with optional properties.
pub(crate) fn strict_schema(mut schema: Value) -> Value {
    close_in_place(&mut schema, true);
    schema
}

fn close_in_place(schema: &mut Value, require_all: bool) {
    match schema {
        Value::Object(map) => {
            let is_object = map.get("type").and_then(Value::as_str) == Some("object")
                || map.contains_key("properties");
            if is_object && !map.contains_key("additionalProperties") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }
            if is_object && require_all {
                require_all_properties(map);
            }
            for key in ["properties", "$defs", "definitions"] {
                if let Some(Value::Object(children)) = map.get_mut(key) {
                    children
                        .values_mut()
                        .for_each(|child| close_in_place(child, require_all));
                }
            }
            for key in ["items", "anyOf", "oneOf", "allOf"] {
                if let Some(child) = map.get_mut(key) {
                    close_in_place(child, require_all);
                }
            }
        }
        Value::Array(items) => items
            .iter_mut()
            .for_each(|item| close_in_place(item, require_all)),
        _ => {}
    }
}

fn require_all_properties(map: &mut serde_json::Map<String, Value>) {
    let Some(Value::Object(properties)) = map.get("properties") else {
        return;
    };
    let mut required: Vec<Value> = match map.get("required") {
        Some(Value::Array(listed)) => listed.clone(),
        _ => Vec::new(),
    };
    for key in properties.keys() {
        if !required.iter().any(|listed| listed.as_str() == Some(key)) {
            required.push(Value::String(key.clone()));
        }
    }
    map.insert("required".to_string(), Value::Array(required));
}

/// A 200 reply the provider refused to complete.
fn refusal(reply: &ResponsesResponse) -> Option<TransportFailure> {
    match reply.status.as_deref() {
        Some("incomplete") => {
            let reason = reply.incomplete_details.as_ref()?.reason.as_deref()?;
            (reason == "content_filter").then(|| {
                TransportFailure::new(
                    None,
                    Some(StructuredError::new("content_filter", "response blocked by content filter")),
                    "response blocked by content filter",
                )
            })
        }
        Some("failed") => {
            let error = reply.error.clone().unwrap_or(Value::Null);
            let structured = StructuredError::from_body(&serde_json::json!({ "error": error }).to_string());
            let message = structured
                .as_ref()
                .map(|s| s.message.clone())
                .unwrap_or_else(|| "response failed".to_string());
            Some(TransportFailure::new(None, structured, message))
        }
        _ => None,
    }
}

/// Convert a buffered Responses API body into a complete response.
pub(crate) fn convert_reply(provider: &'static str, body: Value) -> Result<CompleteResponse, Error> {
    let reply: ResponsesResponse = serde_json::from_value(body.clone())?;
    if let Some(failure) = refusal(&reply) {
        return Err(Error::transport(provider, failure));
    }

    let mut output = Vec::new();
    for item in &reply.output {
        match item.get("type").and_then(Value::as_str) {
            Some("function_call") => {
                let item: ResponseItem = serde_json::from_value(item.clone())?;
                if let Some(call) = function_call(item) {
                    output.push(OutputItem::FunctionCall { call });
                }
            }
            Some("message") => {
                if let Some(content) = message_text(item) {
                    output.push(OutputItem::Text { content });
                }
            }
            _ => {}
        }
    }

    if output.is_empty() {
        if let Some(content) = extract::reply_text(&body) {
            output.push(OutputItem::Text { content });
        }
    }

    let finish_reason = if output.iter().any(|o| matches!(o, OutputItem::FunctionCall { .. })) {
        FinishReason::ToolCalls
    } else if reply.status.as_deref() == Some("incomplete") {
        FinishReason::Length
    } else {
        FinishReason::Stop
    };

    Ok(CompleteResponse {
        output,
        finish_reason,
        usage: reply.usage.map(Usage::from).unwrap_or_default(),
    })
}

/// Concatenated `output_text` parts of a message item.
fn message_text(item: &Value) -> Option<String> {
    let text: String = item
        .get("content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|part| part.get("type").and_then(Value::as_str) == Some("output_text"))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        extract::item_text(item)
    } else {
        Some(text)
    }
}

fn function_call(item: ResponseItem) -> Option<FunctionCall> {
    let name = item.name?;
    Some(FunctionCall {
        call_id: item.call_id.unwrap_or_else(|| item.id.clone()),
        id: item.id,
        name,
        arguments: item.arguments.unwrap_or_default(),
    })
}

/// Convert an OpenAI streaming event to our StreamEvents.
pub(crate) fn convert_stream_event(event: ResponsesStreamEvent) -> Vec<StreamEvent> {
    match event.r#type.as_str() {
        "response.output_text.delta" => match event.delta {
            Some(delta) if !delta.is_empty() => vec![StreamEvent::ContentDelta { delta }],
            _ => vec![],
        },
        "response.output_item.added" => match event.item {
            Some(item) if item.r#type == "function_call" => vec![StreamEvent::OutputItemAdded {
                item: OutputItemInfo::FunctionCall {
                    name: item.name.unwrap_or_default(),
                    id: item.id,
                },
            }],
            Some(item) if item.r#type == "message" => vec![StreamEvent::OutputItemAdded {
                item: OutputItemInfo::Text,
            }],
            _ => vec![],
        },
        // Complete calls arrive with output_item.done; argument deltas are not surfaced
        "response.output_item.done" => match event.item {
            Some(item) if item.r#type == "function_call" => function_call(item)
                .map(|call| vec![StreamEvent::FunctionCallComplete { call }])
                .unwrap_or_default(),
            _ => vec![],
        },
        "response.completed" | "response.incomplete" => {
            let response = event.response.unwrap_or_default();
            if let Some(failure) = refusal(&response) {
                return vec![StreamEvent::Error {
                    error: failure.message,
                }];
            }
            let finish_reason = if response
                .output
                .iter()
                .any(|o| o.get("type").and_then(Value::as_str) == Some("function_call"))
            {
                FinishReason::ToolCalls
            } else if event.r#type == "response.incomplete" {
                FinishReason::Length
            } else {
                FinishReason::Stop
            };
            vec![StreamEvent::Done {
                finish_reason,
                usage: response.usage.map(Usage::from).unwrap_or_default(),
            }]
        }
        "response.failed" => {
            let response = event.response.unwrap_or_default();
            let error = refusal(&response)
                .map(|failure| failure.message)
                .unwrap_or_else(|| "response failed".to_string());
            vec![StreamEvent::Error { error }]
        }
        "error" => vec![StreamEvent::Error {
            error: event
                .message
                .or(event.code)
                .unwrap_or_else(|| "stream error".to_string()),
        }],
        _ => vec![],
    }
}

/// OpenAI provider implementation.
#[derive(Debug, Clone)]
pub struct OpenAIProvider {
    inner: ResponsesClient,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider.
    pub fn new(api_key: String) -> Result<Self, Error> {
        Self::new_with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    /// Create a new OpenAI provider with custom base URL.
    pub fn new_with_base_url(api_key: String, base_url: String) -> Result<Self, Error> {
        let url = format!("{}/responses", base_url.trim_end_matches('/'));
        Ok(Self {
            inner: ResponsesClient::new("OpenAI", url, Credential::Bearer(api_key), true)?,
        })
    }

    pub(crate) fn convert_request(&self, request: &LLMRequest, stream: bool) -> ResponsesRequest {
        self.inner.convert_request(request, stream)
    }
}

#[async_trait::async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn complete(&self, request: &LLMRequest) -> Result<CompleteResponse, Error> {
        self.inner.complete(request).await
    }

    async fn generate(&self, request: &LLMRequest) -> Result<Response, Error> {
        self.inner.generate(request).await
    }
}
