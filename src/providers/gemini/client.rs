use futures_util::StreamExt;
use ijson::IValue;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::types::*;
use crate::classify::TransportFailure;
use crate::extract;
use crate::provider::LLMProvider;
use crate::response::OutputItem;
use crate::sse_stream::SseStreamExt;
use crate::types::{
    FileReference, FinishReason, FunctionCall, InputItem, OutputItemInfo, Role, ToolChoice, Verbosity,
};
use crate::{CompleteResponse, Error, LLMRequest, Response, StreamEvent};

const PROVIDER: &str = "Gemini";
const GEMINI_API_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Finish reasons that mean the candidate was withheld by a safety system.
const BLOCKING_FINISH_REASONS: [&str; 4] = ["SAFETY", "PROHIBITED_CONTENT", "BLOCKLIST", "SPII"];

/// Authentication method for Gemini.
#[derive(Debug, Clone)]
pub enum GeminiAuth {
    /// Gemini API key (sent as `x-goog-api-key`).
    ApiKey(String),
    /// Vertex AI access token (passed as Bearer header).
    AccessToken(String),
    /// Vertex AI with Application Default Credentials.
    ApplicationDefault,
}

#[derive(Debug, Clone)]
enum Endpoint {
    GeminiApi {
        base_url: String,
    },
    Vertex {
        base_url: Option<String>,
        project_id: String,
        location: String,
    },
}

/// Gemini provider, on the Gemini API or on Vertex AI.
#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    auth: GeminiAuth,
    token_provider: Option<Arc<dyn gcp_auth::TokenProvider>>,
    endpoint: Endpoint,
}

impl std::fmt::Debug for GeminiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProvider")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl GeminiProvider {
    /// Gemini API with an API key.
    pub fn new(api_key: String) -> Result<Self, Error> {
        Self::new_with_base_url(api_key, GEMINI_API_BASE_URL.to_string())
    }

    /// Gemini API with a custom base URL (for testing).
    pub fn new_with_base_url(api_key: String, base_url: String) -> Result<Self, Error> {
        Self::build(
            GeminiAuth::ApiKey(api_key),
            None,
            Endpoint::GeminiApi { base_url },
        )
    }

    /// Vertex AI with an access token.
    pub fn vertex(project_id: String, location: String, access_token: String) -> Result<Self, Error> {
        Self::build(
            GeminiAuth::AccessToken(access_token),
            None,
            Endpoint::Vertex {
                base_url: None,
                project_id,
                location,
            },
        )
    }

    /// Vertex AI with an access token and a custom base URL (for testing).
    pub fn vertex_with_base_url(
        project_id: String,
        location: String,
        access_token: String,
        base_url: String,
    ) -> Result<Self, Error> {
        Self::build(
            GeminiAuth::AccessToken(access_token),
            None,
            Endpoint::Vertex {
                base_url: Some(base_url),
                project_id,
                location,
            },
        )
    }

    /// Vertex AI with Application Default Credentials.
    pub async fn vertex_with_adc(project_id: String, location: String) -> Result<Self, Error> {
        let token_provider = gcp_auth::provider()
            .await
            .map_err(|e| Error::auth(format!("Failed to load Application Default Credentials: {e}")))?;

        Self::build(
            GeminiAuth::ApplicationDefault,
            Some(token_provider),
            Endpoint::Vertex {
                base_url: None,
                project_id,
                location,
            },
        )
    }

    fn build(
        auth: GeminiAuth,
        token_provider: Option<Arc<dyn gcp_auth::TokenProvider>>,
        endpoint: Endpoint,
    ) -> Result<Self, Error> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            auth,
            token_provider,
            endpoint,
        })
    }

    /// Get the API endpoint for a model.
    fn get_endpoint(&self, stream: bool, model: &str) -> String {
        let method = if stream {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };

        match &self.endpoint {
            Endpoint::GeminiApi { base_url } => {
                format!("{}/v1beta/models/{model}:{method}", base_url.trim_end_matches('/'))
            }
            Endpoint::Vertex {
                base_url,
                project_id,
                location,
            } => {
                let base = base_url
                    .as_deref()
                    .map(|url| url.trim_end_matches('/').to_string())
                    .unwrap_or_else(|| format!("https://{location}-aiplatform.googleapis.com"));
                format!(
                    "{base}/v1/projects/{project_id}/locations/{location}/publishers/google/models/{model}:{method}"
                )
            }
        }
    }

    async fn authorize(&self, builder: RequestBuilder) -> Result<RequestBuilder, Error> {
        Ok(match &self.auth {
            GeminiAuth::ApiKey(key) => builder.header("x-goog-api-key", key),
            GeminiAuth::AccessToken(token) => builder.header("Authorization", format!("Bearer {token}")),
            GeminiAuth::ApplicationDefault => {
                let provider = self
                    .token_provider
                    .as_ref()
                    .ok_or_else(|| Error::auth("Token provider not initialized for ADC"))?;
                let token = provider
                    .token(&[CLOUD_PLATFORM_SCOPE])
                    .await
                    .map_err(|e| Error::auth(format!("Failed to get ADC token: {e}")))?;
                builder.header("Authorization", format!("Bearer {}", token.as_str()))
            }
        })
    }

    async fn send(&self, request: &LLMRequest, stream: bool) -> Result<reqwest::Response, Error> {
        let body = convert_request(request)?;
        let builder = self
            .client
            .post(self.get_endpoint(stream, &request.model))
            .header("Content-Type", "application/json")
            .json(&body);

        let response = self.authorize(builder).await?.send().await.map_err(|e| {
            tracing::warn!(provider = PROVIDER, error = %e, "upstream request failed");
            Error::transport(PROVIDER, TransportFailure::from(&e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(provider = PROVIDER, status = status.as_u16(), "upstream returned an error status");
            return Err(Error::transport(
                PROVIDER,
                TransportFailure::from_response(status.as_u16(), &error_text),
            ));
        }

        Ok(response)
    }
}

/// The one-line instruction approximating a verbosity level. Medium is Gemini's default.
fn verbosity_instruction(verbosity: Verbosity) -> Option<&'static str> {
    match verbosity {
        Verbosity::Low => Some("Keep your answer brief: a few sentences at most."),
        Verbosity::Medium => None,
        Verbosity::High => Some("Give a thorough, detailed answer."),
    }
}

/// Convert internal request to Gemini format.
pub(crate) fn convert_request(request: &LLMRequest) -> Result<GeminiRequest, Error> {
    let mut contents: Vec<GeminiContent> = Vec::new();

    for item in &request.messages {
        match item {
            InputItem::Message(msg) => {
                let role = match msg.role {
                    Role::System => continue,
                    Role::User | Role::Tool => "user",
                    Role::Assistant => "model",
                };
                let mut parts = Vec::with_capacity(1 + msg.files.len());
                if !msg.content.is_empty() {
                    parts.push(GeminiPart::text(msg.content.clone()));
                }
                parts.extend(msg.files.iter().map(file_part));
                contents.push(GeminiContent::new(role, parts));
            }
            InputItem::FunctionCall(call) => {
                let part = GeminiPart::FunctionCall {
                    function_call: GeminiFunctionCall {
                        name: call.name.clone(),
                        args: Some(parse_arguments(&call.arguments)?),
                    },
                };
                push_part(&mut contents, "model", part);
            }
            InputItem::FunctionCallOutput { name, output, .. } => {
                let part = GeminiPart::FunctionResponse {
                    function_response: GeminiFunctionResponse {
                        name: name.clone(),
                        response: function_response(output)?,
                    },
                };
                push_part(&mut contents, "user", part);
            }
        }
    }

    let system_text = [
        request.system_text(),
        verbosity_instruction(request.verbosity).map(str::to_string),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join("\n\n");
    let system_instruction = (!system_text.is_empty())
        .then(|| GeminiContent::new("", vec![GeminiPart::text(system_text)]));

    let generation_config = GenerationConfig {
        temperature: request.temperature,
        max_output_tokens: request.max_tokens,
        response_mime_type: request
            .response_format
            .as_ref()
            .map(|_| "application/json".to_string()),
        response_schema: request
            .response_format
            .as_ref()
            .map(|format| open_api_schema(format.schema.clone())),
    };

    let tools = match &request.tools {
        Some(tools) => Some(vec![GeminiTool {
            function_declarations: tools
                .iter()
                .map(|tool| -> Result<FunctionDeclaration, Error> {
                    Ok(FunctionDeclaration {
                        name: tool.function.name.clone(),
                        description: tool.function.description.clone(),
                        parameters: serde_json::value::to_raw_value(&open_api_schema(
                            tool.function.parameters.clone(),
                        ))?,
                    })
                })
                .collect::<Result<Vec<_>, Error>>()?,
        }]),
        None => None,
    };
    let tool_config = tools.as_ref().map(|_| ToolConfig {
        function_calling_config: FunctionCallingConfig {
            mode: match request.tool_choice {
                ToolChoice::Auto => "AUTO",
                ToolChoice::None => "NONE",
            }
            .to_string(),
        },
    });

    Ok(GeminiRequest {
        contents,
        system_instruction,
        generation_config: (!generation_config.is_empty()).then_some(generation_config),
        tools,
        tool_config,
    })
}

/// Append a part to the last content of the same role.
///
/// A model turn keeps its text and function calls in one content. User
/// contents only absorb parts of the same kind, so function responses stay
/// grouped without joining a preceding user message.
fn push_part(contents: &mut Vec<GeminiContent>, role: &str, part: GeminiPart) {
    let mergeable = |last: &GeminiContent| {
        last.role == role
            && (role == "model"
                || last
                    .parts
                    .iter()
                    .any(|existing| std::mem::discriminant(existing) == std::mem::discriminant(&part)))
    };
    match contents.last_mut() {
        Some(last) if mergeable(last) => last.parts.push(part),
        _ => contents.push(GeminiContent::new(role, vec![part])),
    }
}

fn file_part(file: &FileReference) -> GeminiPart {
    GeminiPart::FileData {
        file_data: FileData {
            mime_type: file
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            file_uri: file.uri.clone().unwrap_or_else(|| file.id.clone()),
        },
    }
}

fn parse_arguments(arguments: &str) -> Result<IValue, Error> {
    let arguments = if arguments.trim().is_empty() { "{}" } else { arguments };
    serde_json::from_str(arguments)
        .map_err(|e| Error::provider(PROVIDER, format!("Invalid function arguments: {e}")))
}

/// Gemini expects an object; other JSON values and plain text are wrapped.
fn function_response(output: &str) -> Result<IValue, Error> {
    let response = match serde_json::from_str::<Value>(output) {
        Ok(value @ Value::Object(_)) => value,
        Ok(value) => serde_json::json!({ "result": value }),
        Err(_) => serde_json::json!({ "result": output }),
    };
    Ok(serde_json::from_value(response)?)
}

/// Drop JSON Schema keywords Gemini's OpenAPI schema subset rejects.
fn open_api_schema(mut schema: Value) -> Value {
    strip_unsupported(&mut schema);
    schema
}

fn strip_unsupported(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            for key in ["additionalProperties", "$schema", "$id"] {
                map.remove(key);
            }
            map.values_mut().for_each(strip_unsupported);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_unsupported),
        _ => {}
    }
}

/// A reply (or stream chunk) the provider withheld for safety reasons.
fn safety_block(response: &GeminiResponse) -> Option<TransportFailure> {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|feedback| feedback.block_reason.as_deref())
    {
        let detail = response
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason_message.clone())
            .unwrap_or_else(|| format!("prompt blocked ({reason})"));
        return Some(TransportFailure::safety_block(detail));
    }

    let candidate = response.candidates.first()?;
    let reason = candidate.finish_reason.as_deref()?;
    let has_content = candidate
        .content
        .as_ref()
        .is_some_and(|content| !content.parts.is_empty());

    (BLOCKING_FINISH_REASONS.contains(&reason) && !has_content).then(|| {
        TransportFailure::safety_block(
            candidate
                .finish_message
                .clone()
                .unwrap_or_else(|| format!("response blocked ({reason})")),
        )
    })
}

fn finish_reason(reason: &str, has_calls: bool) -> FinishReason {
    match reason {
        _ if has_calls => FinishReason::ToolCalls,
        "MAX_TOKENS" => FinishReason::Length,
        r if BLOCKING_FINISH_REASONS.contains(&r) => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

/// Gemini does not assign call ids, so one is synthesized per call.
fn synthesize_call(call: &GeminiFunctionCall) -> Result<FunctionCall, Error> {
    let base_id = Uuid::new_v4().simple().to_string();
    let arguments = match &call.args {
        Some(args) => serde_json::to_string(args)?,
        None => "{}".to_string(),
    };
    Ok(FunctionCall {
        id: format!("fc_{base_id}"),
        call_id: format!("call_{base_id}"),
        name: call.name.clone(),
        arguments,
    })
}

/// Convert a buffered `generateContent` body into a complete response.
pub(crate) fn convert_reply(body: Value) -> Result<CompleteResponse, Error> {
    let response: GeminiResponse = serde_json::from_value(body.clone())?;
    if let Some(failure) = safety_block(&response) {
        return Err(Error::transport(PROVIDER, failure));
    }

    let mut output = Vec::new();
    let candidate = response.candidates.first();
    for part in candidate
        .and_then(|c| c.content.as_ref())
        .map(|content| content.parts.as_slice())
        .unwrap_or_default()
    {
        match part {
            GeminiPart::Text { text, thought } if thought != &Some(true) && !text.is_empty() => {
                match output.last_mut() {
                    Some(OutputItem::Text { content }) => content.push_str(text),
                    _ => output.push(OutputItem::Text {
                        content: text.clone(),
                    }),
                }
            }
            GeminiPart::FunctionCall { function_call } => output.push(OutputItem::FunctionCall {
                call: synthesize_call(function_call)?,
            }),
            _ => {}
        }
    }

    if output.is_empty() {
        if let Some(content) = extract::reply_text(&body) {
            output.push(OutputItem::Text { content });
        }
    }

    let has_calls = output.iter().any(|o| matches!(o, OutputItem::FunctionCall { .. }));
    Ok(CompleteResponse {
        output,
        finish_reason: finish_reason(
            candidate.and_then(|c| c.finish_reason.as_deref()).unwrap_or("STOP"),
            has_calls,
        ),
        usage: response.usage_metadata.map(Into::into).unwrap_or_default(),
    })
}

/// Tracks output items across stream chunks so each is announced once.
#[derive(Debug, Default)]
struct GeminiStreamState {
    has_text_output: bool,
    has_calls: bool,
}

/// Convert one streamed chunk into stream events.
fn convert_chunk(response: GeminiResponse, state: &mut GeminiStreamState) -> Result<Vec<StreamEvent>, Error> {
    if let Some(failure) = safety_block(&response) {
        return Err(Error::transport(PROVIDER, failure));
    }

    let mut events = Vec::new();
    let Some(candidate) = response.candidates.into_iter().next() else {
        return Ok(events);
    };

    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        match part {
            GeminiPart::Text { text, thought } if thought != Some(true) => {
                if !state.has_text_output {
                    events.push(StreamEvent::OutputItemAdded {
                        item: OutputItemInfo::Text,
                    });
                    state.has_text_output = true;
                }
                if !text.is_empty() {
                    events.push(StreamEvent::ContentDelta { delta: text });
                }
            }
            GeminiPart::FunctionCall { function_call } => {
                let call = synthesize_call(&function_call)?;
                state.has_calls = true;
                events.push(StreamEvent::OutputItemAdded {
                    item: OutputItemInfo::FunctionCall {
                        name: call.name.clone(),
                        id: call.id.clone(),
                    },
                });
                events.push(StreamEvent::FunctionCallComplete { call });
            }
            _ => {}
        }
    }

    // Only the last chunk carries a finish reason
    if let Some(reason) = &candidate.finish_reason {
        events.push(StreamEvent::Done {
            finish_reason: finish_reason(reason, state.has_calls),
            usage: response.usage_metadata.map(Into::into).unwrap_or_default(),
        });
    }

    Ok(events)
}

#[async_trait::async_trait]
impl LLMProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn complete(&self, request: &LLMRequest) -> Result<CompleteResponse, Error> {
        let response = self.send(request, false).await?;
        let body: Value = response.json().await?;
        convert_reply(body)
    }

    async fn generate(&self, request: &LLMRequest) -> Result<Response, Error> {
        let response = self.send(request, true).await?;
        let mut state = GeminiStreamState::default();

        let event_stream = response
            .bytes_stream()
            .sse_events()
            .map(move |sse_result| match sse_result {
                Ok(sse_event) if sse_event.is_done() || sse_event.data.trim().is_empty() => vec![],
                Ok(sse_event) => match serde_json::from_str::<GeminiResponse>(&sse_event.data) {
                    Ok(chunk) => match convert_chunk(chunk, &mut state) {
                        Ok(events) => events.into_iter().map(Ok).collect(),
                        Err(e) => vec![Err(e)],
                    },
                    Err(e) => vec![Err(Error::provider(
                        PROVIDER,
                        format!("Failed to parse SSE event: {e}"),
                    ))],
                },
                Err(e) => vec![Err(e)],
            })
            .flat_map(futures_util::stream::iter);

        Ok(Response::from_stream(event_stream))
    }
}
