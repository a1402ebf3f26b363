//! The provider-independent chat driver.
//!
//! [`ChatDriver`] composes one [`LLMProvider`] with the retry engine, the tool
//! orchestrator, the streaming normalizer and the constrained-response
//! validator. Every provider call it makes goes through [`RetryPolicy`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::classify::FailureClass;
use crate::orchestrator::{ModelTurn, ToolLoop, ToolLoopOutcome, DEFAULT_MAX_TOOL_ROUNDS};
use crate::provider::LLMProvider;
use crate::response::CompleteResponse;
use crate::retry::RetryPolicy;
use crate::streaming::{StreamedTurn, TextStream};
use crate::tools::{check_schema, FunctionDescriptor, FunctionSet};
use crate::types::{
    FileReference, InputItem, LLMRequest, Message, Prompt, ResponseFormat, Tool, ToolChoice, Verbosity,
};
use crate::Error;

/// A canonical chat request.
///
/// The transcript sent to the model is the system prompt, then `history`,
/// then the user prompt with its attached files.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub verbosity: Verbosity,
    pub history: Vec<InputItem>,
    pub functions: Vec<FunctionDescriptor>,
    pub files: Vec<FileReference>,
}

impl ChatRequest {
    pub fn new(user_prompt: impl Into<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            ..Default::default()
        }
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn history(mut self, history: impl IntoIterator<Item = InputItem>) -> Self {
        self.history.extend(history);
        self
    }

    pub fn function(mut self, function: FunctionDescriptor) -> Self {
        self.functions.push(function);
        self
    }

    pub fn functions(mut self, functions: impl IntoIterator<Item = FunctionDescriptor>) -> Self {
        self.functions.extend(functions);
        self
    }

    pub fn files(mut self, files: impl IntoIterator<Item = FileReference>) -> Self {
        self.files.extend(files);
        self
    }

    /// The initial transcript for this request.
    pub fn transcript(&self) -> Prompt {
        let mut prompt = Prompt::new();
        if let Some(system) = &self.system_prompt {
            prompt.push(InputItem::system(system.clone()));
        }
        prompt.extend(self.history.iter().cloned());
        prompt.push(InputItem::Message(
            Message::user(self.user_prompt.clone()).with_files(self.files.iter().cloned()),
        ));
        prompt
    }
}

/// A prompt pair refused by a provider's content policy.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredPrompt {
    pub provider: String,
    pub class: FailureClass,
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    /// The provider's refusal text.
    pub message: String,
}

/// Receives prompts refused by a content policy.
pub type FilteredPromptHook = Arc<dyn Fn(&FilteredPrompt) + Send + Sync>;

/// Drives chat requests against one provider.
pub struct ChatDriver {
    provider: Box<dyn LLMProvider>,
    model: String,
    retry: RetryPolicy,
    max_tool_rounds: usize,
    on_filtered: Option<FilteredPromptHook>,
}

impl fmt::Debug for ChatDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatDriver")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("retry", &self.retry)
            .field("max_tool_rounds", &self.max_tool_rounds)
            .finish_non_exhaustive()
    }
}

impl ChatDriver {
    pub fn new(provider: impl LLMProvider, model: impl Into<String>) -> Self {
        Self::from_boxed(Box::new(provider), model)
    }

    pub fn from_boxed(provider: Box<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            retry: RetryPolicy::default(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            on_filtered: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Cap on tool rounds for forced tool calling.
    pub fn with_max_tool_rounds(mut self, max_tool_rounds: usize) -> Self {
        self.max_tool_rounds = max_tool_rounds;
        self
    }

    /// Register a hook called with prompts refused by a content policy.
    pub fn with_filtered_prompt_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&FilteredPrompt) + Send + Sync + 'static,
    {
        self.on_filtered = Some(Arc::new(hook));
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Single-shot text reply. Functions, if any, get at most one tool round.
    pub async fn get_model_response(&self, request: &ChatRequest) -> Result<String, Error> {
        let outcome = self.run_tools(request, ToolLoop::single_round(), None).await?;
        self.reply_text(outcome)
    }

    /// Text reply streamed as it is produced.
    ///
    /// With functions, at most one tool round is resolved first; only the
    /// answering turn reaches the caller as a stream.
    pub async fn get_streamed_model_response(&self, request: &ChatRequest) -> Result<TextStream, Error> {
        self.stream_tools(request, ToolLoop::single_round()).await
    }

    /// Text reply after running tools until the model stops calling them.
    pub async fn get_model_response_with_forced_tools(&self, request: &ChatRequest) -> Result<String, Error> {
        let outcome = self
            .run_tools(request, ToolLoop::forced(self.max_tool_rounds), None)
            .await?;
        self.reply_text(outcome)
    }

    /// Streamed reply after running tools until the model stops calling them.
    pub async fn get_streamed_model_response_with_forced_tools(
        &self,
        request: &ChatRequest,
    ) -> Result<TextStream, Error> {
        self.stream_tools(request, ToolLoop::forced(self.max_tool_rounds))
            .await
    }

    /// A reply shaped by `schema`, deserialized into `T`.
    ///
    /// Never fails: any provider error, unparseable reply or schema mismatch
    /// yields `default`. Content-policy refusals are logged with the prompt
    /// pair and handed to the filtered-prompt hook first.
    pub async fn get_constrained_model_response<T>(&self, request: &ChatRequest, schema: &Value, default: T) -> T
    where
        T: DeserializeOwned,
    {
        match self.try_constrained(request, schema).await {
            Ok(value) => value,
            Err(error) => {
                if let Some(class) = error.class().filter(FailureClass::is_policy_block) {
                    self.capture_filtered(request, class, &error);
                }
                tracing::warn!(
                    provider = self.provider.name(),
                    error = %error,
                    "constrained response unavailable, using default"
                );
                default
            }
        }
    }

    async fn try_constrained<T: DeserializeOwned>(&self, request: &ChatRequest, schema: &Value) -> Result<T, Error> {
        let name = schema
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("response");
        let format = ResponseFormat::new(name, schema.clone());

        let outcome = self
            .run_tools(request, ToolLoop::single_round(), Some(format))
            .await?;
        let text = self.reply_text(outcome)?;

        let value: Value = serde_json::from_str(strip_code_fence(&text))?;
        check_schema(schema, &value).map_err(|e| {
            Error::provider(self.provider.name(), format!("reply does not match schema: {e}"))
        })?;
        Ok(serde_json::from_value(value)?)
    }

    fn capture_filtered(&self, request: &ChatRequest, class: FailureClass, error: &Error) {
        let filtered = FilteredPrompt {
            provider: self.provider.name().to_string(),
            class,
            system_prompt: request.system_prompt.clone(),
            user_prompt: request.user_prompt.clone(),
            message: error.to_string(),
        };
        tracing::error!(
            provider = %filtered.provider,
            class = ?class,
            system_prompt = ?filtered.system_prompt,
            user_prompt = %filtered.user_prompt,
            "prompt refused by content policy"
        );
        if let Some(hook) = &self.on_filtered {
            hook(&filtered);
        }
    }

    async fn run_tools(
        &self,
        request: &ChatRequest,
        tool_loop: ToolLoop,
        response_format: Option<ResponseFormat>,
    ) -> Result<ToolLoopOutcome, Error> {
        let functions = FunctionSet::new(&request.functions)?;
        let turn = ProviderTurn::new(self, &functions, request, response_format);
        tool_loop.run(&turn, &functions, request.transcript()).await
    }

    /// Every turn is streamed; tool rounds are buffered as they are detected
    /// and the first turn that answers in text is handed to the caller.
    async fn stream_tools(&self, request: &ChatRequest, tool_loop: ToolLoop) -> Result<TextStream, Error> {
        let functions = FunctionSet::new(&request.functions)?;
        let turn = StreamingTurn(ProviderTurn::new(self, &functions, request, None));
        let outcome = tool_loop.run(&turn, &functions, request.transcript()).await?;
        Ok(outcome.reply.into_text_stream(self.provider.name()))
    }

    fn reply_text(&self, outcome: ToolLoopOutcome) -> Result<String, Error> {
        outcome
            .reply
            .first_text()
            .map(str::to_string)
            .ok_or_else(|| Error::empty_output(self.provider.name()))
    }
}

/// Buffered model turns against the driver's provider, with retry.
struct ProviderTurn<'a> {
    driver: &'a ChatDriver,
    tools: Vec<Tool>,
    verbosity: Verbosity,
    response_format: Option<ResponseFormat>,
}

impl<'a> ProviderTurn<'a> {
    fn new(
        driver: &'a ChatDriver,
        functions: &FunctionSet<'_>,
        request: &ChatRequest,
        response_format: Option<ResponseFormat>,
    ) -> Self {
        Self {
            driver,
            tools: functions.declarations(),
            verbosity: request.verbosity,
            response_format,
        }
    }

    fn request(&self, transcript: &Prompt, offer_tools: bool) -> LLMRequest {
        let mut request = LLMRequest::from_prompt(&self.driver.model, transcript)
            .verbosity(self.verbosity)
            .tools(self.tools.clone())
            .tool_choice(if offer_tools { ToolChoice::Auto } else { ToolChoice::None });
        if let Some(format) = &self.response_format {
            request = request.response_format(format.clone());
        }
        tracing::debug!(
            provider = self.driver.provider.name(),
            model = %request.model,
            items = request.messages.len(),
            offer_tools,
            "requesting model turn"
        );
        request
    }
}

#[async_trait]
impl<'a> ModelTurn for ProviderTurn<'a> {
    type Reply = CompleteResponse;

    async fn respond(&self, transcript: &Prompt, offer_tools: bool) -> Result<CompleteResponse, Error> {
        let request = self.request(transcript, offer_tools);
        let provider = self.driver.provider.name();

        self.driver
            .retry
            .run_with_retry(provider, || self.driver.provider.complete(&request))
            .await
    }
}

/// Streamed model turns, read until each shows whether it calls tools.
struct StreamingTurn<'a>(ProviderTurn<'a>);

#[async_trait]
impl<'a> ModelTurn for StreamingTurn<'a> {
    type Reply = StreamedTurn;

    async fn respond(&self, transcript: &Prompt, offer_tools: bool) -> Result<StreamedTurn, Error> {
        let request = &self.0.request(transcript, offer_tools);
        let driver = self.0.driver;
        let provider = driver.provider.name();

        // Retried up to the first text fragment
        driver
            .retry
            .run_with_retry(provider, || async move {
                let response = driver.provider.generate(request).await?;
                StreamedTurn::open(provider, response).await
            })
            .await
    }
}

/// Models sometimes wrap JSON in a Markdown fence despite a schema constraint.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
