//! A provider-agnostic chat driver.
//!
//! One API over OpenAI, Azure OpenAI and Google Gemini (Gemini API or Vertex AI):
//! plain and streamed text replies, function calling with a bounded tool loop,
//! schema-constrained replies, retries with backoff and content-policy
//! classification of provider failures.

pub mod accumulator;
pub mod classify;
pub mod driver;
pub mod error;
pub mod extract;
pub mod factory;
pub mod orchestrator;
pub mod provider;
pub mod providers;
pub mod response;
pub mod retry;
pub mod sse_stream;
pub mod streaming;
pub mod tools;
pub mod types;

// Re-export core types for easy usage
pub use accumulator::ResponseAccumulator;
pub use classify::{classify, FailureClass, StructuredError, TransportFailure};
pub use driver::{ChatDriver, ChatRequest, FilteredPrompt, FilteredPromptHook};
pub use error::{Error, FunctionError};
pub use factory::{DriverOptions, ModelTier, ProviderConfig, ProviderFactory, ProviderType};
pub use orchestrator::{ModelTurn, ToolLoop, ToolLoopOutcome, TurnReply, DEFAULT_MAX_TOOL_ROUNDS};
pub use provider::LLMProvider;
pub use providers::{AzureOpenAIProvider, GeminiAuth, GeminiProvider, OpenAIProvider};
pub use response::*;
pub use retry::RetryPolicy;
pub use sse_stream::SseEvent;
pub use streaming::{ChunkStream, StreamedTurn, TextStream, INTERRUPTION_NOTICE};
pub use tools::{FunctionDescriptor, FunctionSet, ToolCallResult, ToolPayload};
pub use types::*;
