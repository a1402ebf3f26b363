//! Provider implementations for different LLM services.

pub mod gemini;
pub mod openai;

pub use gemini::{GeminiAuth, GeminiProvider};
pub use openai::{AzureOpenAIProvider, OpenAIProvider};
