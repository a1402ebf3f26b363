//! OpenAI Responses API and its Azure-hosted variant.

pub mod azure;
mod client;
pub mod types;

pub use azure::AzureOpenAIProvider;
pub use client::OpenAIProvider;
