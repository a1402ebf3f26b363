//! Google Gemini, on the Gemini API or on Vertex AI.

mod client;
pub mod types;

pub use client::{GeminiAuth, GeminiProvider};
