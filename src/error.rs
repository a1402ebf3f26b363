use thiserror::Error;

use crate::classify::{FailureClass, TransportFailure};

/// Errors that can occur when using the chat-driver library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Provider error: {provider} - {message}")]
    Provider { provider: String, message: String },

    /// A raw transport failure that has not been classified yet.
    #[error("{provider} transport failure: {failure}")]
    Transport {
        provider: String,
        failure: TransportFailure,
    },

    /// A fatal, classified provider failure.
    #[error("{provider} {}: {message}", .class.verdict())]
    Rejected {
        provider: String,
        class: FailureClass,
        message: String,
    },

    #[error("{provider} request failed after {attempts} attempts (last classification: {last_class:?}): {message}")]
    RetriesExhausted {
        provider: String,
        attempts: u32,
        last_class: FailureClass,
        message: String,
    },

    #[error("{provider} returned an empty output")]
    EmptyOutput { provider: String },

    #[error("Tool calling did not settle after {rounds} rounds")]
    ToolRoundLimit { rounds: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Streaming error: {0}")]
    Streaming(String),
}

impl Error {
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn transport(provider: impl Into<String>, failure: TransportFailure) -> Self {
        Error::Transport {
            provider: provider.into(),
            failure,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Error::Auth(message.into())
    }

    pub fn streaming(message: impl Into<String>) -> Self {
        Error::Streaming(message.into())
    }

    pub fn empty_output(provider: impl Into<String>) -> Self {
        Error::EmptyOutput {
            provider: provider.into(),
        }
    }

    /// The failure class of a classified error, if any.
    pub fn class(&self) -> Option<FailureClass> {
        match self {
            Error::Rejected { class, .. } => Some(*class),
            Error::RetriesExhausted { last_class, .. } => Some(*last_class),
            _ => None,
        }
    }
}

/// Errors raised by caller-supplied function validators and executors.
///
/// These never escape the tool orchestrator; they are folded into an
/// error-shaped tool result the model can read.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct FunctionError(pub String);

impl FunctionError {
    pub fn new(message: impl Into<String>) -> Self {
        FunctionError(message.into())
    }
}

impl From<String> for FunctionError {
    fn from(message: String) -> Self {
        FunctionError(message)
    }
}

impl From<&str> for FunctionError {
    fn from(message: &str) -> Self {
        FunctionError(message.to_string())
    }
}
