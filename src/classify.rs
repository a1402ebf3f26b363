//! Classification of provider transport failures.
//!
//! Every provider reports failures differently. Adapters reduce them to a
//! [`TransportFailure`] (status code plus an optional structured error body)
//! and [`classify`] maps that onto a small taxonomy the retry engine acts on.

use serde_json::Value;
use std::fmt;

/// The taxonomy of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    RateLimited,
    Unauthorized,
    ContentFiltered,
    SafetyTriggered,
    Refused,
    Forbidden,
    Other,
}

impl FailureClass {
    /// Only rate limiting is recovered locally; everything else is fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureClass::RateLimited)
    }

    /// Content-policy classes whose triggering prompts are worth capturing.
    pub fn is_policy_block(&self) -> bool {
        matches!(
            self,
            FailureClass::ContentFiltered | FailureClass::SafetyTriggered
        )
    }

    /// Human-readable verdict used in provider-qualified error messages.
    pub fn verdict(&self) -> &'static str {
        match self {
            FailureClass::RateLimited => "rate limited request (429 Too Many Requests)",
            FailureClass::Unauthorized => "rejected credentials (401 Unauthorized)",
            FailureClass::ContentFiltered => "refused request (content filter)",
            FailureClass::SafetyTriggered => "refused request (safety filter)",
            FailureClass::Forbidden => "refused request (403 Forbidden)",
            FailureClass::Refused => "refused request",
            FailureClass::Other => "request failed",
        }
    }
}

/// A structured error body returned by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredError {
    /// The error type (`error.type`, or a string `error.code` / `error.status`).
    pub kind: String,
    pub message: String,
}

impl StructuredError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Parse a provider error body.
    ///
    /// OpenAI reports `{"error": {"type", "message"}}`, Azure puts the
    /// discriminator in `error.code`, Gemini in `error.status`. A root-level
    /// object with the same fields is accepted too.
    pub fn from_body(body: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(body).ok()?;
        // Vertex sometimes wraps the error object in a one-element array.
        let value = match value {
            Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
            other => other,
        };
        let error = value.get("error").unwrap_or(&value);

        let kind = ["type", "code", "status"]
            .iter()
            .filter_map(|field| error.get(*field).and_then(Value::as_str))
            .find(|kind| !kind.is_empty())?;

        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();

        Some(Self::new(kind, message))
    }
}

/// A failure observed at the transport boundary of a provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportFailure {
    pub status: Option<u16>,
    pub error: Option<StructuredError>,
    /// Provider text describing the failure, echoed verbatim to callers.
    pub message: String,
}

impl TransportFailure {
    pub fn new(status: Option<u16>, error: Option<StructuredError>, message: impl Into<String>) -> Self {
        Self {
            status,
            error,
            message: message.into(),
        }
    }

    /// Build a failure from an HTTP status and its raw response body.
    pub fn from_response(status: u16, body: &str) -> Self {
        let error = StructuredError::from_body(body);
        let message = match &error {
            Some(structured) if !structured.message.is_empty() => structured.message.clone(),
            _ if body.trim().is_empty() => format!("HTTP {status}"),
            _ => body.trim().to_string(),
        };
        Self::new(Some(status), error, message)
    }

    /// A 200 reply that the provider blocked for safety reasons.
    pub fn safety_block(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(None, Some(StructuredError::new("safety", message.clone())), message)
    }
}

impl From<&reqwest::Error> for TransportFailure {
    fn from(error: &reqwest::Error) -> Self {
        TransportFailure::new(error.status().map(|s| s.as_u16()), None, error.to_string())
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {status}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Classify a transport failure. Rules apply in priority order.
pub fn classify(failure: &TransportFailure) -> FailureClass {
    if failure.status == Some(429) {
        return FailureClass::RateLimited;
    }

    if let Some(error) = &failure.error {
        match error.kind.as_str() {
            "content_filter" => return FailureClass::ContentFiltered,
            "safety" => return FailureClass::SafetyTriggered,
            _ => {}
        }
    }

    if failure.status == Some(403) {
        return FailureClass::Forbidden;
    }

    if failure.error.is_some() {
        return FailureClass::Refused;
    }

    if failure.status == Some(401) {
        FailureClass::Unauthorized
    } else {
        FailureClass::Other
    }
}
