pub mod azure;
pub mod gemini;
pub mod openai;

use chat_driver::{ChatDriver, ChatRequest, DriverOptions, FunctionDescriptor, ProviderConfig, ProviderFactory, RetryPolicy};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::{Match, MockServer, Request};

pub const SYSTEM_PROMPT: &str = "You have access to weather data. Use the get_weather function when asked about weather.";
pub const USER_PROMPT: &str = "What's the weather like in Paris?";
pub const WEATHER_ANSWER: &str = "It is sunny in Paris, 22°C.";

/// Create the weather function, counting its executions.
pub fn create_weather_function(executions: Arc<AtomicUsize>) -> FunctionDescriptor {
    FunctionDescriptor::new(
        "get_weather",
        "Get the current weather for a location",
        json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "The city and state, e.g. San Francisco, CA"
                }
            },
            "required": ["location"]
        }),
        move |args| {
            let executions = executions.clone();
            async move {
                executions.fetch_add(1, Ordering::SeqCst);
                Ok(json!({
                    "location": args["location"],
                    "forecast": "sunny",
                    "temperature_c": 22
                }))
            }
        },
    )
}

pub fn weather_request(executions: Arc<AtomicUsize>) -> ChatRequest {
    ChatRequest::new(USER_PROMPT)
        .system_prompt(SYSTEM_PROMPT)
        .function(create_weather_function(executions))
}

/// Load test fixture from file
pub fn load_fixture(filename: &str) -> String {
    let path = format!("{}/tests/cross_provider/fixtures/{filename}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("Failed to load test fixture: {path}"))
}

/// Retries fast enough for tests.
pub fn test_options() -> DriverOptions {
    DriverOptions {
        retry: RetryPolicy::new(2, Duration::from_millis(5)),
        ..DriverOptions::default()
    }
}

pub async fn create_driver(config: ProviderConfig) -> ChatDriver {
    ProviderFactory::create(&config, test_options())
        .await
        .expect("Failed to create chat driver")
}

/// Matches requests whose JSON body satisfies a predicate.
pub struct JsonBody<F>(pub F);

impl<F> Match for JsonBody<F>
where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
{
    fn matches(&self, request: &Request) -> bool {
        serde_json::from_slice::<Value>(&request.body)
            .map(|body| (self.0)(&body))
            .unwrap_or(false)
    }
}

/// The JSON bodies the server received, in order.
pub async fn received_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .expect("request recording is enabled")
        .iter()
        .map(|request| serde_json::from_slice(&request.body).expect("request body is JSON"))
        .collect()
}

/// Provider test case description
#[derive(Debug, Clone)]
pub struct ProviderCase {
    pub name: &'static str,
    pub model: &'static str,
}

/// Trait for provider-specific test setup
#[async_trait::async_trait]
pub trait ProviderTestSetup {
    fn case() -> ProviderCase;

    /// Create a driver talking to the mock server.
    async fn create_driver(base_url: &str) -> ChatDriver;

    /// Mount a function-call reply for the first turn and a text reply once
    /// the function output comes back.
    async fn mount_function_calling_mocks(mock_server: &MockServer);

    /// The function output carried by a follow-up request body.
    fn tool_output(body: &Value) -> Option<Value>;

    /// Whether a request body forbids further function calls.
    fn tools_withheld(body: &Value) -> bool;
}
