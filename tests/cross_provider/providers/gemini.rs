use super::{create_driver, JsonBody, ProviderCase, ProviderTestSetup, WEATHER_ANSWER};
use chat_driver::{ChatDriver, ProviderConfig};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub struct GeminiTestSetup;

pub const MODEL: &str = "gemini-2.5-flash";

pub fn gemini_config(base_url: &str) -> ProviderConfig {
    ProviderConfig::gemini("gemini-test-key".to_string())
        .with_base_url(base_url)
        .with_model(MODEL)
}

pub fn generate_path() -> String {
    format!("/v1beta/models/{MODEL}:generateContent")
}

pub fn stream_path() -> String {
    format!("/v1beta/models/{MODEL}:streamGenerateContent")
}

fn parts(body: &Value) -> impl Iterator<Item = &Value> {
    body["contents"]
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|content| content["parts"].as_array().into_iter().flatten())
}

fn function_response(body: &Value) -> Option<&Value> {
    parts(body).find_map(|part| part.get("functionResponse"))
}

#[async_trait::async_trait]
impl ProviderTestSetup for GeminiTestSetup {
    fn case() -> ProviderCase {
        ProviderCase {
            name: "Gemini",
            model: MODEL,
        }
    }

    async fn create_driver(base_url: &str) -> ChatDriver {
        create_driver(gemini_config(base_url)).await
    }

    async fn mount_function_calling_mocks(mock_server: &MockServer) {
        Mock::given(method("POST"))
            .and(path(generate_path()))
            .and(header("x-goog-api-key", "gemini-test-key"))
            .and(JsonBody(|body: &Value| {
                body["toolConfig"]["functionCallingConfig"]["mode"] == "AUTO" && function_response(body).is_none()
            }))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {
                        "role": "model",
                        "parts": [{"functionCall": {"name": "get_weather", "args": {"location": "Paris"}}}]
                    },
                    "finishReason": "STOP",
                    "index": 0
                }],
                "usageMetadata": {"promptTokenCount": 64, "candidatesTokenCount": 7, "totalTokenCount": 71},
                "modelVersion": MODEL
            })))
            .expect(1)
            .mount(mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path(generate_path()))
            .and(header("x-goog-api-key", "gemini-test-key"))
            .and(JsonBody(|body: &Value| {
                function_response(body).is_some_and(|response| response["name"] == "get_weather")
            }))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": WEATHER_ANSWER}]},
                    "finishReason": "STOP",
                    "index": 0
                }],
                "usageMetadata": {"promptTokenCount": 90, "candidatesTokenCount": 11, "totalTokenCount": 101},
                "modelVersion": MODEL
            })))
            .expect(1)
            .mount(mock_server)
            .await;
    }

    fn tool_output(body: &Value) -> Option<Value> {
        function_response(body).map(|response| response["response"].clone())
    }

    fn tools_withheld(body: &Value) -> bool {
        body["toolConfig"]["functionCallingConfig"]["mode"] == "NONE"
    }
}
