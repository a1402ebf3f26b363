use super::{create_driver, JsonBody, ProviderCase, ProviderTestSetup, WEATHER_ANSWER};
use chat_driver::{ChatDriver, ProviderConfig};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub struct OpenAITestSetup;

pub const CALL_ID: &str = "call_abc123def456";

/// A Responses API body requesting `get_weather` for Paris.
pub fn function_call_reply() -> Value {
    json!({
        "id": "resp_fc123",
        "object": "response",
        "status": "completed",
        "output": [
            {"id": "rs_1", "type": "reasoning", "summary": []},
            {
                "id": "fc_abc123",
                "type": "function_call",
                "status": "completed",
                "call_id": CALL_ID,
                "name": "get_weather",
                "arguments": "{\"location\":\"Paris\"}"
            }
        ],
        "usage": {"input_tokens": 85, "output_tokens": 18, "total_tokens": 103}
    })
}

/// A Responses API body answering with `text`.
pub fn text_reply(text: &str) -> Value {
    json!({
        "id": "resp_txt123",
        "object": "response",
        "status": "completed",
        "output": [{
            "id": "msg_abc123",
            "type": "message",
            "status": "completed",
            "role": "assistant",
            "content": [{"type": "output_text", "text": text, "annotations": []}]
        }],
        "usage": {"input_tokens": 120, "output_tokens": 11, "total_tokens": 131}
    })
}

pub fn function_output_item(body: &Value) -> Option<&Value> {
    body["input"]
        .as_array()?
        .iter()
        .find(|item| item["type"] == "function_call_output")
}

/// Mount the function calling exchange at `route`, requiring the `auth` header.
pub async fn mount_responses_exchange(mock_server: &MockServer, route: &str, auth: (&str, &str)) {
    Mock::given(method("POST"))
        .and(path(route))
        .and(header(auth.0, auth.1))
        .and(JsonBody(|body: &Value| {
            body["tool_choice"] == "auto" && body["store"] == false && function_output_item(body).is_none()
        }))
        .respond_with(ResponseTemplate::new(200).set_body_json(function_call_reply()))
        .expect(1)
        .mount(mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(route))
        .and(header(auth.0, auth.1))
        .and(JsonBody(|body: &Value| {
            function_output_item(body).is_some_and(|item| item["call_id"] == CALL_ID)
        }))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply(WEATHER_ANSWER)))
        .expect(1)
        .mount(mock_server)
        .await;
}

pub fn responses_tool_output(body: &Value) -> Option<Value> {
    let output = function_output_item(body)?["output"].as_str()?;
    serde_json::from_str(output).ok()
}

#[async_trait::async_trait]
impl ProviderTestSetup for OpenAITestSetup {
    fn case() -> ProviderCase {
        ProviderCase {
            name: "OpenAI",
            model: "gpt-5-mini",
        }
    }

    async fn create_driver(base_url: &str) -> ChatDriver {
        create_driver(ProviderConfig::openai("test-api-key".to_string()).with_base_url(base_url)).await
    }

    async fn mount_function_calling_mocks(mock_server: &MockServer) {
        mount_responses_exchange(mock_server, "/responses", ("Authorization", "Bearer test-api-key")).await;
    }

    fn tool_output(body: &Value) -> Option<Value> {
        responses_tool_output(body)
    }

    fn tools_withheld(body: &Value) -> bool {
        body["tool_choice"] == "none"
    }
}
