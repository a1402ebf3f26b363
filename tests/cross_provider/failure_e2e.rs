use std::sync::{Arc, Mutex};

use chat_driver::{ChatRequest, Error, FailureClass, FilteredPrompt};
use serde::Deserialize;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::providers::azure::{azure_config, RESPONSES_PATH};
use super::providers::gemini::{gemini_config, generate_path, stream_path};
use super::providers::openai::text_reply;
use super::providers::{create_driver, received_bodies};
use chat_driver::ProviderConfig;

fn openai_config(base_url: &str) -> ProviderConfig {
    ProviderConfig::openai("test-api-key".to_string()).with_base_url(base_url)
}

#[derive(Debug, Deserialize, PartialEq)]
struct Forecast {
    location: String,
    temperature_c: f64,
}

fn forecast_schema() -> Value {
    json!({
        "title": "forecast",
        "type": "object",
        "properties": {
            "location": {"type": "string"},
            "temperature_c": {"type": "number"}
        },
        "required": ["location", "temperature_c"]
    })
}

fn unknown_forecast() -> Forecast {
    Forecast {
        location: "unknown".to_string(),
        temperature_c: 0.0,
    }
}

#[tokio::test]
async fn test_rate_limit_then_success() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"type": "requests", "message": "Rate limit reached for gpt-5-mini"}
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("Hello again.")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let driver = create_driver(openai_config(&mock_server.uri())).await;
    let text = driver.get_model_response(&ChatRequest::new("Hello")).await.unwrap();
    assert_eq!(text, "Hello again.");
}

#[tokio::test]
async fn test_rate_limit_exhausts_retries() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&mock_server)
        .await;

    let driver = create_driver(openai_config(&mock_server.uri())).await;
    let err = driver.get_model_response(&ChatRequest::new("Hello")).await.unwrap_err();
    assert!(
        matches!(err, Error::RetriesExhausted { attempts: 3, last_class: FailureClass::RateLimited, .. }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_unauthorized_fails_without_retry() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let driver = create_driver(openai_config(&mock_server.uri())).await;
    let err = driver.get_model_response(&ChatRequest::new("Hello")).await.unwrap_err();
    assert_eq!(err.class(), Some(FailureClass::Unauthorized));
    assert!(err.to_string().starts_with("OpenAI rejected credentials"), "unexpected message: {err}");
}

#[tokio::test]
async fn test_empty_output_is_reported() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "completed", "output": []})))
        .mount(&mock_server)
        .await;

    let driver = create_driver(openai_config(&mock_server.uri())).await;
    let err = driver.get_model_response(&ChatRequest::new("Hello")).await.unwrap_err();
    assert!(matches!(err, Error::EmptyOutput { ref provider } if provider == "OpenAI"));
}

#[tokio::test]
async fn test_openai_constrained_response() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(text_reply(r#"{"location": "Paris", "temperature_c": 22}"#)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let driver = create_driver(openai_config(&mock_server.uri())).await;
    let forecast: Forecast = driver
        .get_constrained_model_response(&ChatRequest::new("Paris is at 22°C"), &forecast_schema(), unknown_forecast())
        .await;
    assert_eq!(
        forecast,
        Forecast {
            location: "Paris".to_string(),
            temperature_c: 22.0
        }
    );

    let bodies = received_bodies(&mock_server).await;
    let format = &bodies[0]["text"]["format"];
    assert_eq!(format["name"], "forecast");
    assert_eq!(format["strict"], true);
    assert_eq!(format["schema"]["additionalProperties"], false);
}

#[tokio::test]
async fn test_azure_content_filter_captures_prompt() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(RESPONSES_PATH))
        .and(header("api-key", "azure-test-key"))
        .and(query_param("api-version", "preview"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": "content_filter",
                "message": "The response was filtered due to the prompt triggering content management policy.",
                "status": 400
            }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let captured = Arc::new(Mutex::new(Vec::<FilteredPrompt>::new()));
    let sink = captured.clone();
    let driver = create_driver(azure_config(&mock_server.uri()))
        .await
        .with_filtered_prompt_hook(move |prompt| sink.lock().unwrap().push(prompt.clone()));

    let request = ChatRequest::new("Describe the forecast").system_prompt("Extract forecasts");
    let forecast: Forecast = driver
        .get_constrained_model_response(&request, &forecast_schema(), unknown_forecast())
        .await;
    assert_eq!(forecast, unknown_forecast());

    let captured = captured.lock().unwrap();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].provider, "Azure OpenAI");
    assert_eq!(captured[0].class, FailureClass::ContentFiltered);
    assert_eq!(captured[0].system_prompt.as_deref(), Some("Extract forecasts"));
    assert_eq!(captured[0].user_prompt, "Describe the forecast");

    let bodies = received_bodies(&mock_server).await;
    assert_eq!(bodies[0]["model"], "gpt5-mini-eu");
    assert!(bodies[0]["text"].get("verbosity").is_none());
}

#[tokio::test]
async fn test_gemini_safety_block_is_rejected() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(generate_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "promptFeedback": {"blockReason": "SAFETY"},
            "usageMetadata": {"promptTokenCount": 9, "totalTokenCount": 9}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let driver = create_driver(gemini_config(&mock_server.uri())).await;
    let err = driver.get_model_response(&ChatRequest::new("something unsafe")).await.unwrap_err();
    assert_eq!(err.class(), Some(FailureClass::SafetyTriggered));
    assert_eq!(err.to_string(), "Gemini refused request (safety filter): prompt blocked (SAFETY)");
}

#[tokio::test]
async fn test_gemini_stream_blocked_before_text_is_rejected() {
    let mock_server = MockServer::start().await;
    let blocked = r#"data: {"candidates":[{"finishReason":"SAFETY","index":0}],"usageMetadata":{"promptTokenCount":9,"totalTokenCount":9}}"#;
    Mock::given(method("POST"))
        .and(path(stream_path()))
        .and(query_param("alt", "sse"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("{blocked}\r\n\r\n"))
                .insert_header("content-type", "text/event-stream"),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let driver = create_driver(gemini_config(&mock_server.uri())).await;
    let err = driver
        .get_streamed_model_response(&ChatRequest::new("something unsafe"))
        .await
        .err()
        .expect("a blocked stream should not open");
    assert_eq!(err.class(), Some(FailureClass::SafetyTriggered));
    assert_eq!(err.to_string(), "Gemini refused request (safety filter): response blocked (SAFETY)");
}
