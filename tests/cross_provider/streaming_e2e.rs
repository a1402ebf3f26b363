use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chat_driver::{ChatRequest, StreamChunk, Verbosity, INTERRUPTION_NOTICE};
use futures_util::StreamExt;
use serde_json::Value;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::providers::gemini::{gemini_config, stream_path};
use super::providers::openai::{function_output_item, CALL_ID};
use super::providers::{create_driver, load_fixture, received_bodies, weather_request, JsonBody, WEATHER_ANSWER};
use chat_driver::ProviderConfig;

fn sse(fixture: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(load_fixture(fixture))
        .insert_header("content-type", "text/event-stream")
        .insert_header("cache-control", "no-cache")
}

fn openai_config(base_url: &str) -> ProviderConfig {
    ProviderConfig::openai("test-api-key".to_string()).with_base_url(base_url)
}

#[tokio::test]
async fn test_openai_streamed_response() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(JsonBody(|body: &Value| body["stream"] == true && body["text"]["verbosity"] == "low"))
        .respond_with(sse("openai/streamed_text.sse"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let driver = create_driver(openai_config(&mock_server.uri())).await;
    let stream = driver
        .get_streamed_model_response(&ChatRequest::new("Weather in Paris?").verbosity(Verbosity::Low))
        .await
        .expect("stream should open");

    let fragments: Vec<String> = stream.collect().await;
    assert_eq!(fragments, vec!["It is sunny ", "in Paris, 22°C."]);
    assert_eq!(fragments.concat(), WEATHER_ANSWER);
}

#[tokio::test]
async fn test_openai_interrupted_stream_ends_with_notice() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(sse("openai/interrupted.sse"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let driver = create_driver(openai_config(&mock_server.uri())).await;
    let mut stream = driver
        .get_streamed_model_response(&ChatRequest::new("Weather in Paris?"))
        .await
        .expect("stream should open");

    let mut fragments = Vec::new();
    while let Some(fragment) = stream.next().await {
        fragments.push(fragment);
    }

    assert_eq!(fragments, vec!["It is sunny ".to_string(), INTERRUPTION_NOTICE.to_string()]);
    assert!(stream.was_interrupted());
}

#[tokio::test]
async fn test_openai_stream_after_tool_round() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(JsonBody(|body: &Value| {
            body["stream"] == true && body["tool_choice"] == "auto" && function_output_item(body).is_none()
        }))
        .respond_with(sse("openai/function_call.sse"))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(JsonBody(|body: &Value| {
            body["stream"] == true
                && body["tool_choice"] == "none"
                && function_output_item(body).is_some_and(|item| item["call_id"] == CALL_ID)
        }))
        .respond_with(sse("openai/streamed_text.sse"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let driver = create_driver(openai_config(&mock_server.uri())).await;
    let executions = Arc::new(AtomicUsize::new(0));
    let stream = driver
        .get_streamed_model_response(&weather_request(executions.clone()))
        .await
        .expect("stream should open");

    let text: String = stream.collect::<Vec<_>>().await.concat();
    assert_eq!(text, WEATHER_ANSWER);
    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(received_bodies(&mock_server).await.len(), 2);
}

#[tokio::test]
async fn test_openai_streamed_answer_without_tool_call_is_one_request() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .and(JsonBody(|body: &Value| body["stream"] == true && body["tool_choice"] == "auto"))
        .respond_with(sse("openai/streamed_text.sse"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let driver = create_driver(openai_config(&mock_server.uri())).await;
    let executions = Arc::new(AtomicUsize::new(0));
    let stream = driver
        .get_streamed_model_response_with_forced_tools(&weather_request(executions.clone()))
        .await
        .expect("stream should open");

    let fragments: Vec<String> = stream.collect().await;
    assert_eq!(fragments, vec!["It is sunny ", "in Paris, 22°C."]);
    assert_eq!(executions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_openai_stream_rate_limited_before_first_byte_is_retried() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/responses"))
        .respond_with(sse("openai/streamed_text.sse"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let driver = create_driver(openai_config(&mock_server.uri())).await;
    let stream = driver
        .get_streamed_model_response(&ChatRequest::new("Weather in Paris?"))
        .await
        .expect("stream should open");
    assert_eq!(stream.collect::<Vec<_>>().await.concat(), WEATHER_ANSWER);
}

#[tokio::test]
async fn test_gemini_streamed_chunks() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(stream_path()))
        .and(query_param("alt", "sse"))
        .respond_with(sse("gemini/streamed_text.sse"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let driver = create_driver(gemini_config(&mock_server.uri())).await;
    let stream = driver
        .get_streamed_model_response(&ChatRequest::new("Weather in Paris?").system_prompt("Be brief."))
        .await
        .expect("stream should open");

    let chunks: Vec<StreamChunk> = stream.chunks().collect().await;
    assert_eq!(
        chunks,
        vec![
            StreamChunk::Text("It is sunny ".to_string()),
            StreamChunk::Text("in Paris, 22°C.".to_string()),
            StreamChunk::Completed,
        ]
    );

    let bodies = received_bodies(&mock_server).await;
    assert_eq!(bodies[0]["systemInstruction"]["parts"][0]["text"], "Be brief.");
}
