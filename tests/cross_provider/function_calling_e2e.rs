use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use wiremock::MockServer;

use super::providers::{
    azure::AzureTestSetup, gemini::GeminiTestSetup, openai::OpenAITestSetup, received_bodies, weather_request,
    ProviderTestSetup, WEATHER_ANSWER,
};

/// Forced tool calling: the function runs once and its output reaches the model.
async fn run_forced_function_calling_test<T: ProviderTestSetup>() {
    let case = T::case();
    let mock_server = MockServer::start().await;
    T::mount_function_calling_mocks(&mock_server).await;

    let driver = T::create_driver(&mock_server.uri()).await;
    assert_eq!(driver.provider_name(), case.name);
    assert_eq!(driver.model(), case.model);

    let executions = Arc::new(AtomicUsize::new(0));
    let text = driver
        .get_model_response_with_forced_tools(&weather_request(executions.clone()))
        .await
        .unwrap_or_else(|e| panic!("{}: forced tool calling failed: {e}", case.name));

    assert_eq!(text, WEATHER_ANSWER, "{}: final answer", case.name);
    assert_eq!(executions.load(Ordering::SeqCst), 1, "{}: function executions", case.name);

    let bodies = received_bodies(&mock_server).await;
    assert_eq!(bodies.len(), 2, "{}: provider calls", case.name);
    let output = T::tool_output(&bodies[1]).unwrap_or_else(|| panic!("{}: follow-up lacks function output", case.name));
    assert_eq!(output["location"], "Paris");
    assert_eq!(output["forecast"], "sunny");
    assert!(!T::tools_withheld(&bodies[1]), "{}: forced mode keeps tools on offer", case.name);
}

/// Single-shot mode: one tool round, then the model must answer in text.
async fn run_single_round_test<T: ProviderTestSetup>() {
    let case = T::case();
    let mock_server = MockServer::start().await;
    T::mount_function_calling_mocks(&mock_server).await;
    let driver = T::create_driver(&mock_server.uri()).await;

    let executions = Arc::new(AtomicUsize::new(0));
    let text = driver
        .get_model_response(&weather_request(executions.clone()))
        .await
        .unwrap_or_else(|e| panic!("{}: single-shot response failed: {e}", case.name));

    assert_eq!(text, WEATHER_ANSWER);
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    let bodies = received_bodies(&mock_server).await;
    assert_eq!(bodies.len(), 2);
    assert!(!T::tools_withheld(&bodies[0]), "{}: first turn offers tools", case.name);
    assert!(T::tools_withheld(&bodies[1]), "{}: follow-up withholds tools", case.name);
}

#[tokio::test]
async fn test_openai_function_calling_e2e() {
    run_forced_function_calling_test::<OpenAITestSetup>().await;
}

#[tokio::test]
async fn test_azure_function_calling_e2e() {
    run_forced_function_calling_test::<AzureTestSetup>().await;
}

#[tokio::test]
async fn test_gemini_function_calling_e2e() {
    run_forced_function_calling_test::<GeminiTestSetup>().await;
}

#[tokio::test]
async fn test_openai_single_round_e2e() {
    run_single_round_test::<OpenAITestSetup>().await;
}

#[tokio::test]
async fn test_azure_single_round_e2e() {
    run_single_round_test::<AzureTestSetup>().await;
}

#[tokio::test]
async fn test_gemini_single_round_e2e() {
    run_single_round_test::<GeminiTestSetup>().await;
}
