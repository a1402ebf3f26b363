use super::openai::{mount_responses_exchange, responses_tool_output};
use super::{create_driver, ProviderCase, ProviderTestSetup};
use chat_driver::{ChatDriver, ProviderConfig};
use serde_json::Value;
use wiremock::MockServer;

pub struct AzureTestSetup;

pub const DEPLOYMENT: &str = "gpt5-mini-eu";
pub const RESPONSES_PATH: &str = "/openai/v1/responses";

pub fn azure_config(base_url: &str) -> ProviderConfig {
    ProviderConfig::azure("azure-test-key".to_string(), base_url.to_string(), DEPLOYMENT.to_string())
        .with_api_version("preview")
}

#[async_trait::async_trait]
impl ProviderTestSetup for AzureTestSetup {
    fn case() -> ProviderCase {
        ProviderCase {
            name: "Azure OpenAI",
            model: DEPLOYMENT,
        }
    }

    async fn create_driver(base_url: &str) -> ChatDriver {
        create_driver(azure_config(base_url)).await
    }

    async fn mount_function_calling_mocks(mock_server: &MockServer) {
        mount_responses_exchange(mock_server, RESPONSES_PATH, ("api-key", "azure-test-key")).await;
    }

    fn tool_output(body: &Value) -> Option<Value> {
        responses_tool_output(body)
    }

    fn tools_withheld(body: &Value) -> bool {
        body["tool_choice"] == "none"
    }
}
