use super::client::{Credential, ResponsesClient};
use crate::provider::LLMProvider;
use crate::{CompleteResponse, Error, LLMRequest, Response};

/// Azure OpenAI over the Responses API.
///
/// Requests use the deployment name as the model and authenticate with the
/// `api-key` header. Azure deployments only support their default verbosity,
/// so `text.verbosity` is never sent.
#[derive(Debug, Clone)]
pub struct AzureOpenAIProvider {
    inner: ResponsesClient,
}

impl AzureOpenAIProvider {
    /// `endpoint` is the resource root, e.g. `https://my-resource.openai.azure.com`.
    pub fn new(api_key: String, endpoint: &str, api_version: Option<String>) -> Result<Self, Error> {
        let url = format!("{}/openai/v1/responses", endpoint.trim_end_matches('/'));
        let mut inner = ResponsesClient::new("Azure OpenAI", url, Credential::ApiKey(api_key), false)?;
        if let Some(version) = api_version {
            inner = inner.with_query("api-version", version);
        }
        Ok(Self { inner })
    }
}

#[async_trait::async_trait]
impl LLMProvider for AzureOpenAIProvider {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn complete(&self, request: &LLMRequest) -> Result<CompleteResponse, Error> {
        self.inner.complete(request).await
    }

    async fn generate(&self, request: &LLMRequest) -> Result<Response, Error> {
        self.inner.generate(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Prompt, Verbosity};
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_verbosity_is_omitted() {
        let provider = AzureOpenAIProvider::new("key".to_string(), "https://example.openai.azure.com/", None).unwrap();
        let request = LLMRequest::from_prompt("my-deployment", &Prompt::user("hi")).verbosity(Verbosity::High);

        let body = serde_json::to_value(provider.inner.convert_request(&request, false)).unwrap();
        assert_eq!(body["model"], "my-deployment");
        assert!(body.get("text").is_none());
    }

    #[tokio::test]
    async fn test_api_key_header_and_version_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/v1/responses"))
            .and(header("api-key", "azure-key"))
            .and(query_param("api-version", "preview"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "completed",
                "output": [{"type": "message", "content": [{"type": "output_text", "text": "hello from azure"}]}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider =
            AzureOpenAIProvider::new("azure-key".to_string(), &server.uri(), Some("preview".to_string())).unwrap();
        let request = LLMRequest::from_prompt("my-deployment", &Prompt::user("hi"));
        let reply = provider.complete(&request).await.unwrap();
        assert_eq!(reply.content(), "hello from azure");
        assert_eq!(provider.name(), "Azure OpenAI");
    }

    #[tokio::test]
    async fn test_content_filter_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/v1/responses"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": "content_filter", "message": "The prompt was filtered"}
            })))
            .mount(&server)
            .await;

        let provider = AzureOpenAIProvider::new("azure-key".to_string(), &server.uri(), None).unwrap();
        let request = LLMRequest::from_prompt("my-deployment", &Prompt::user("bad"));
        match provider.complete(&request).await.unwrap_err() {
            Error::Transport { failure, .. } => {
                assert_eq!(
                    crate::classify::classify(&failure),
                    crate::classify::FailureClass::ContentFiltered
                );
                assert_eq!(failure.message, "The prompt was filtered");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
