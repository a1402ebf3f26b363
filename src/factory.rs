use crate::driver::ChatDriver;
use crate::orchestrator::DEFAULT_MAX_TOOL_ROUNDS;
use crate::retry::RetryPolicy;
use crate::{AzureOpenAIProvider, Error, GeminiProvider, LLMProvider, OpenAIProvider};
use std::env;
use std::str::FromStr;

const DEFAULT_GOOGLE_REGION: &str = "europe-west1";

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    OpenAI,
    AzureOpenAI,
    Gemini,
}

impl FromStr for ProviderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderType::OpenAI),
            "azure" | "azure_openai" | "azureopenai" => Ok(ProviderType::AzureOpenAI),
            "gemini" | "google" | "vertex" => Ok(ProviderType::Gemini),
            other => Err(Error::config(format!(
                "Invalid provider '{other}'. Valid values are: openai, azure, gemini"
            ))),
        }
    }
}

/// Coarse model choice, mapped to a default model per provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelTier {
    Fast,
    #[default]
    Standard,
    Advanced,
}

impl ModelTier {
    /// The default model for this tier. Azure has none: the deployment decides.
    pub fn default_model(&self, provider_type: ProviderType) -> Option<&'static str> {
        match (provider_type, self) {
            (ProviderType::OpenAI, ModelTier::Fast) => Some("gpt-5-nano"),
            (ProviderType::OpenAI, ModelTier::Standard) => Some("gpt-5-mini"),
            (ProviderType::OpenAI, ModelTier::Advanced) => Some("gpt-5"),
            (ProviderType::Gemini, ModelTier::Fast) => Some("gemini-2.5-flash-lite"),
            (ProviderType::Gemini, ModelTier::Standard) => Some("gemini-2.5-flash"),
            (ProviderType::Gemini, ModelTier::Advanced) => Some("gemini-2.5-pro"),
            (ProviderType::AzureOpenAI, _) => None,
        }
    }
}

/// Configuration for creating providers.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub provider_type: ProviderType,
    pub api_key: Option<String>,
    /// OpenAI or Gemini API base URL override, or the Azure resource endpoint.
    pub base_url: Option<String>,
    pub deployment: Option<String>,
    pub api_version: Option<String>,
    pub project_id: Option<String>,
    pub location: Option<String>,
    pub access_token: Option<String>,
    /// Explicit model; overrides `tier`.
    pub model: Option<String>,
    pub tier: ModelTier,
}

impl ProviderConfig {
    fn empty(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            api_key: None,
            base_url: None,
            deployment: None,
            api_version: None,
            project_id: None,
            location: None,
            access_token: None,
            model: None,
            tier: ModelTier::default(),
        }
    }

    /// Create configuration for OpenAI provider.
    pub fn openai(api_key: String) -> Self {
        Self {
            api_key: Some(api_key),
            ..Self::empty(ProviderType::OpenAI)
        }
    }

    /// Create configuration for an Azure OpenAI deployment.
    pub fn azure(api_key: String, endpoint: String, deployment: String) -> Self {
        Self {
            api_key: Some(api_key),
            base_url: Some(endpoint),
            deployment: Some(deployment),
            ..Self::empty(ProviderType::AzureOpenAI)
        }
    }

    /// Create configuration for the Gemini API.
    pub fn gemini(api_key: String) -> Self {
        Self {
            api_key: Some(api_key),
            ..Self::empty(ProviderType::Gemini)
        }
    }

    /// Create configuration for Gemini on Vertex AI with an access token.
    pub fn vertex(project_id: String, location: String, access_token: String) -> Self {
        Self {
            access_token: Some(access_token),
            ..Self::vertex_with_adc(project_id, location)
        }
    }

    /// Create configuration for Gemini on Vertex AI with Application Default Credentials.
    pub fn vertex_with_adc(project_id: String, location: String) -> Self {
        Self {
            project_id: Some(project_id),
            location: Some(location),
            ..Self::empty(ProviderType::Gemini)
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    /// The model requests are sent to: explicit model, else the Azure
    /// deployment, else the tier default.
    pub fn resolve_model(&self) -> Result<String, Error> {
        if let Some(model) = &self.model {
            return Ok(model.clone());
        }
        if self.provider_type == ProviderType::AzureOpenAI {
            return self
                .deployment
                .clone()
                .ok_or_else(|| Error::config("Deployment name required for Azure OpenAI provider"));
        }
        self.tier
            .default_model(self.provider_type)
            .map(str::to_string)
            .ok_or_else(|| Error::config(format!("No default model for {:?}", self.provider_type)))
    }

    /// Create configuration for `provider_type` from environment variables.
    pub fn from_env(provider_type: ProviderType) -> Result<Self, Error> {
        Self::from_lookup(provider_type, |name| env::var(name).ok())
    }

    /// Create configuration from environment variables, choosing the provider
    /// from `CHAT_DRIVER_PROVIDER` or, when unset, from the credentials present.
    pub fn from_env_any() -> Result<Self, Error> {
        Self::from_lookup_any(|name| env::var(name).ok())
    }

    fn from_lookup_any(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        if let Some(provider) = lookup("CHAT_DRIVER_PROVIDER") {
            return Self::from_lookup(provider.parse()?, lookup);
        }

        let provider_type = if lookup("OPENAI_API_KEY").is_some() {
            ProviderType::OpenAI
        } else if lookup("AZURE_OPENAI_API_KEY").is_some() {
            ProviderType::AzureOpenAI
        } else if lookup("GEMINI_API_KEY").is_some() || lookup("GOOGLE_CLOUD_PROJECT").is_some() {
            ProviderType::Gemini
        } else {
            return Err(Error::config(
                "No provider credentials found in environment. Set CHAT_DRIVER_PROVIDER (openai/azure/gemini) with the matching credentials",
            ));
        };
        Self::from_lookup(provider_type, lookup)
    }

    fn from_lookup(provider_type: ProviderType, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let require = |name: &str, provider: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| {
                    Error::config(format!("{name} environment variable is required for {provider}"))
                })
        };

        match provider_type {
            ProviderType::OpenAI => {
                let mut config = Self::openai(require("OPENAI_API_KEY", "OpenAI")?);
                config.base_url = lookup("OPENAI_BASE_URL");
                Ok(config)
            }
            ProviderType::AzureOpenAI => {
                let mut config = Self::azure(
                    require("AZURE_OPENAI_API_KEY", "Azure OpenAI")?,
                    require("AZURE_OPENAI_ENDPOINT", "Azure OpenAI")?,
                    require("AZURE_OPENAI_DEPLOYMENT", "Azure OpenAI")?,
                );
                config.api_version = lookup("AZURE_OPENAI_API_VERSION");
                Ok(config)
            }
            ProviderType::Gemini => {
                if let Some(api_key) = lookup("GEMINI_API_KEY") {
                    return Ok(Self::gemini(api_key));
                }
                let project_id = lookup("GOOGLE_CLOUD_PROJECT").ok_or_else(|| {
                    Error::config(
                        "GEMINI_API_KEY or GOOGLE_CLOUD_PROJECT environment variable is required for Gemini",
                    )
                })?;
                let location = lookup("GOOGLE_CLOUD_REGION").unwrap_or_else(|| DEFAULT_GOOGLE_REGION.to_string());

                Ok(match lookup("VERTEX_ACCESS_TOKEN") {
                    Some(access_token) => Self::vertex(project_id, location, access_token),
                    None => Self::vertex_with_adc(project_id, location),
                })
            }
        }
    }
}

/// Driver settings that are not provider credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    pub retry: RetryPolicy,
    pub max_tool_rounds: usize,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

/// Factory for creating LLM providers and drivers.
pub struct ProviderFactory;

impl ProviderFactory {
    /// Create a provider from configuration.
    pub async fn create_provider(config: &ProviderConfig) -> Result<Box<dyn LLMProvider>, Error> {
        let required = |value: &Option<String>, what: &str| {
            value.clone().ok_or_else(|| {
                Error::config(format!("{what} required for {:?} provider", config.provider_type))
            })
        };

        match config.provider_type {
            ProviderType::OpenAI => {
                let api_key = required(&config.api_key, "API key")?;
                let provider = match &config.base_url {
                    Some(base_url) => OpenAIProvider::new_with_base_url(api_key, base_url.clone())?,
                    None => OpenAIProvider::new(api_key)?,
                };
                Ok(Box::new(provider))
            }
            ProviderType::AzureOpenAI => {
                let api_key = required(&config.api_key, "API key")?;
                let endpoint = required(&config.base_url, "Endpoint")?;
                let provider = AzureOpenAIProvider::new(api_key, &endpoint, config.api_version.clone())?;
                Ok(Box::new(provider))
            }
            ProviderType::Gemini => {
                if let Some(api_key) = &config.api_key {
                    let provider = match &config.base_url {
                        Some(base_url) => GeminiProvider::new_with_base_url(api_key.clone(), base_url.clone())?,
                        None => GeminiProvider::new(api_key.clone())?,
                    };
                    return Ok(Box::new(provider));
                }

                let project_id = required(&config.project_id, "Project ID or API key")?;
                let location = required(&config.location, "Location")?;
                let provider = match (&config.access_token, &config.base_url) {
                    (Some(token), Some(base_url)) => {
                        GeminiProvider::vertex_with_base_url(project_id, location, token.clone(), base_url.clone())?
                    }
                    (Some(token), None) => GeminiProvider::vertex(project_id, location, token.clone())?,
                    (None, _) => GeminiProvider::vertex_with_adc(project_id, location).await?,
                };
                Ok(Box::new(provider))
            }
        }
    }

    /// Create a chat driver. Missing credentials fail here, never on the first call.
    pub async fn create(config: &ProviderConfig, options: DriverOptions) -> Result<ChatDriver, Error> {
        let model = config.resolve_model()?;
        let provider = Self::create_provider(config).await?;
        tracing::debug!(provider = provider.name(), %model, "chat driver created");

        Ok(ChatDriver::from_boxed(provider, model)
            .with_retry_policy(options.retry)
            .with_max_tool_rounds(options.max_tool_rounds))
    }

    /// Create a chat driver from environment variables.
    pub async fn from_env() -> Result<ChatDriver, Error> {
        let config = ProviderConfig::from_env_any()?;
        Self::create(&config, DriverOptions::default()).await
    }
}
