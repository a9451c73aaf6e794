//! Stateless per-call dispatch to the configured provider.

use std::sync::Arc;
use std::time::Duration;

use credential_vault::{CredentialStore, ExposeSecret, SecretString};
use reqwest::RequestBuilder;
use tracing::{debug, warn};

use crate::error::{LlmError, Result};
use crate::providers::{anthropic, custom, gemini, openai};
use crate::types::{
    ChatMessage, InferenceConfig, InferenceResponse, Provider, Sampling, DEFAULT_MAX_TOKENS,
    DEFAULT_TEMPERATURE, DEFAULT_TIMEOUT_SECS, DEFAULT_TOP_P,
};

/// Client for one provider/model pair.
///
/// The API key is looked up in the credential store on every call and
/// dropped when the call returns.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    config: InferenceConfig,
    sampling: Sampling,
    credentials: Arc<CredentialStore>,
    http: reqwest::Client,
}

impl InferenceClient {
    pub fn new(config: InferenceConfig, credentials: Arc<CredentialStore>) -> Result<Self> {
        if config.model.trim().is_empty() {
            return Err(LlmError::InvalidConfig("model is required".to_string()));
        }
        if config.provider == Provider::Custom
            && config.endpoint.as_deref().map_or(true, |e| e.trim().is_empty())
        {
            return Err(LlmError::InvalidConfig(
                "custom provider requires an endpoint".to_string(),
            ));
        }

        let sampling = Sampling {
            temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: config.top_p.unwrap_or(DEFAULT_TOP_P),
            max_tokens: config.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(
                config.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .build()
            .map_err(|e| LlmError::Request {
                provider: config.provider,
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            config,
            sampling,
            credentials,
            http,
        })
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Sampling parameters with defaults applied.
    pub fn sampling(&self) -> Sampling {
        self.sampling
    }

    /// Send `messages` to the provider and map its reply. No retries.
    pub async fn generate(&self, messages: &[ChatMessage]) -> Result<InferenceResponse> {
        if messages.is_empty() {
            return Err(LlmError::InvalidConfig(
                "at least one message is required".to_string(),
            ));
        }

        let provider = self.config.provider;
        let model = self.config.model.as_str();
        let api_key = self.api_key()?;

        debug!(
            provider = %provider,
            model = %model,
            messages = messages.len(),
            "sending inference request"
        );

        let request = self.build(messages, api_key.as_ref())?;
        // Key is in the builder now; drop our copy before awaiting.
        drop(api_key);

        let response = request.send().await.map_err(|e| LlmError::Request {
            provider,
            reason: e.without_url().to_string(),
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| LlmError::Request {
            provider,
            reason: format!("failed to read response body: {}", e.without_url()),
        })?;

        if !status.is_success() {
            warn!(provider = %provider, status = status.as_u16(), "provider returned error status");
            return Err(LlmError::ProviderApi {
                provider,
                status: status.as_u16(),
                body,
            });
        }

        let parsed = match provider {
            Provider::OpenAi | Provider::Ollama => openai::parse_response(provider, model, &body),
            Provider::Anthropic => anthropic::parse_response(model, &body),
            Provider::Gemini => gemini::parse_response(model, &body),
            Provider::Custom => custom::parse_response(model, &body),
        }?;

        debug!(
            provider = %provider,
            total_tokens = parsed.usage.total_tokens,
            finish_reason = ?parsed.finish_reason,
            "inference complete"
        );
        Ok(parsed)
    }

    fn base_url(&self) -> Result<&str> {
        self.config
            .endpoint
            .as_deref()
            .or_else(|| self.config.provider.default_base_url())
            .ok_or_else(|| LlmError::InvalidConfig("no endpoint configured".to_string()))
    }

    /// Key for this call. Providers that need one fail if it is unresolved.
    fn api_key(&self) -> Result<Option<SecretString>> {
        let name = self
            .config
            .api_key_credential
            .as_deref()
            .or_else(|| self.config.provider.default_credential());
        match name {
            Some(name) => Ok(Some(self.credentials.get(name)?)),
            None => Ok(None),
        }
    }

    fn build(&self, messages: &[ChatMessage], key: Option<&SecretString>) -> Result<RequestBuilder> {
        let base = self.base_url()?;
        let model = self.config.model.as_str();
        let key = key.map(|k| k.expose_secret());

        let builder = match self.config.provider {
            Provider::OpenAi | Provider::Ollama => {
                let body = openai::build_request(model, messages, self.sampling);
                bearer(self.http.post(openai::url(base)), key).json(&body)
            }
            Provider::Anthropic => {
                let body = anthropic::build_request(model, messages, self.sampling);
                let mut builder = self
                    .http
                    .post(anthropic::url(base))
                    .header("anthropic-version", anthropic::API_VERSION);
                if let Some(key) = key {
                    builder = builder.header("x-api-key", key);
                }
                builder.json(&body)
            }
            Provider::Gemini => {
                let body = gemini::build_request(messages, self.sampling);
                let mut builder = self.http.post(gemini::url(base, model));
                if let Some(key) = key {
                    builder = builder.query(&[("key", key)]);
                }
                builder.json(&body)
            }
            Provider::Custom => {
                let body = openai::build_request(model, messages, self.sampling);
                bearer(self.http.post(base), key).json(&body)
            }
        };
        Ok(builder)
    }
}

fn bearer(builder: RequestBuilder, key: Option<&str>) -> RequestBuilder {
    match key {
        Some(key) => builder.bearer_auth(key),
        None => builder,
    }
}
