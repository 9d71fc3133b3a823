//! LLM client trait and the OpenAI-compatible provider implementation.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

use super::types::{
    CompletionRequest, CompletionResponse, Provider, StopReason, TokenLogprob, TokenUsage,
    TopLogprob,
};

/// LLM client trait for making completions.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Complete a prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Get the provider for this client.
    fn provider(&self) -> Provider;
}

/// Configuration for LLM clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key
    pub api_key: String,
    /// Base URL override
    pub base_url: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout_secs: 120,
        }
    }

    /// Read the provider's API key from its environment variable.
    ///
    /// Returns `None` when the variable is unset or empty.
    pub fn from_env(provider: Provider) -> Option<Self> {
        std::env::var(provider.api_key_env())
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(Self::new)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

fn build_http_client(timeout_secs: u64) -> Result<Client> {
    let timeout = Duration::from_secs(timeout_secs);

    // Some sandboxed macOS environments can panic during proxy auto-detection
    // in reqwest's default client builder. Fall back to no-proxy in that case.
    match catch_unwind(AssertUnwindSafe(|| {
        Client::builder().timeout(timeout).build()
    })) {
        Ok(Ok(client)) => Ok(client),
        Ok(Err(_)) | Err(_) => Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e))),
    }
}

/// Client for any provider speaking the chat-completions wire format.
///
/// OpenAI, DeepSeek and OpenRouter differ only in base URL and credential.
pub struct OpenAICompatibleClient {
    provider: Provider,
    config: ClientConfig,
    http: Client,
}

impl OpenAICompatibleClient {
    pub fn new(provider: Provider, config: ClientConfig) -> Result<Self> {
        let http = build_http_client(config.timeout_secs)?;

        Ok(Self {
            provider,
            config,
            http,
        })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(self.provider.default_base_url())
            .trim_end_matches('/')
    }
}

// Chat-completions API types
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    top_p: f64,
    presence_penalty: f64,
    frequency_penalty: f64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    logprobs: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_logprobs: Option<u8>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    system_fingerprint: Option<String>,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    finish_reason: Option<String>,
    #[serde(default)]
    logprobs: Option<WireLogprobs>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireLogprobs {
    #[serde(default)]
    content: Option<Vec<WireTokenLogprob>>,
}

#[derive(Debug, Deserialize)]
struct WireTokenLogprob {
    token: String,
    logprob: f64,
    #[serde(default)]
    top_logprobs: Vec<WireTopLogprob>,
}

#[derive(Debug, Deserialize)]
struct WireTopLogprob {
    token: String,
    logprob: f64,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: String,
}

impl ChatCompletionResponse {
    fn into_completion(self) -> Result<CompletionResponse> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::LLM("No choices in response".to_string()))?;

        let logprobs = choice.logprobs.and_then(|lp| lp.content).map(|tokens| {
            tokens
                .into_iter()
                .map(|t| TokenLogprob {
                    token: t.token,
                    logprob: t.logprob,
                    top_logprobs: t
                        .top_logprobs
                        .into_iter()
                        .map(|alt| TopLogprob {
                            token: alt.token,
                            logprob: alt.logprob,
                        })
                        .collect(),
                })
                .collect::<Vec<_>>()
        });

        Ok(CompletionResponse {
            id: self.id,
            model: self.model,
            system_fingerprint: self.system_fingerprint,
            content: choice.message.content.unwrap_or_default(),
            stop_reason: choice
                .finish_reason
                .as_deref()
                .map(StopReason::from_finish_reason),
            usage: self.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
            logprobs,
            timestamp: Utc::now(),
        })
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let messages = request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();

        let params = &request.params;
        let api_request = ChatCompletionRequest {
            model: &request.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            logprobs: params.logprobs,
            top_logprobs: params.top_logprobs.filter(|_| params.logprobs),
        };

        let url = format!("{}/chat/completions", self.base_url());
        debug!(provider = %self.provider, model = %request.model, "sending chat completion");

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<WireError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(Error::llm_api(
                self.provider.label(),
                Some(status.as_u16()),
                message,
            ));
        }

        let api_response: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| Error::LLM(format!("Failed to parse response: {}", e)))?;

        api_response.into_completion()
    }

    fn provider(&self) -> Provider {
        self.provider
    }
}

/// Explicitly constructed client handles, one per provider.
///
/// Injected into the orchestrator so tests can substitute fakes.
#[derive(Clone, Default)]
pub struct ProviderClients {
    clients: HashMap<Provider, Arc<dyn LLMClient>>,
}

impl ProviderClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build real clients for every provider whose API key is set.
    pub fn from_env() -> Result<Self> {
        let mut clients = Self::new();
        for provider in Provider::ALL {
            if let Some(config) = ClientConfig::from_env(provider) {
                let client = OpenAICompatibleClient::new(provider, config)?;
                clients = clients.with_client(Arc::new(client));
            } else {
                debug!(%provider, "no API key in environment");
            }
        }
        Ok(clients)
    }

    /// Add a client, keyed by the provider it reports.
    pub fn with_client(mut self, client: Arc<dyn LLMClient>) -> Self {
        let provider = client.provider();
        self.clients.insert(provider, client);
        self
    }

    /// Add a client under an explicit provider key.
    pub fn with_client_for(mut self, provider: Provider, client: Arc<dyn LLMClient>) -> Self {
        self.clients.insert(provider, client);
        self
    }

    /// Get a client for a specific provider.
    pub fn get(&self, provider: Provider) -> Option<&Arc<dyn LLMClient>> {
        self.clients.get(&provider)
    }

    pub fn contains(&self, provider: Provider) -> bool {
        self.clients.contains_key(&provider)
    }

    /// Complete using a specific provider.
    pub async fn complete_with(
        &self,
        provider: Provider,
        request: CompletionRequest,
    ) -> Result<CompletionResponse> {
        let client = self
            .clients
            .get(&provider)
            .ok_or_else(|| Error::Config(format!("No client for provider: {}", provider)))?;
        client.complete(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new("test-key")
            .with_base_url("https://custom.api.com/v1")
            .with_timeout(60);

        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.base_url, Some("https://custom.api.com/v1".to_string()));
        assert_eq!(config.timeout_secs, 60);
    }

    #[test]
    fn test_base_url_defaults_per_provider() {
        let client =
            OpenAICompatibleClient::new(Provider::DeepSeek, ClientConfig::new("k")).unwrap();
        assert_eq!(client.base_url(), "https://api.deepseek.com");

        let client = OpenAICompatibleClient::new(
            Provider::OpenRouter,
            ClientConfig::new("k").with_base_url("http://localhost:8080/v1/"),
        )
        .unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080/v1");
        assert_eq!(client.provider(), Provider::OpenRouter);
    }

    #[test]
    fn test_parse_response_with_logprobs() {
        let body = r#"{
            "id": "chatcmpl-1",
            "model": "gpt-4o-mini-2024-07-18",
            "system_fingerprint": "fp_44709d6fcb",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "TRUE"},
                "finish_reason": "stop",
                "logprobs": {"content": [
                    {"token": "TRUE", "logprob": -0.01, "bytes": [84],
                     "top_logprobs": [
                        {"token": "TRUE", "logprob": -0.01, "bytes": [84]},
                        {"token": "FALSE", "logprob": -4.6, "bytes": [70]}
                     ]}
                ]}
            }],
            "usage": {"prompt_tokens": 120, "completion_tokens": 1, "total_tokens": 121}
        }"#;

        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        let response = parsed.into_completion().unwrap();

        assert_eq!(response.content, "TRUE");
        assert_eq!(response.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(response.usage.unwrap().total(), 121);
        let logprobs = response.logprobs.as_ref().unwrap();
        assert_eq!(logprobs.len(), 1);
        assert_eq!(logprobs[0].top_logprobs.len(), 2);
        assert_eq!(logprobs[0].top_logprobs[1].token, "FALSE");
        assert!(response.model_version().contains("fp_44709d6fcb"));
    }

    #[test]
    fn test_parse_response_without_optional_fields() {
        let body = r#"{"choices": [{"message": {"content": null}, "finish_reason": "length"}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        let response = parsed.into_completion().unwrap();

        assert_eq!(response.content, "");
        assert!(response.usage.is_none());
        assert!(response.logprobs.is_none());
        assert_eq!(response.model_version(), "Unknown");
    }

    #[test]
    fn test_parse_response_without_choices_fails() {
        let parsed: ChatCompletionResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(parsed.into_completion().is_err());
    }

    #[test]
    fn test_provider_clients_registry() {
        let client: Arc<dyn LLMClient> = Arc::new(
            OpenAICompatibleClient::new(Provider::OpenAI, ClientConfig::new("k")).unwrap(),
        );
        let clients = ProviderClients::new().with_client(client);

        assert!(clients.contains(Provider::OpenAI));
        assert!(!clients.contains(Provider::DeepSeek));
        assert!(clients.get(Provider::DeepSeek).is_none());
    }
}
