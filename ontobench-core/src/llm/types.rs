//! LLM types for requests, responses, and model definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    OpenAI,
    DeepSeek,
    OpenRouter,
}

impl Provider {
    /// All supported providers, in a stable order.
    pub const ALL: [Provider; 3] = [Provider::OpenAI, Provider::DeepSeek, Provider::OpenRouter];

    /// Environment variable holding the provider's API key.
    pub fn api_key_env(self) -> &'static str {
        match self {
            Self::OpenAI => "OPENAI_API_KEY",
            Self::DeepSeek => "DEEPSEEK_API_KEY",
            Self::OpenRouter => "OPENROUTER_API_KEY",
        }
    }

    /// Base URL of the provider's OpenAI-compatible endpoint.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAI => "https://api.openai.com/v1",
            Self::DeepSeek => "https://api.deepseek.com",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
        }
    }

    /// Human-readable label used in call logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::OpenAI => "OpenAI",
            Self::DeepSeek => "DeepSeek",
            Self::OpenRouter => "OpenRouter",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAI => write!(f, "openai"),
            Self::DeepSeek => write!(f, "deepseek"),
            Self::OpenRouter => write!(f, "openrouter"),
        }
    }
}

/// Sampling parameters sent with every request for a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    /// Ask the provider for per-token log-probabilities
    #[serde(default)]
    pub logprobs: bool,
    /// Number of alternatives per token (only with `logprobs`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_logprobs: Option<u8>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 4096,
            top_p: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            logprobs: false,
            top_logprobs: None,
        }
    }
}

impl GenerationParams {
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Request log-probabilities with `top` alternatives per token.
    pub fn with_logprobs(mut self, top: u8) -> Self {
        self.logprobs = true;
        self.top_logprobs = Some(top.min(20));
        self
    }
}

/// A configured target model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Stable key used for result column naming
    pub display_name: String,
    /// Identifier passed to the provider's API
    pub provider_model_id: String,
    /// Provider that serves this model
    pub provider: Provider,
    /// Generation parameters, immutable per run
    #[serde(default)]
    pub generation_params: GenerationParams,
}

impl ModelSpec {
    pub fn new(
        display_name: impl Into<String>,
        provider_model_id: impl Into<String>,
        provider: Provider,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            provider_model_id: provider_model_id.into(),
            provider,
            generation_params: GenerationParams::default(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.generation_params = params;
        self
    }
}

/// Well-known models.
impl ModelSpec {
    pub fn gpt4o_mini() -> Self {
        Self::new("gpt-4o-mini", "gpt-4o-mini", Provider::OpenAI)
    }

    pub fn deepseek_reasoner() -> Self {
        Self::new("deepseek-reasoner", "deepseek-reasoner", Provider::DeepSeek)
    }

    pub fn llama4_maverick() -> Self {
        Self::new(
            "llama-4-maverick",
            "meta-llama/llama-4-maverick",
            Provider::OpenRouter,
        )
    }

    /// The three-provider model set used by the experiments.
    pub fn default_set() -> Vec<Self> {
        vec![
            Self::gpt4o_mini(),
            Self::deepseek_reasoner(),
            Self::llama4_maverick(),
        ]
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Provider model id
    pub model: String,
    /// Conversation messages
    pub messages: Vec<ChatMessage>,
    /// Sampling parameters
    pub params: GenerationParams,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            params: GenerationParams::default(),
        }
    }

    /// Single-turn user request for a configured model.
    pub fn for_model(spec: &ModelSpec, prompt: impl Into<String>) -> Self {
        Self::new(&spec.provider_model_id)
            .with_params(spec.generation_params.clone())
            .with_message(ChatMessage::user(prompt))
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// One alternative candidate for a generated token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopLogprob {
    pub token: String,
    pub logprob: f64,
}

/// Log-probability of a generated token and its top alternatives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLogprob {
    pub token: String,
    pub logprob: f64,
    #[serde(default)]
    pub top_logprobs: Vec<TopLogprob>,
}

impl TokenLogprob {
    pub fn new(token: impl Into<String>, logprob: f64) -> Self {
        Self {
            token: token.into(),
            logprob,
            top_logprobs: Vec::new(),
        }
    }

    pub fn with_alternative(mut self, token: impl Into<String>, logprob: f64) -> Self {
        self.top_logprobs.push(TopLogprob {
            token: token.into(),
            logprob,
        });
        self
    }
}

/// Completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Response ID
    pub id: String,
    /// Model reported by the provider
    pub model: String,
    /// Backend fingerprint, when the provider reports one
    pub system_fingerprint: Option<String>,
    /// Generated content
    pub content: String,
    /// Stop reason
    pub stop_reason: Option<StopReason>,
    /// Token usage, when the provider reports it
    pub usage: Option<TokenUsage>,
    /// Per-token log-probabilities, when requested and returned
    pub logprobs: Option<Vec<TokenLogprob>>,
    /// Response timestamp
    pub timestamp: DateTime<Utc>,
}

impl CompletionResponse {
    /// Model version string: reported model plus fingerprint if present.
    pub fn model_version(&self) -> String {
        let mut version = if self.model.is_empty() {
            "Unknown".to_string()
        } else {
            self.model.clone()
        };
        if let Some(fp) = &self.system_fingerprint {
            version.push_str(&format!(" (fingerprint: {})", fp));
        }
        version
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ContentFilter,
    ToolUse,
}

impl StopReason {
    pub fn from_finish_reason(reason: &str) -> Self {
        match reason {
            "length" => Self::MaxTokens,
            "content_filter" => Self::ContentFilter,
            "tool_calls" | "function_call" => Self::ToolUse,
            _ => Self::EndTurn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model_set() {
        let models = ModelSpec::default_set();
        assert_eq!(models.len(), 3);
        assert_eq!(models[0].provider, Provider::OpenAI);
        assert_eq!(models[1].provider, Provider::DeepSeek);
        assert_eq!(models[2].provider_model_id, "meta-llama/llama-4-maverick");
        assert!(models
            .iter()
            .all(|m| m.generation_params == GenerationParams::default()));
    }

    #[test]
    fn test_completion_request_for_model() {
        let spec = ModelSpec::gpt4o_mini()
            .with_params(GenerationParams::default().with_max_tokens(256).with_logprobs(5));
        let req = CompletionRequest::for_model(&spec, "Is X a Y?");

        assert_eq!(req.model, "gpt-4o-mini");
        assert_eq!(req.messages, vec![ChatMessage::user("Is X a Y?")]);
        assert_eq!(req.params.max_tokens, 256);
        assert!(req.params.logprobs);
        assert_eq!(req.params.top_logprobs, Some(5));
    }

    #[test]
    fn test_model_version_with_fingerprint() {
        let response = CompletionResponse {
            id: "r1".to_string(),
            model: "gpt-4o-mini-2024-07-18".to_string(),
            system_fingerprint: Some("fp_abc".to_string()),
            content: "TRUE".to_string(),
            stop_reason: Some(StopReason::EndTurn),
            usage: None,
            logprobs: None,
            timestamp: Utc::now(),
        };
        assert_eq!(
            response.model_version(),
            "gpt-4o-mini-2024-07-18 (fingerprint: fp_abc)"
        );
    }

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(StopReason::from_finish_reason("stop"), StopReason::EndTurn);
        assert_eq!(StopReason::from_finish_reason("length"), StopReason::MaxTokens);
        assert_eq!(
            StopReason::from_finish_reason("content_filter"),
            StopReason::ContentFilter
        );
    }

    #[test]
    fn test_provider_env_and_urls() {
        assert_eq!(Provider::DeepSeek.api_key_env(), "DEEPSEEK_API_KEY");
        assert_eq!(
            Provider::OpenRouter.default_base_url(),
            "https://openrouter.ai/api/v1"
        );
        assert_eq!(Provider::OpenAI.to_string(), "openai");
    }
}
