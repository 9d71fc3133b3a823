//! LLM client abstraction over the three OpenAI-compatible providers.
//!
//! Clients are constructed explicitly and handed to the orchestrator through
//! [`ProviderClients`]; there is no process-wide client state.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ontobench_core::llm::{
//!     ClientConfig, CompletionRequest, ModelSpec, OpenAICompatibleClient, Provider,
//!     ProviderClients,
//! };
//! use std::sync::Arc;
//!
//! let openai = OpenAICompatibleClient::new(Provider::OpenAI, ClientConfig::new("sk-..."))?;
//! let clients = ProviderClients::new().with_client(Arc::new(openai));
//!
//! let spec = ModelSpec::gpt4o_mini();
//! let request = CompletionRequest::for_model(&spec, "Is Alice a Person?");
//! let response = clients.complete_with(spec.provider, request).await?;
//! ```

mod client;
mod types;

pub use client::{ClientConfig, LLMClient, OpenAICompatibleClient, ProviderClients};
pub use types::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, GenerationParams, ModelSpec,
    Provider, StopReason, TokenLogprob, TokenUsage, TopLogprob,
};
