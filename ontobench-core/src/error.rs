//! Error types for ontobench-core.

use thiserror::Error;

/// Result type alias using ontobench-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while preparing or running an experiment.
#[derive(Error, Debug)]
pub enum Error {
    /// Provider returned a non-success response
    #[error("{provider} API error{}: {message}", status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    LlmApi {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    /// Transport-level HTTP failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// LLM error (simple variant)
    #[error("LLM error: {0}")]
    LLM(String),

    /// Timeout during operation
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Batch rejected before dispatch
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an LLM API error.
    pub fn llm_api(
        provider: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::LlmApi {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Short variant name, used in generic failure strings.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::LlmApi { .. } => "LlmApi",
            Self::Http(_) => "Http",
            Self::LLM(_) => "LLM",
            Self::Timeout { .. } => "Timeout",
            Self::Config(_) => "Config",
            Self::Validation(_) => "Validation",
            Self::Io(_) => "Io",
            Self::Csv(_) => "Csv",
            Self::Serialization(_) => "Serialization",
            Self::Internal(_) => "Internal",
        }
    }

    /// Status code carried directly by a provider API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::LlmApi { status, .. } => *status,
            _ => None,
        }
    }

    /// Status code of the HTTP response nested inside a transport error.
    pub fn nested_status_code(&self) -> Option<u16> {
        match self {
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
