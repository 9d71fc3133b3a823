//! Metrics extracted from a successful provider response.
//!
//! Everything here is a pure function of the response, the row's expected
//! answer and the measured call time.

mod confidence;
mod quality;
mod reasoning;

pub use confidence::{entropy_bits, logprob_to_probability, ConfidenceMetrics};
pub use quality::HeuristicQuality;
pub use reasoning::{
    connector_count, extract_reasoning_steps, has_reasoning_marker, strip_think_blocks,
    MAX_REASONING_STEPS, MIN_STEP_CHARS,
};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::llm::{CompletionResponse, TokenUsage};
use crate::question::AnswerType;

/// Telemetry for one successful (row, model) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMetrics {
    pub confidence: ConfidenceMetrics,
    pub reasoning_steps: Vec<String>,
    pub heuristic: HeuristicQuality,
    pub token_usage: Option<TokenUsage>,
    pub response_time_seconds: f64,
}

impl ResponseMetrics {
    pub fn extract(
        response: &CompletionResponse,
        expected: Option<&str>,
        answer_type: AnswerType,
        elapsed: Duration,
    ) -> Self {
        Self {
            confidence: ConfidenceMetrics::from_logprobs(response.logprobs.as_deref()),
            reasoning_steps: extract_reasoning_steps(&response.content),
            heuristic: HeuristicQuality::assess(&response.content, expected, answer_type),
            token_usage: response.usage,
            response_time_seconds: round3(elapsed.as_secs_f64()),
        }
    }

    pub fn reasoning_step_count(&self) -> usize {
        self.reasoning_steps.len()
    }
}

/// Round to millisecond precision for reporting.
pub(crate) fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
