//! Dispatch and retry engine.
//!
//! Each (row, model) pair is attempted up to [`RetryPolicy::max_attempts`]
//! times with a fixed sleep between attempts. The engine never escalates a
//! provider failure: the last failure is classified into a marker string
//! that ends up in the result table.
//!
//! Per-pair state machine:
//!
//! ```text
//! Pending -> InFlight -> Success
//!               |   ^
//!               v   |
//!            RetryWait
//!               |
//!   InFlight -> Failed   (no attempts left)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

use crate::error::Error;
use crate::llm::{CompletionRequest, CompletionResponse, LLMClient};

/// Default number of attempts per pair.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;
/// Default fixed sleep between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Retry ceiling and backoff, fixed for a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    #[serde(alias = "max_retries")]
    pub max_attempts: u32,
    /// Sleep between attempts, serialized as fractional seconds
    #[serde(
        rename = "backoff_seconds",
        alias = "retry_backoff_seconds",
        with = "duration_secs"
    )]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!(
                "backoff must be a non-negative number of seconds, got {}",
                secs
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

/// Lifecycle state of a (row, model) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Pending,
    InFlight,
    RetryWait,
    Success,
    Failed,
}

impl AttemptState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: AttemptState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InFlight)
                | (Self::InFlight, Self::Success)
                | (Self::InFlight, Self::RetryWait)
                | (Self::InFlight, Self::Failed)
                | (Self::RetryWait, Self::InFlight)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

/// Classified provider failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum FailureClass {
    /// Failure carrying an HTTP status
    Http { status: u16, message: String },
    /// Failure whose message mentions a rate limit
    RateLimit { message: String },
    /// Anything else, tagged with the error kind
    Other { kind: String, message: String },
}

impl FailureClass {
    /// Marker string stored in place of a response.
    pub fn render(&self) -> String {
        match self {
            Self::Http { status, message } => format!("[ERROR] HTTP {}: {}", status, message),
            Self::RateLimit { message } => format!("[ERROR] Rate limit: {}", message),
            Self::Other { kind, message } => format!("[ERROR] {}: {}", kind, message),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &str {
        match self {
            Self::Http { .. } => "Http",
            Self::RateLimit { .. } => "RateLimit",
            Self::Other { kind, .. } => kind,
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

fn failure_message(err: &Error) -> String {
    match err {
        Error::LlmApi { message, .. } => message.clone(),
        Error::LLM(message)
        | Error::Config(message)
        | Error::Validation(message)
        | Error::Internal(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Classify an error.
///
/// Precedence is fixed: explicit status on a provider error, then the status
/// of a nested HTTP response, then a "rate limit" mention, then the generic
/// kind. The status checks are not exhaustive for every provider.
pub fn classify_failure(err: &Error) -> FailureClass {
    let message = failure_message(err);

    if let Some(status) = err.status_code() {
        return FailureClass::Http { status, message };
    }
    if let Some(status) = err.nested_status_code() {
        return FailureClass::Http { status, message };
    }
    if message.to_lowercase().contains("rate limit") {
        return FailureClass::RateLimit { message };
    }
    FailureClass::Other {
        kind: err.kind_name().to_string(),
        message,
    }
}

/// Terminal outcome of one attempt.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Success {
        content: String,
        response: CompletionResponse,
    },
    Failure(FailureClass),
}

/// One provider call.
#[derive(Debug, Clone)]
pub struct QueryAttempt {
    pub row_index: usize,
    pub display_name: String,
    /// 1-based
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Wall time of the provider call
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

impl QueryAttempt {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success { .. })
    }

    /// Content on success, failure marker otherwise.
    pub fn response_text(&self) -> String {
        match &self.outcome {
            AttemptOutcome::Success { content, .. } => content.clone(),
            AttemptOutcome::Failure(class) => class.render(),
        }
    }
}

/// Identifies the pair being dispatched, for attempts and logs.
#[derive(Debug, Clone, Copy)]
pub struct PairKey<'a> {
    pub row_index: usize,
    pub display_name: &'a str,
}

/// Everything that happened to one pair.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// Every attempt made, in order
    pub attempts: Vec<QueryAttempt>,
    /// `Success` or `Failed`
    pub state: AttemptState,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        self.state == AttemptState::Success
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// The attempt that ended the pair.
    pub fn last_attempt(&self) -> Option<&QueryAttempt> {
        self.attempts.last()
    }

    /// Stored response: content on success, classified marker on failure.
    pub fn response_text(&self) -> String {
        self.last_attempt()
            .map(QueryAttempt::response_text)
            .unwrap_or_else(|| "[ERROR] No response".to_string())
    }

    /// Provider response and its call time, when the pair succeeded.
    pub fn success(&self) -> Option<(&CompletionResponse, Duration)> {
        match self.last_attempt() {
            Some(QueryAttempt {
                outcome: AttemptOutcome::Success { response, .. },
                elapsed,
                ..
            }) => Some((response, *elapsed)),
            _ => None,
        }
    }
}

/// Call the provider until it succeeds or attempts run out.
#[instrument(skip(client, request, policy, key), fields(row = key.row_index, model = key.display_name))]
pub async fn dispatch_with_retry(
    client: &dyn LLMClient,
    request: &CompletionRequest,
    policy: &RetryPolicy,
    key: PairKey<'_>,
) -> DispatchOutcome {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = Vec::with_capacity(max_attempts as usize);
    let mut state = AttemptState::Pending;

    for attempt_number in 1..=max_attempts {
        debug_assert!(state.can_transition_to(AttemptState::InFlight));
        state = AttemptState::InFlight;

        let started_at = Utc::now();
        let clock = Instant::now();
        let result = client.complete(request.clone()).await;
        let elapsed = clock.elapsed();
        let ended_at = Utc::now();

        let outcome = match result {
            Ok(response) => AttemptOutcome::Success {
                content: response.content.clone(),
                response,
            },
            Err(err) => {
                let class = classify_failure(&err);
                warn!(
                    attempt = attempt_number,
                    max_attempts,
                    kind = class.kind(),
                    error = %err,
                    "provider call failed"
                );
                AttemptOutcome::Failure(class)
            }
        };
        let succeeded = matches!(outcome, AttemptOutcome::Success { .. });

        attempts.push(QueryAttempt {
            row_index: key.row_index,
            display_name: key.display_name.to_string(),
            attempt_number,
            started_at,
            ended_at,
            elapsed,
            outcome,
        });

        if succeeded {
            state = AttemptState::Success;
            debug!(
                attempt = attempt_number,
                elapsed_ms = elapsed.as_millis() as u64,
                "provider call succeeded"
            );
            break;
        }
        if attempt_number == max_attempts {
            state = AttemptState::Failed;
            break;
        }

        state = AttemptState::RetryWait;
        tokio::time::sleep(policy.backoff).await;
    }

    DispatchOutcome { attempts, state }
}
