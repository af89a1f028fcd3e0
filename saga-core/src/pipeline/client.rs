//! Schema-constrained model client with retry.
//!
//! [`Generator`] is the seam between the pipeline and the model provider.
//! [`ClaudeModel`] makes exactly one request per call; [`ResilientModel`]
//! wraps any generator and retries rate-limited calls with exponential
//! backoff and jitter. Nothing else is retried.

use super::schema::Validate;
use super::Stage;
use async_trait::async_trait;
use claude::{Claude, Message, Request, StructuredOutput, Tool};
use rand::Rng;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// How a model call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    /// Bad or missing credential. Never retried.
    Auth,
    /// Provider rate limit or overload. Retried with backoff.
    RateLimited,
    /// The response did not parse or did not match the schema.
    MalformedResponse,
    /// Anything else: network, HTTP errors, provider faults.
    Transport,
}

impl fmt::Display for ModelErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelErrorKind::Auth => "authentication failed",
            ModelErrorKind::RateLimited => "rate limited",
            ModelErrorKind::MalformedResponse => "malformed response",
            ModelErrorKind::Transport => "transport error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub message: String,
}

impl ModelError {
    pub fn new(kind: ModelErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Auth, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::RateLimited, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::MalformedResponse, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ModelErrorKind::Transport, message)
    }

    pub fn is_auth(&self) -> bool {
        self.kind == ModelErrorKind::Auth
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ModelErrorKind::RateLimited
    }
}

impl From<claude::Error> for ModelError {
    fn from(err: claude::Error) -> Self {
        // Auth is checked first: a 403 quota message must not be retried.
        let kind = if err.is_auth_failure() {
            ModelErrorKind::Auth
        } else if err.is_rate_limited() {
            ModelErrorKind::RateLimited
        } else if matches!(err, claude::Error::Parse(_)) {
            ModelErrorKind::MalformedResponse
        } else {
            ModelErrorKind::Transport
        };
        ModelError::new(kind, err.to_string())
    }
}

/// One schema-constrained generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub stage: Stage,
    pub model: String,
    pub system: String,
    pub prompt: String,
    /// Response shape the model must conform to.
    pub schema: Tool,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
}

/// Something that turns a request into a parsed JSON payload.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<serde_json::Value, ModelError>;
}

/// Generate and deserialize into the stage's payload type.
///
/// A payload that parses as JSON but does not fit `T`, or fails its shape
/// checks, is malformed.
pub async fn generate_typed<T: DeserializeOwned + Validate>(
    generator: &dyn Generator,
    request: GenerationRequest,
) -> Result<T, ModelError> {
    let stage = request.stage;
    let value = generator.generate(request).await?;
    let payload: T = serde_json::from_value(value)
        .map_err(|e| ModelError::malformed(format!("{stage} payload does not match schema: {e}")))?;
    payload
        .validate()
        .map_err(|e| ModelError::malformed(format!("{stage} payload rejected: {e}")))?;
    Ok(payload)
}

// ============================================================================
// Claude
// ============================================================================

/// Live generator backed by the Claude Messages API. Makes one request per
/// call and never retries.
pub struct ClaudeModel {
    client: Claude,
}

impl ClaudeModel {
    pub fn new(client: Claude) -> Self {
        Self { client }
    }

    /// Create from environment (ANTHROPIC_API_KEY).
    pub fn from_env() -> Result<Self, ModelError> {
        Ok(Self::new(Claude::from_env()?))
    }
}

#[async_trait]
impl Generator for ClaudeModel {
    async fn generate(&self, request: GenerationRequest) -> Result<serde_json::Value, ModelError> {
        let tool_name = request.schema.name.clone();

        let mut api_request = Request::new(vec![Message::user(&request.prompt)])
            .with_model(&request.model)
            .with_max_tokens(request.max_tokens)
            .with_system(&request.system);
        if let Some(temp) = request.temperature {
            api_request = api_request.with_temperature(temp);
        }

        let response = self
            .client
            .complete_structured(api_request, request.schema)
            .await?;

        match response.structured_output(&tool_name) {
            StructuredOutput::Json(value) => Ok(value),
            StructuredOutput::Text(text) => {
                debug!(stage = %request.stage, "No tool call in response, parsing text");
                let json_str = extract_json(&text);
                serde_json::from_str(json_str)
                    .map_err(|e| ModelError::malformed(format!("{e}: {json_str}")))
            }
        }
    }
}

/// Extract JSON from a response that might have markdown code blocks.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    // Handle ```json ... ``` blocks
    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    // Handle ``` ... ``` blocks (without json specifier)
    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return text[content_start..content_start + end].trim();
        }
    }

    text
}

// ============================================================================
// Retry
// ============================================================================

/// Backoff policy for rate-limited calls.
///
/// Retry `n` (0-based) waits `base_delay * 2^n` plus a uniform jitter in
/// `[0, max_jitter]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first call.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            max_jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_jitter(mut self, jitter: Duration) -> Self {
        self.max_jitter = jitter;
        self
    }

    /// Deterministic part of the delay before retry `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.backoff(attempt) + Duration::from_millis(jitter)
    }
}

/// Wraps a generator and retries rate-limited calls.
pub struct ResilientModel {
    inner: Arc<dyn Generator>,
    policy: RetryPolicy,
}

impl ResilientModel {
    pub fn new(inner: Arc<dyn Generator>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Generator for ResilientModel {
    async fn generate(&self, request: GenerationRequest) -> Result<serde_json::Value, ModelError> {
        let stage = request.stage;
        let mut attempt = 0;

        loop {
            match self.inner.generate(request.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        stage = %stage,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(stage = %stage, attempts = attempt + 1, error = %err, "Model call failed");
                    return Err(err);
                }
            }
        }
    }
}
