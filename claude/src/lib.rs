//! Minimal Anthropic Claude API client.
//!
//! This crate provides a focused client for Claude's Messages API with:
//! - Non-streaming completions
//! - Schema-constrained output by forcing a single tool call
//! - Error classification for rate limits and credential failures

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Errors that can occur when using the Claude client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// HTTP status of an API error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the provider asked us to slow down.
    ///
    /// Detected from the status code and from the error payload, since
    /// proxies sometimes rewrite the status but keep the body.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Error::Api { status, message } => {
                let message = message.to_lowercase();
                *status == 429
                    || *status == 529
                    || message.contains("rate_limit")
                    || message.contains("rate limit")
                    || message.contains("overloaded")
                    || message.contains("resource_exhausted")
                    || message.contains("quota")
            }
            _ => false,
        }
    }

    /// Whether the credential was rejected.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Error::NoApiKey => true,
            Error::Config(message) => message.to_lowercase().contains("api key"),
            Error::Api { status, message } => {
                let message = message.to_lowercase();
                *status == 401
                    || *status == 403
                    || message.contains("authentication_error")
                    || message.contains("invalid x-api-key")
                    || message.contains("invalid api key")
                    || message.contains("api key not valid")
            }
            _ => false,
        }
    }
}

/// Claude API client.
#[derive(Clone)]
pub struct Claude {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl Claude {
    /// Create a new Claude client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .connect_timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Create a Claude client from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| Error::NoApiKey)?;
        if api_key.trim().is_empty() {
            return Err(Error::NoApiKey);
        }
        Ok(Self::new(api_key))
    }

    /// Set the default model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// The model used when a request does not name one.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a completion request and return the full response.
    pub async fn complete(&self, request: Request) -> Result<Response, Error> {
        let api_request = self.build_api_request(&request);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{API_BASE}/messages"))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(parse_response(api_response))
    }

    /// Send a request whose answer must conform to `schema`.
    ///
    /// The schema is offered as the only tool and the model is forced to call
    /// it, so the tool input is the structured answer. Returns the raw
    /// response; use [`Response::structured_output`] to pull the payload out.
    pub async fn complete_structured(
        &self,
        request: Request,
        schema: Tool,
    ) -> Result<Response, Error> {
        self.complete(request.with_forced_tool(schema)).await
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    fn build_api_request(&self, request: &Request) -> ApiRequest {
        let messages = request
            .messages
            .iter()
            .map(|m| ApiMessage {
                role: "user",
                content: m.text.clone(),
            })
            .collect();

        let tool = request.tool.as_ref().map(|t| ApiTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.input_schema.clone(),
        });

        ApiRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            max_tokens: request.max_tokens,
            system: request.system.clone(),
            messages,
            temperature: request.temperature,
            tool_choice: tool.as_ref().map(|t| ApiToolChoice {
                r#type: "tool",
                name: t.name.clone(),
            }),
            tools: tool.map(|t| vec![t]),
        }
    }
}

fn parse_stop_reason(reason: &str) -> StopReason {
    match reason {
        "end_turn" => StopReason::EndTurn,
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        "tool_use" => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

fn parse_response(api_response: ApiResponse) -> Response {
    let content: Vec<ContentBlock> = api_response
        .content
        .into_iter()
        .map(|c| match c {
            ApiContent::Text { text } => ContentBlock::Text { text },
            ApiContent::ToolUse { id, name, input } => ContentBlock::ToolUse { id, name, input },
            ApiContent::Thinking { thinking } => ContentBlock::Thinking { thinking },
        })
        .collect();

    Response {
        id: api_response.id,
        model: api_response.model,
        content,
        stop_reason: parse_stop_reason(&api_response.stop_reason),
        usage: Usage {
            input_tokens: api_response.usage.input_tokens,
            output_tokens: api_response.usage.output_tokens,
        },
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A completion request to send to Claude.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: Option<String>,
    pub max_tokens: usize,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    /// Schema the model is forced to answer with.
    pub tool: Option<Tool>,
}

impl Request {
    /// Create a new request with the given messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            max_tokens: 4096,
            system: None,
            messages,
            temperature: None,
            tool: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Offer exactly one tool and require the model to call it.
    pub fn with_forced_tool(mut self, tool: Tool) -> Self {
        self.tool = Some(tool);
        self
    }
}

/// A user turn. Every pipeline stage sends its whole context as one.
#[derive(Debug, Clone)]
pub struct Message {
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// A block of content in a response.
#[derive(Debug, Clone)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Thinking {
        thinking: String,
    },
}

impl ContentBlock {
    /// Extract text from a Text content block.
    pub fn as_text(&self) -> Option<&str> {
        if let ContentBlock::Text { text } = self {
            Some(text)
        } else {
            None
        }
    }
}

/// A tool definition. Also used to carry a response schema.
#[derive(Debug, Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A completion response from Claude.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: String,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

impl Response {
    /// Get all text content concatenated.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| block.as_text())
            .collect::<Vec<_>>()
            .join("")
    }

    /// Input of the first call to the named tool.
    pub fn tool_input(&self, tool_name: &str) -> Option<&serde_json::Value> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::ToolUse { name, input, .. } if name == tool_name => Some(input),
            _ => None,
        })
    }

    /// The structured answer of a forced-tool request.
    ///
    /// Prefers the tool input; falls back to the text content so the caller
    /// can still try to parse a model that answered in prose.
    pub fn structured_output(&self, tool_name: &str) -> StructuredOutput {
        match self.tool_input(tool_name) {
            Some(input) => StructuredOutput::Json(input.clone()),
            None => StructuredOutput::Text(self.text()),
        }
    }
}

/// What a forced-tool request produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredOutput {
    Json(serde_json::Value),
    Text(String),
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

/// Token usage information.
#[derive(Debug, Clone)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ApiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ApiToolChoice>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ApiToolChoice {
    r#type: &'static str,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    id: String,
    model: String,
    content: Vec<ApiContent>,
    stop_reason: String,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Thinking {
        thinking: String,
    },
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: usize,
    output_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_tool() -> Tool {
        Tool {
            name: "narration".to_string(),
            description: "Narrative output".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn test_client_creation() {
        let client = Claude::new("test-key");
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_client_with_model() {
        let client = Claude::new("test-key").with_model("claude-3-5-haiku-20241022");
        assert_eq!(client.model(), "claude-3-5-haiku-20241022");
    }

    #[test]
    fn test_request_builder() {
        let request = Request::new(vec![Message::user("Hello")])
            .with_system("You are a storyteller")
            .with_max_tokens(1000)
            .with_temperature(0.7);

        assert_eq!(request.max_tokens, 1000);
        assert!(request.system.is_some());
        assert_eq!(request.temperature, Some(0.7));
    }

    #[test]
    fn test_forced_tool_sets_choice() {
        let request = Request::new(vec![Message::user("Go")]).with_forced_tool(schema_tool());

        let api = Claude::new("k").build_api_request(&request);
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["tools"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Go");
        assert_eq!(json["tool_choice"]["type"], "tool");
        assert_eq!(json["tool_choice"]["name"], "narration");
        assert_eq!(json["model"], DEFAULT_MODEL);
    }

    #[test]
    fn test_structured_output_prefers_tool_input() {
        let response = Response {
            id: "msg".to_string(),
            model: DEFAULT_MODEL.to_string(),
            content: vec![
                ContentBlock::Text {
                    text: "ignored".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "t1".to_string(),
                    name: "narration".to_string(),
                    input: serde_json::json!({"narrative": "Rain falls."}),
                },
            ],
            stop_reason: StopReason::ToolUse,
            usage: Usage {
                input_tokens: 1,
                output_tokens: 1,
            },
        };

        assert_eq!(
            response.structured_output("narration"),
            StructuredOutput::Json(serde_json::json!({"narrative": "Rain falls."}))
        );
        assert_eq!(
            response.structured_output("other"),
            StructuredOutput::Text("ignored".to_string())
        );
    }

    #[test]
    fn test_parse_api_response() {
        let raw = r#"{
            "id": "msg_1",
            "model": "claude",
            "content": [{"type": "tool_use", "id": "t", "name": "world", "input": {"timePassed": 10}}],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 3, "output_tokens": 4}
        }"#;
        let api: ApiResponse = serde_json::from_str(raw).unwrap();
        let response = parse_response(api);
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.tool_input("world").unwrap()["timePassed"], 10);
    }

    #[test]
    fn test_rate_limit_classification() {
        let err = Error::Api {
            status: 429,
            message: String::new(),
        };
        assert!(err.is_rate_limited());
        assert!(!err.is_auth_failure());

        let err = Error::Api {
            status: 500,
            message: r#"{"error":{"type":"rate_limit_error"}}"#.to_string(),
        };
        assert!(err.is_rate_limited());

        let err = Error::Network("connection reset".to_string());
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_auth_classification() {
        let err = Error::Api {
            status: 401,
            message: r#"{"error":{"type":"authentication_error","message":"invalid x-api-key"}}"#
                .to_string(),
        };
        assert!(err.is_auth_failure());
        assert!(!err.is_rate_limited());

        let err = Error::Api {
            status: 400,
            message: "API key not valid. Please pass a valid API key.".to_string(),
        };
        assert!(err.is_auth_failure());

        assert!(Error::NoApiKey.is_auth_failure());
        assert!(!Error::Parse("eof".to_string()).is_auth_failure());
    }
}
