//! OpenAI-compatible inference client.
//!
//! Sends non-streaming chat completion requests and parses the reply into
//! text and tool calls. Transient failures are retried with exponential
//! backoff.

use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::Deserialize;
use uuid::Uuid;

use super::config::InferenceConfig;
use super::errors::InferenceError;
use super::types::{ChatCompletionRequest, ChatMessage, Completion, ToolCall, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Retries after the first attempt for transient failures.
const MAX_RETRIES: u32 = 2;

/// Base delay between retries (doubles each time).
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for a chat-completions endpoint.
pub struct InferenceClient {
    http: HttpClient,
    config: InferenceConfig,
}

impl InferenceClient {
    /// Create a new inference client. Does NOT check connectivity; that
    /// happens on the first request.
    pub fn new(config: InferenceConfig) -> Result<Self, InferenceError> {
        config.validate()?;

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, config })
    }

    /// Send a chat completion request, retrying transient failures.
    pub async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Completion, InferenceError> {
        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        // Log the request metadata (not the full body; it can be huge)
        tracing::debug!(
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "LLM request"
        );

        let mut attempt = 0;
        loop {
            match self.send_once(&body).await {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retriable() && attempt < MAX_RETRIES => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "LLM request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, body: &ChatCompletionRequest) -> Result<Completion, InferenceError> {
        let url = self.config.completions_url();

        let mut request = self.http.post(&url).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.config.request_timeout.as_secs(),
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.config.request_timeout.as_secs(),
                }
            } else {
                InferenceError::InvalidResponse {
                    reason: format!("failed to read response body: {e}"),
                }
            }
        })?;

        let completion = parse_completion_response(&body_text)?;
        tracing::debug!(
            finish_reason = completion.finish_reason.as_deref().unwrap_or("-"),
            tool_calls = completion.tool_calls.len(),
            has_content = completion.content.is_some(),
            "LLM response"
        );
        Ok(completion)
    }
}

// ─── Response Parsing ────────────────────────────────────────────────────────

/// Parse a non-streaming chat completion body.
///
/// Tool-call arguments arrive as a JSON-encoded string; an empty string is
/// read as `{}`.
pub fn parse_completion_response(body: &str) -> Result<Completion, InferenceError> {
    #[derive(Deserialize)]
    struct Response {
        choices: Vec<Choice>,
    }

    #[derive(Deserialize)]
    struct Choice {
        message: Message,
        finish_reason: Option<String>,
    }

    #[derive(Deserialize)]
    struct Message {
        content: Option<String>,
        tool_calls: Option<Vec<RawToolCall>>,
    }

    #[derive(Deserialize)]
    struct RawToolCall {
        id: Option<String>,
        function: RawFunction,
    }

    #[derive(Deserialize)]
    struct RawFunction {
        name: String,
        #[serde(default)]
        arguments: serde_json::Value,
    }

    let resp: Response = serde_json::from_str(body).map_err(|e| InferenceError::InvalidResponse {
        reason: format!("failed to parse chat completion: {e}"),
    })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::InvalidResponse {
            reason: "empty choices array".into(),
        })?;

    let content = choice.message.content.filter(|c| !c.trim().is_empty());

    let mut tool_calls = Vec::new();
    for tc in choice.message.tool_calls.unwrap_or_default() {
        let id = tc
            .id
            .unwrap_or_else(|| format!("call_{}", Uuid::new_v4()));
        let arguments = match tc.function.arguments {
            serde_json::Value::String(raw) if raw.trim().is_empty() => serde_json::json!({}),
            serde_json::Value::String(raw) => {
                serde_json::from_str(&raw).map_err(|e| InferenceError::ToolCallParseError {
                    raw_response: raw.clone(),
                    reason: format!("invalid JSON in arguments of '{}': {e}", tc.function.name),
                })?
            }
            serde_json::Value::Null => serde_json::json!({}),
            other => other,
        };
        tool_calls.push(ToolCall {
            id,
            name: tc.function.name,
            arguments,
        });
    }

    Ok(Completion {
        content,
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> InferenceClient {
        InferenceClient::new(InferenceConfig {
            base_url: format!("{}/v1", server.uri()),
            api_key: Some("sk-test".into()),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        })
        .unwrap()
    }

    fn tool_call_body() -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "jira_getIssue",
                            "arguments": "{\"issueKey\":\"PROJ-123\"}"
                        }
                    }]
                }
            }]
        })
    }

    #[test]
    fn test_parse_tool_call_response() {
        let completion = parse_completion_response(&tool_call_body().to_string()).unwrap();
        assert!(completion.content.is_none());
        assert_eq!(completion.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].id, "call_abc");
        assert_eq!(completion.tool_calls[0].arguments["issueKey"], "PROJ-123");
    }

    #[test]
    fn test_parse_text_response() {
        let body = r#"{"choices":[{"finish_reason":"stop","message":{"content":"Done."}}]}"#;
        let completion = parse_completion_response(body).unwrap();
        assert_eq!(completion.content.as_deref(), Some("Done."));
        assert!(completion.tool_calls.is_empty());
    }

    #[test]
    fn test_parse_malformed_arguments() {
        let body = r#"{"choices":[{"message":{"tool_calls":[
            {"id":"c1","function":{"name":"x","arguments":"{not json"}}
        ]}}]}"#;
        let err = parse_completion_response(body).unwrap_err();
        assert!(matches!(err, InferenceError::ToolCallParseError { .. }));
    }

    #[test]
    fn test_parse_empty_arguments_and_missing_id() {
        let body = r#"{"choices":[{"message":{"tool_calls":[
            {"function":{"name":"x","arguments":""}}
        ]}}]}"#;
        let completion = parse_completion_response(body).unwrap();
        assert_eq!(completion.tool_calls[0].arguments, serde_json::json!({}));
        assert!(completion.tool_calls[0].id.starts_with("call_"));
    }

    #[test]
    fn test_parse_empty_choices() {
        let err = parse_completion_response(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_chat_completion_sends_auth_and_tools() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(bearer_token("sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "temperature": 0.0,
                "tool_choice": "auto",
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let tools = vec![ToolDefinition::function(
            "jira_getIssue",
            "Fetch an issue",
            serde_json::json!({"type": "object"}),
        )];
        let completion = client
            .chat_completion(vec![ChatMessage::user("go")], Some(tools))
            .await
            .unwrap();
        assert_eq!(completion.tool_calls[0].name, "jira_getIssue");
    }

    #[tokio::test]
    async fn test_chat_completion_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_body()))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let completion = client
            .chat_completion(vec![ChatMessage::user("go")], None)
            .await
            .unwrap();
        assert_eq!(completion.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn test_chat_completion_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .chat_completion(vec![ChatMessage::user("go")], None)
            .await
            .unwrap_err();
        match err {
            InferenceError::HttpError { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "invalid api key");
            }
            other => panic!("expected HttpError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chat_completion_gives_up_after_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(u64::from(MAX_RETRIES) + 1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let err = client
            .chat_completion(vec![ChatMessage::user("go")], None)
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::HttpError { status: 500, .. }));
    }
}
