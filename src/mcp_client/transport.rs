//! JSON-RPC transports.
//!
//! Two channels implement [`RpcChannel`]:
//! - [`StdioTransport`]: line-delimited JSON over a child process's stdin/stdout
//! - [`HttpTransport`]: JSON-RPC over HTTP POST (MCP streamable HTTP), with
//!   either a JSON or a `text/event-stream` response body

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::types::{error_codes, JsonRpcRequest, JsonRpcResponse};

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Channel Trait ───────────────────────────────────────────────────────────

/// A request/response channel to one MCP service.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Send a request and wait for the response carrying the same id.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<serde_json::Value>)
        -> Result<(), McpError>;

    /// Release the channel. Later requests fail with a transport error.
    async fn close(&self) -> Result<(), McpError>;
}

/// Parse one message as a response. Requests and notifications from the
/// service carry a `method` and are not responses, whatever their id.
fn parse_response(text: &str) -> Option<JsonRpcResponse> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    if value.get("method").is_some() {
        return None;
    }
    serde_json::from_value(value).ok()
}

fn notification_json(method: &str, params: Option<serde_json::Value>) -> serde_json::Value {
    let mut notification = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
    });
    if let Some(params) = params {
        notification["params"] = params;
    }
    notification
}

// ─── Stdio Transport ─────────────────────────────────────────────────────────

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = BufReader<Box<dyn AsyncRead + Send + Unpin>>;

/// Bi-directional JSON-RPC transport over a child process's stdio.
pub struct StdioTransport {
    service: String,
    /// `None` once closed; dropping stdin signals EOF to the child.
    writer: Mutex<Option<BoxedWriter>>,
    reader: Mutex<BoxedReader>,
}

impl StdioTransport {
    /// Create a new transport from a child process's stdin/stdout.
    pub fn new<W, R>(service: &str, stdin: W, stdout: R) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
        R: AsyncRead + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(stdout);
        Self {
            service: service.to_string(),
            writer: Mutex::new(Some(Box::new(stdin))),
            reader: Mutex::new(BufReader::new(reader)),
        }
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::Transport {
            service: self.service.clone(),
            reason,
        }
    }

    async fn write_line(&self, mut json: String) -> Result<(), McpError> {
        json.push('\n');

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| self.transport_error("channel closed".into()))?;
        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("failed to flush stdin: {e}")))
    }
}

#[async_trait]
impl RpcChannel for StdioTransport {
    /// Write one line of JSON, then read lines until a response with a
    /// matching `id` arrives. Log lines and stale responses are skipped.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);

        let json = serde_json::to_string(&req)
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;

        // Hold the reader for the whole exchange so concurrent callers
        // cannot steal each other's responses.
        let mut reader = self.reader.lock().await;
        self.write_line(json).await?;

        let mut line_buf = String::new();
        loop {
            line_buf.clear();
            let bytes_read = reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.transport_error(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 {
                return Err(
                    self.transport_error("service stdout closed (process may have exited)".into())
                );
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            match parse_response(trimmed) {
                Some(resp) if resp.id == id => return Ok(resp),
                Some(resp) => {
                    tracing::debug!(
                        server = %self.service,
                        expected = id,
                        got = resp.id,
                        "skipping response for another request"
                    );
                }
                None => {
                    tracing::debug!(server = %self.service, line = %trimmed, "skipping non-response line");
                }
            }
        }
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let json = serde_json::to_string(&notification_json(method, params))
            .map_err(|e| self.transport_error(format!("failed to serialize notification: {e}")))?;
        self.write_line(json).await
    }

    async fn close(&self) -> Result<(), McpError> {
        let mut guard = self.writer.lock().await;
        if let Some(mut writer) = guard.take() {
            let _ = writer.shutdown().await;
        }
        Ok(())
    }
}

// ─── HTTP Transport ──────────────────────────────────────────────────────────

/// Header carrying the MCP session id on streamable HTTP.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Connect timeout for the HTTP client. Per-call limits are applied by the registry.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the session `DELETE` sent by `close`.
const SESSION_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// JSON-RPC transport over HTTP POST.
pub struct HttpTransport {
    service: String,
    url: String,
    client: reqwest::Client,
    headers: HeaderMap,
    session_id: std::sync::Mutex<Option<String>>,
    closed: AtomicBool,
}

impl HttpTransport {
    /// Build a transport for `url`, sending `headers` with every request.
    pub fn new(
        service: &str,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| McpError::Config {
                reason: format!("invalid header name '{key}' for service '{service}': {e}"),
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| McpError::Config {
                reason: format!("invalid value for header '{key}' of service '{service}': {e}"),
            })?;
            header_map.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| McpError::Connection {
                service: service.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            service: service.to_string(),
            url: url.to_string(),
            client,
            headers: header_map,
            session_id: std::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::Transport {
            service: self.service.clone(),
            reason,
        }
    }

    fn current_session(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|s| s.clone())
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, McpError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(self.transport_error("channel closed".into()));
        }

        let mut req = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);
        if let Some(session) = self.current_session() {
            req = req.header(SESSION_HEADER, session);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| self.transport_error(format!("HTTP request failed: {e}")))?;

        if let Some(session) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut slot) = self.session_id.lock() {
                *slot = Some(session.to_string());
            }
        }

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(self.transport_error(format!("HTTP {status}: {body}")));
        }

        Ok(resp)
    }
}

#[async_trait]
impl RpcChannel for HttpTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);
        let body = serde_json::to_value(&req)
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;

        let resp = self.post(&body).await?;
        let is_sse = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        let text = resp
            .text()
            .await
            .map_err(|e| self.transport_error(format!("failed to read response body: {e}")))?;

        let parsed = if is_sse {
            parse_sse_response(&text, id)
        } else {
            parse_response(&text)
        };

        match parsed {
            Some(resp) if resp.id == id => Ok(resp),
            Some(resp) => Err(McpError::Protocol {
                service: self.service.clone(),
                reason: format!("response id {} does not match request id {id}", resp.id),
            }),
            None => Err(McpError::Protocol {
                service: self.service.clone(),
                reason: format!("no JSON-RPC response for request {id} in body"),
            }),
        }
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        self.post(&notification_json(method, params)).await?;
        Ok(())
    }

    /// Best-effort `DELETE` of the session, bounded by
    /// [`SESSION_CLOSE_TIMEOUT`]. Idempotent.
    async fn close(&self) -> Result<(), McpError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(session) = self.current_session() {
            let result = self
                .client
                .delete(&self.url)
                .headers(self.headers.clone())
                .header(SESSION_HEADER, session)
                .timeout(SESSION_CLOSE_TIMEOUT)
                .send()
                .await;
            match result {
                Err(e) if e.is_timeout() => tracing::warn!(
                    server = %self.service,
                    timeout_secs = SESSION_CLOSE_TIMEOUT.as_secs(),
                    "session DELETE timed out, abandoning"
                ),
                Err(e) => {
                    tracing::debug!(server = %self.service, error = %e, "session DELETE failed")
                }
                Ok(_) => {}
            }
        }
        Ok(())
    }
}

/// Find the event carrying the response to `id` in an SSE body.
///
/// Events are separated by blank lines; multi-line `data:` fields are joined
/// with newlines.
fn parse_sse_response(body: &str, id: u64) -> Option<JsonRpcResponse> {
    let mut data = String::new();
    let mut candidates = Vec::new();

    for line in body.lines().chain(std::iter::once("")) {
        if line.is_empty() {
            if !data.is_empty() {
                candidates.push(std::mem::take(&mut data));
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }

    candidates
        .iter()
        .filter_map(|event| parse_response(event))
        .find(|resp| resp.id == id)
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
