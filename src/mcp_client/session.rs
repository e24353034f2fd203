//! MCP sessions over a JSON-RPC channel.
//!
//! [`McpSession`] performs the `initialize` handshake, lists tools (following
//! pagination), and maps `tools/call` responses onto [`InvocationResult`]s.
//! [`ProcessConnector`] builds sessions from a [`ServiceConfig`].

use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::errors::McpError;
use super::lifecycle::{format_stderr_suffix, spawn_process, ManagedProcess};
use super::transport::{extract_result, HttpTransport, RpcChannel, StdioTransport};
use super::types::{
    content_text, CallToolResult, InitializeResult, InvocationResult, LaunchSpec,
    ListToolsResult, ServiceConfig, ToolDefinition, PROTOCOL_VERSION,
};

/// Upper bound on `tools/list` pages, against services that loop their cursor.
const MAX_LIST_PAGES: usize = 100;

// ─── Traits ──────────────────────────────────────────────────────────────────

/// A live connection to one configured service.
#[async_trait]
pub trait ServiceConnection: Send + Sync {
    /// Configured service name.
    fn name(&self) -> &str;

    /// Every tool the service advertises.
    async fn list_capabilities(&self) -> Result<Vec<ToolDefinition>, McpError>;

    /// Invoke `remote_name`. Remote failures come back as error results;
    /// only local failures are `Err`.
    async fn call(
        &self,
        remote_name: &str,
        arguments: serde_json::Value,
    ) -> Result<InvocationResult, McpError>;

    /// Release the process or HTTP session. Idempotent.
    async fn close(&self) -> Result<(), McpError>;
}

/// Opens connections to configured services.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ServiceConfig)
        -> Result<Box<dyn ServiceConnection>, McpError>;
}

// ─── McpSession ──────────────────────────────────────────────────────────────

/// An initialized MCP session.
pub struct McpSession {
    name: String,
    channel: Box<dyn RpcChannel>,
    process: Option<ManagedProcess>,
}

impl McpSession {
    /// Run the handshake on `channel`: `initialize`, then
    /// `notifications/initialized`.
    pub async fn handshake(
        name: &str,
        channel: Box<dyn RpcChannel>,
        process: Option<ManagedProcess>,
    ) -> Result<Self, McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let response = channel.request("initialize", Some(params)).await?;
        let result = extract_result(response).map_err(|e| McpError::Connection {
            service: name.to_string(),
            reason: format!("initialize rejected: {e}"),
        })?;
        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::Protocol {
                service: name.to_string(),
                reason: format!("failed to parse initialize response: {e}"),
            })?;

        channel.notify("notifications/initialized", None).await?;

        let server_info = init.server_info.map(|info| {
            format!(
                "{} {}",
                info.name.unwrap_or_else(|| "unknown".into()),
                info.version.unwrap_or_default()
            )
            .trim()
            .to_string()
        });

        tracing::info!(
            server = %name,
            protocol = %init.protocol_version,
            info = server_info.as_deref().unwrap_or("-"),
            "MCP session initialized"
        );

        Ok(Self {
            name: name.to_string(),
            channel,
            process,
        })
    }

    fn protocol_error(&self, reason: String) -> McpError {
        McpError::Protocol {
            service: self.name.clone(),
            reason,
        }
    }
}

#[async_trait]
impl ServiceConnection for McpSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_capabilities(&self) -> Result<Vec<ToolDefinition>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let response = self.channel.request("tools/list", params).await?;
            let result = extract_result(response)
                .map_err(|e| self.protocol_error(format!("tools/list failed: {e}")))?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|e| self.protocol_error(format!("malformed tools/list payload: {e}")))?;

            tools.extend(page.tools);
            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => return Ok(tools),
            }
        }

        Err(self.protocol_error(format!(
            "tools/list did not finish within {MAX_LIST_PAGES} pages"
        )))
    }

    async fn call(
        &self,
        remote_name: &str,
        arguments: serde_json::Value,
    ) -> Result<InvocationResult, McpError> {
        let start = Instant::now();
        let params = serde_json::json!({ "name": remote_name, "arguments": arguments });
        let response = self.channel.request("tools/call", Some(params)).await?;
        let elapsed = start.elapsed().as_millis() as u64;

        let result = match extract_result(response) {
            Ok(result) => result,
            Err(McpError::ServerError { message, data, .. }) => {
                return Ok(InvocationResult::error(
                    message,
                    data.unwrap_or(serde_json::Value::Null),
                    elapsed,
                ));
            }
            Err(e) => return Err(e),
        };

        let is_error = serde_json::from_value::<CallToolResult>(result.clone())
            .map(|r| r.is_error)
            .unwrap_or(false);

        if is_error {
            let detail = content_text(&result);
            let detail = if detail.is_empty() {
                format!("'{remote_name}' reported an error")
            } else {
                detail
            };
            Ok(InvocationResult::error(detail, result, elapsed))
        } else {
            Ok(InvocationResult::ok(result, elapsed))
        }
    }

    async fn close(&self) -> Result<(), McpError> {
        let closed = self.channel.close().await;
        if let Some(process) = &self.process {
            process.shutdown().await?;
        }
        closed
    }
}

// ─── ProcessConnector ────────────────────────────────────────────────────────

/// Production connector: spawns stdio services or opens HTTP sessions.
#[derive(Debug, Clone)]
pub struct ProcessConnector {
    connect_timeout: Duration,
}

impl ProcessConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect_stdio(
        &self,
        name: &str,
        command: &str,
        args: &[String],
        env: &std::collections::HashMap<String, String>,
        cwd: Option<&str>,
    ) -> Result<McpSession, McpError> {
        let spawned = spawn_process(name, command, args, env, cwd)?;
        let transport = StdioTransport::new(name, spawned.stdin, spawned.stdout);
        let channel: Box<dyn RpcChannel> = Box::new(transport);

        // The process handle stays here until the handshake succeeds so a
        // failed handshake can still report stderr and reap the child.
        let process = spawned.process;
        let outcome = tokio::time::timeout(
            self.connect_timeout,
            McpSession::handshake(name, channel, None),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(session)) => {
                return Ok(McpSession {
                    process: Some(process),
                    ..session
                })
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "initialization timed out after {}s",
                self.connect_timeout.as_secs()
            ),
        };

        let stderr = process.stderr_excerpt();
        if !stderr.is_empty() {
            tracing::warn!(server = %name, stderr = %stderr, "service stderr captured on failure");
        }
        let _ = process.shutdown().await;

        Err(McpError::Connection {
            service: name.to_string(),
            reason: format!("{failure}{}", format_stderr_suffix(&stderr)),
        })
    }

    async fn connect_http(
        &self,
        name: &str,
        url: &str,
        headers: &std::collections::HashMap<String, String>,
    ) -> Result<McpSession, McpError> {
        let transport = HttpTransport::new(name, url, headers)?;
        let channel: Box<dyn RpcChannel> = Box::new(transport);

        let outcome = tokio::time::timeout(
            self.connect_timeout,
            McpSession::handshake(name, channel, None),
        )
        .await;

        match outcome {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(McpError::Transport { reason, .. })) => Err(McpError::Connection {
                service: name.to_string(),
                reason,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(McpError::Connection {
                service: name.to_string(),
                reason: format!(
                    "initialization timed out after {}s",
                    self.connect_timeout.as_secs()
                ),
            }),
        }
    }
}

#[async_trait]
impl Connector for ProcessConnector {
    async fn connect(
        &self,
        config: &ServiceConfig,
    ) -> Result<Box<dyn ServiceConnection>, McpError> {
        tracing::info!(server = %config.name, transport = config.launch.kind(), "connecting to service");

        let session = match &config.launch {
            LaunchSpec::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                self.connect_stdio(&config.name, command, args, env, cwd.as_deref())
                    .await?
            }
            LaunchSpec::Http { url, headers } => {
                self.connect_http(&config.name, url, headers).await?
            }
        };

        Ok(Box::new(session))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::mcp_client::types::{JsonRpcError, JsonRpcResponse, Outcome};

    /// Channel that answers from a fixed script keyed by method name.
    struct ScriptedChannel {
        replies: Mutex<HashMap<String, Vec<JsonRpcResponse>>>,
        seen: Mutex<Vec<(String, Option<serde_json::Value>)>>,
    }

    impl ScriptedChannel {
        fn new(replies: Vec<(&str, serde_json::Value)>) -> Self {
            let mut map: HashMap<String, Vec<JsonRpcResponse>> = HashMap::new();
            for (method, body) in replies {
                let resp = JsonRpcResponse {
                    jsonrpc: "2.0".into(),
                    id: 0,
                    result: body.get("result").cloned(),
                    error: body
                        .get("error")
                        .map(|e| serde_json::from_value::<JsonRpcError>(e.clone()).unwrap()),
                };
                map.entry(method.to_string()).or_default().push(resp);
            }
            Self {
                replies: Mutex::new(map),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RpcChannel for ScriptedChannel {
        async fn request(
            &self,
            method: &str,
            params: Option<serde_json::Value>,
        ) -> Result<JsonRpcResponse, McpError> {
            self.seen.lock().unwrap().push((method.to_string(), params));
            let mut replies = self.replies.lock().unwrap();
            let queue = replies.get_mut(method).filter(|q| !q.is_empty());
            match queue {
                Some(q) => Ok(q.remove(0)),
                None => Err(McpError::Transport {
                    service: "scripted".into(),
                    reason: format!("no reply scripted for {method}"),
                }),
            }
        }

        async fn notify(
            &self,
            method: &str,
            params: Option<serde_json::Value>,
        ) -> Result<(), McpError> {
            self.seen.lock().unwrap().push((method.to_string(), params));
            Ok(())
        }

        async fn close(&self) -> Result<(), McpError> {
            Ok(())
        }
    }

    fn init_reply() -> (&'static str, serde_json::Value) {
        (
            "initialize",
            serde_json::json!({"result": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "jira-mcp", "version": "1.2.0"}
            }}),
        )
    }

    async fn session_with(replies: Vec<(&str, serde_json::Value)>) -> McpSession {
        let mut all = vec![init_reply()];
        all.extend(replies);
        McpSession::handshake("jira", Box::new(ScriptedChannel::new(all)), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_handshake_sends_initialized_notification() {
        let channel = ScriptedChannel::new(vec![init_reply()]);
        let session = McpSession::handshake("jira", Box::new(channel), None)
            .await
            .unwrap();
        assert_eq!(session.name(), "jira");
    }

    #[tokio::test]
    async fn test_handshake_rejection_is_connection_error() {
        let channel = ScriptedChannel::new(vec![(
            "initialize",
            serde_json::json!({"error": {"code": -32600, "message": "unsupported version"}}),
        )]);
        let err = McpSession::handshake("jira", Box::new(channel), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Connection { .. }));
        assert!(err.to_string().contains("unsupported version"));
    }

    #[tokio::test]
    async fn test_list_follows_pagination() {
        let session = session_with(vec![
            (
                "tools/list",
                serde_json::json!({"result": {
                    "tools": [{"name": "getIssue", "inputSchema": {"type": "object"}}],
                    "nextCursor": "p2"
                }}),
            ),
            (
                "tools/list",
                serde_json::json!({"result": {
                    "tools": [{"name": "searchIssues", "description": "JQL search"}]
                }}),
            ),
        ])
        .await;

        let tools = session.list_capabilities().await.unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["getIssue", "searchIssues"]);
    }

    #[tokio::test]
    async fn test_list_malformed_payload_is_protocol_error() {
        let session = session_with(vec![(
            "tools/list",
            serde_json::json!({"result": {"tools": "not-a-list"}}),
        )])
        .await;
        let err = session.list_capabilities().await.unwrap_err();
        assert!(matches!(err, McpError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_call_success() {
        let session = session_with(vec![(
            "tools/call",
            serde_json::json!({"result": {
                "content": [{"type": "text", "text": "{\"key\":\"PROJ-123\"}"}]
            }}),
        )])
        .await;
        let result = session
            .call("getIssue", serde_json::json!({"issueKey": "PROJ-123"}))
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Ok);
        assert!(result.text().contains("PROJ-123"));
    }

    #[tokio::test]
    async fn test_call_is_error_becomes_error_result() {
        let session = session_with(vec![(
            "tools/call",
            serde_json::json!({"result": {
                "content": [{"type": "text", "text": "issue not found"}],
                "isError": true
            }}),
        )])
        .await;
        let result = session
            .call("getIssue", serde_json::json!({"issueKey": "NOPE-1"}))
            .await
            .unwrap();
        assert_eq!(result.outcome, Outcome::Error);
        assert_eq!(result.error_detail.as_deref(), Some("issue not found"));
    }

    #[tokio::test]
    async fn test_call_rpc_error_becomes_error_result() {
        let session = session_with(vec![(
            "tools/call",
            serde_json::json!({"error": {"code": -32602, "message": "missing issueKey"}}),
        )])
        .await;
        let result = session.call("getIssue", serde_json::json!({})).await.unwrap();
        assert_eq!(result.outcome, Outcome::Error);
        assert_eq!(result.error_detail.as_deref(), Some("missing issueKey"));
    }

    #[tokio::test]
    async fn test_call_transport_failure_is_err() {
        let session = session_with(vec![]).await;
        let err = session
            .call("getIssue", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_connector_spawn_failure_is_connection_error() {
        let connector = ProcessConnector::new(Duration::from_secs(2));
        let config: ServiceConfig = serde_json::from_value(serde_json::json!({
            "name": "ghost",
            "command": "definitely-not-a-real-binary-4242"
        }))
        .unwrap();
        let err = connector.connect(&config).await.err().unwrap();
        assert!(matches!(err, McpError::Connection { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connector_reports_stderr_when_process_exits() {
        let connector = ProcessConnector::new(Duration::from_secs(5));
        let config: ServiceConfig = serde_json::from_value(serde_json::json!({
            "name": "broken",
            "command": "sh",
            "args": ["-c", "echo 'bad credentials' >&2; exit 3"]
        }))
        .unwrap();
        let err = connector.connect(&config).await.err().unwrap();
        assert!(matches!(err, McpError::Connection { .. }));
        assert!(err.to_string().contains("broken"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_connector_handshake_timeout() {
        // `sleep` never answers initialize.
        let connector = ProcessConnector::new(Duration::from_millis(200));
        let config: ServiceConfig = serde_json::from_value(serde_json::json!({
            "name": "silent",
            "command": "sleep",
            "args": ["30"]
        }))
        .unwrap();
        let err = connector.connect(&config).await.err().unwrap();
        assert!(err.to_string().contains("timed out"));
    }
}
