//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types, MCP protocol structures, service
//! configuration, and the capability/invocation records exchanged with the
//! dispatch loop.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// MCP protocol revision sent in the `initialize` request.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// A tool as advertised by a service in `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// `tools/list` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDefinition>,
    #[serde(default, alias = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// `tools/call` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<serde_json::Value>,
    #[serde(default, alias = "isError")]
    pub is_error: bool,
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(alias = "protocolVersion")]
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, alias = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

// ─── Service Configuration ──────────────────────────────────────────────────

/// One configured MCP service. Immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawServiceConfig")]
pub struct ServiceConfig {
    /// Unique service name; also the namespace prefix of its capabilities.
    pub name: String,
    /// How to reach the service.
    pub launch: LaunchSpec,
}

/// Transport-specific launch parameters.
#[derive(Clone, PartialEq)]
pub enum LaunchSpec {
    /// Child process speaking line-delimited JSON-RPC over stdio.
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        cwd: Option<String>,
    },
    /// Remote endpoint speaking JSON-RPC over HTTP POST.
    Http {
        url: String,
        headers: HashMap<String, String>,
    },
}

impl LaunchSpec {
    /// Short transport label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LaunchSpec::Stdio { .. } => "stdio",
            LaunchSpec::Http { .. } => "http",
        }
    }
}

// Values in env and headers usually carry tokens; only their keys are printed.
impl fmt::Debug for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchSpec::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                let mut keys: Vec<&String> = env.keys().collect();
                keys.sort();
                f.debug_struct("Stdio")
                    .field("command", command)
                    .field("args", args)
                    .field("env_keys", &keys)
                    .field("cwd", cwd)
                    .finish()
            }
            LaunchSpec::Http { url, headers } => {
                let mut keys: Vec<&String> = headers.keys().collect();
                keys.sort();
                f.debug_struct("Http")
                    .field("url", url)
                    .field("header_keys", &keys)
                    .finish()
            }
        }
    }
}

/// Wire shape of a service entry: `{name, type, command, args, env, cwd, url, headers}`.
#[derive(Debug, Deserialize)]
struct RawServiceConfig {
    name: String,
    #[serde(default, rename = "type", alias = "transport")]
    kind: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
}

impl TryFrom<RawServiceConfig> for ServiceConfig {
    type Error = String;

    fn try_from(raw: RawServiceConfig) -> Result<Self, Self::Error> {
        let name = raw.name.trim().to_string();
        if name.is_empty() {
            return Err("service name must not be empty".into());
        }

        let kind = raw.kind.as_deref().unwrap_or("stdio").to_ascii_lowercase();
        let launch = match kind.as_str() {
            "stdio" | "subprocess" => {
                let command = raw
                    .command
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| format!("missing 'command' for stdio service '{name}'"))?;
                LaunchSpec::Stdio {
                    command,
                    args: raw.args,
                    env: raw.env,
                    cwd: raw.cwd,
                }
            }
            "http" | "socket" | "streamable-http" => {
                let url = raw
                    .url
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| format!("missing 'url' for http service '{name}'"))?;
                LaunchSpec::Http {
                    url,
                    headers: raw.headers,
                }
            }
            other => return Err(format!("unsupported transport '{other}' for service '{name}'")),
        };

        Ok(ServiceConfig { name, launch })
    }
}

// ─── Capabilities & Invocations ─────────────────────────────────────────────

/// A discovered capability in the merged registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityDescriptor {
    /// `service.remote_name`, unique across the registry.
    pub qualified_name: String,
    /// Owning service.
    pub service: String,
    /// Name the owning service knows the tool by.
    pub remote_name: String,
    /// JSON Schema of accepted arguments.
    pub parameter_schema: serde_json::Value,
    pub description: String,
}

/// Outcome of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Ok,
    Error,
}

/// Result of invoking a capability. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationResult {
    pub outcome: Outcome,
    pub payload: serde_json::Value,
    pub error_detail: Option<String>,
    pub execution_time_ms: u64,
}

impl InvocationResult {
    /// A successful result.
    pub fn ok(payload: serde_json::Value, execution_time_ms: u64) -> Self {
        Self {
            outcome: Outcome::Ok,
            payload,
            error_detail: None,
            execution_time_ms,
        }
    }

    /// A remote-side failure.
    pub fn error(
        detail: impl Into<String>,
        payload: serde_json::Value,
        execution_time_ms: u64,
    ) -> Self {
        Self {
            outcome: Outcome::Error,
            payload,
            error_detail: Some(detail.into()),
            execution_time_ms,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome == Outcome::Ok
    }

    /// Flatten the payload to text.
    ///
    /// MCP results carry `content: [{type: "text", text}]`; text items are
    /// joined by newlines and other items are rendered as JSON. Errors are
    /// prefixed with `Error:`.
    pub fn text(&self) -> String {
        let body = content_text(&self.payload);
        match (&self.outcome, &self.error_detail) {
            (Outcome::Error, Some(detail)) if body.is_empty() || body == *detail => {
                format!("Error: {detail}")
            }
            (Outcome::Error, _) => format!("Error: {body}"),
            (Outcome::Ok, _) => body,
        }
    }
}

/// Join the text items of an MCP `content` array.
pub fn content_text(payload: &serde_json::Value) -> String {
    match payload.get("content").and_then(|c| c.as_array()) {
        Some(items) => items
            .iter()
            .map(|item| match item.get("text").and_then(|t| t.as_str()) {
                Some(text) => text.to_string(),
                None => item.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => match payload {
            serde_json::Value::Null => String::new(),
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        },
    }
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "initialize", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"initialize\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_json_rpc_error_response() {
        let json = r#"{
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": -32601, "message": "Method not found"}
        }"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert!(resp.result.is_none());
        let err = resp.error.unwrap();
        assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_list_tools_result_camel_case() {
        let json = r#"{
            "tools": [{"name": "getIssue", "inputSchema": {"type": "object"}}],
            "nextCursor": "page-2"
        }"#;
        let list: ListToolsResult = serde_json::from_str(json).unwrap();
        assert_eq!(list.tools.len(), 1);
        assert_eq!(list.tools[0].input_schema["type"], "object");
        assert!(list.tools[0].description.is_none());
        assert_eq!(list.next_cursor.as_deref(), Some("page-2"));
    }

    #[test]
    fn test_service_config_defaults_to_stdio() {
        let json = r#"{"name": "jira", "command": "npx", "args": ["-y", "jira-mcp"]}"#;
        let cfg: ServiceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.name, "jira");
        assert_eq!(cfg.launch.kind(), "stdio");
        match cfg.launch {
            LaunchSpec::Stdio { command, args, .. } => {
                assert_eq!(command, "npx");
                assert_eq!(args, vec!["-y", "jira-mcp"]);
            }
            LaunchSpec::Http { .. } => panic!("expected stdio"),
        }
    }

    #[test]
    fn test_service_config_aliases() {
        let json = r#"{"name": "gh", "type": "socket", "url": "http://localhost:9000/mcp"}"#;
        let cfg: ServiceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.launch.kind(), "http");

        let json = r#"{"name": "jira", "type": "subprocess", "command": "jira-mcp"}"#;
        let cfg: ServiceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.launch.kind(), "stdio");
    }

    #[test]
    fn test_service_config_missing_command_rejected() {
        let json = r#"{"name": "test", "type": "stdio"}"#;
        let err = serde_json::from_str::<ServiceConfig>(json).unwrap_err();
        assert!(err.to_string().contains("missing 'command'"));
    }

    #[test]
    fn test_service_config_unknown_transport_rejected() {
        let json = r#"{"name": "test", "type": "carrier-pigeon"}"#;
        let err = serde_json::from_str::<ServiceConfig>(json).unwrap_err();
        assert!(err.to_string().contains("unsupported transport"));
    }

    #[test]
    fn test_launch_spec_debug_hides_env_values() {
        let mut env = HashMap::new();
        env.insert("GITHUB_TOKEN".to_string(), "ghp_secret".to_string());
        let spec = LaunchSpec::Stdio {
            command: "github-mcp".into(),
            args: vec![],
            env,
            cwd: None,
        };
        let printed = format!("{spec:?}");
        assert!(printed.contains("GITHUB_TOKEN"));
        assert!(!printed.contains("ghp_secret"));
    }

    #[test]
    fn test_invocation_result_text_joins_content() {
        let payload = serde_json::json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "text", "text": "line two"}
            ]
        });
        let result = InvocationResult::ok(payload, 3);
        assert_eq!(result.text(), "line one\nline two");
    }

    #[test]
    fn test_invocation_result_error_text() {
        let result = InvocationResult::error("issue not found", serde_json::Value::Null, 1);
        assert!(!result.is_ok());
        assert_eq!(result.text(), "Error: issue not found");
    }
}
