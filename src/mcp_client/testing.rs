//! Deterministic in-process services for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::errors::McpError;
use super::session::{Connector, ServiceConnection};
use super::types::{InvocationResult, LaunchSpec, ServiceConfig, ToolDefinition};

/// A stdio config whose launch parameters are never used by the stub.
pub(crate) fn service_config(name: &str) -> ServiceConfig {
    ServiceConfig {
        name: name.to_string(),
        launch: LaunchSpec::Stdio {
            command: format!("{name}-mcp"),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        },
    }
}

/// Scripted reply for one capability.
#[derive(Debug, Clone)]
pub(crate) enum StubReply {
    Ok(serde_json::Value),
    RemoteError(String),
    TransportFailure,
    Hang,
}

impl StubReply {
    pub(crate) fn ok_text(text: &str) -> Self {
        StubReply::Ok(serde_json::json!({
            "content": [{"type": "text", "text": text}]
        }))
    }
}

#[derive(Debug, Clone)]
enum Behavior {
    Serve(Vec<ToolDefinition>),
    Refuse(String),
    Hang,
}

#[derive(Debug, Default)]
struct Shared {
    replies: Mutex<HashMap<String, StubReply>>,
    calls: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

/// Connector over in-memory services.
#[derive(Debug, Default)]
pub(crate) struct StubConnector {
    services: HashMap<String, Behavior>,
    shared: Arc<Shared>,
}

impl StubConnector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A reachable service exposing `tools` with an open object schema.
    pub(crate) fn service(mut self, name: &str, tools: &[&str]) -> Self {
        let defs = tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.to_string(),
                description: Some(format!("{t} on {name}")),
                input_schema: serde_json::json!({"type": "object", "properties": {}}),
            })
            .collect();
        self.services.insert(name.to_string(), Behavior::Serve(defs));
        self
    }

    /// A reachable service exposing one tool with the given schema.
    pub(crate) fn service_with_schema(
        mut self,
        name: &str,
        tool: &str,
        schema: serde_json::Value,
    ) -> Self {
        let def = ToolDefinition {
            name: tool.to_string(),
            description: None,
            input_schema: schema,
        };
        self.services
            .insert(name.to_string(), Behavior::Serve(vec![def]));
        self
    }

    pub(crate) fn unreachable(mut self, name: &str) -> Self {
        self.services.insert(
            name.to_string(),
            Behavior::Refuse("connection refused".into()),
        );
        self
    }

    /// A service whose connect never completes.
    pub(crate) fn hanging(mut self, name: &str) -> Self {
        self.services.insert(name.to_string(), Behavior::Hang);
        self
    }

    /// Script the reply for a qualified capability name.
    pub(crate) fn reply(self, qualified_name: &str, reply: StubReply) -> Self {
        if let Ok(mut replies) = self.shared.replies.lock() {
            replies.insert(qualified_name.to_string(), reply);
        }
        self
    }

    /// Qualified names of every call received, in order.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.shared.calls.lock().unwrap().clone()
    }

    /// Number of `close` calls across all connections.
    pub(crate) fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for StubConnector {
    async fn connect(
        &self,
        config: &ServiceConfig,
    ) -> Result<Box<dyn ServiceConnection>, McpError> {
        match self.services.get(&config.name) {
            Some(Behavior::Serve(tools)) => Ok(Box::new(StubService {
                name: config.name.clone(),
                tools: tools.clone(),
                shared: Arc::clone(&self.shared),
            })),
            Some(Behavior::Refuse(reason)) => Err(McpError::Connection {
                service: config.name.clone(),
                reason: reason.clone(),
            }),
            Some(Behavior::Hang) => std::future::pending().await,
            None => Err(McpError::Connection {
                service: config.name.clone(),
                reason: "no such stub service".into(),
            }),
        }
    }
}

struct StubService {
    name: String,
    tools: Vec<ToolDefinition>,
    shared: Arc<Shared>,
}

#[async_trait]
impl ServiceConnection for StubService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_capabilities(&self) -> Result<Vec<ToolDefinition>, McpError> {
        Ok(self.tools.clone())
    }

    async fn call(
        &self,
        remote_name: &str,
        _arguments: serde_json::Value,
    ) -> Result<InvocationResult, McpError> {
        let qualified = format!("{}.{remote_name}", self.name);
        self.shared.calls.lock().unwrap().push(qualified.clone());

        let reply = self
            .shared
            .replies
            .lock()
            .unwrap()
            .get(&qualified)
            .cloned()
            .unwrap_or_else(|| StubReply::ok_text(&format!("{qualified} done")));

        match reply {
            StubReply::Ok(payload) => Ok(InvocationResult::ok(payload, 1)),
            StubReply::RemoteError(detail) => Ok(InvocationResult::error(
                detail.clone(),
                serde_json::json!({
                    "content": [{"type": "text", "text": detail}],
                    "isError": true
                }),
                1,
            )),
            StubReply::TransportFailure => Err(McpError::Transport {
                service: self.name.clone(),
                reason: "broken pipe".into(),
            }),
            StubReply::Hang => std::future::pending().await,
        }
    }

    async fn close(&self) -> Result<(), McpError> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
