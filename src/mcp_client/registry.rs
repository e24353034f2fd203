//! Capability registry: aggregates capabilities across all configured services.
//!
//! Provides:
//! - Concurrent connection of every service under one initialization deadline
//! - Capability lookup by qualified name (`service.tool`)
//! - Required-field validation of arguments before a call is routed
//! - Serialization of capabilities into OpenAI function-calling format

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::errors::McpError;
use super::session::{Connector, ServiceConnection};
use super::types::{CapabilityDescriptor, InvocationResult, ServiceConfig, ToolDefinition};
use crate::cancel::CancelToken;

// ─── Options ─────────────────────────────────────────────────────────────────

/// Time limits applied by the registry.
#[derive(Debug, Clone, Copy)]
pub struct RegistryOptions {
    /// Shared deadline for connecting and listing every service.
    pub init_timeout: Duration,
    /// Limit on a single capability call.
    pub call_timeout: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// A configured service that did not make it into the registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedService {
    pub name: String,
    pub error: String,
}

type Connected = (Arc<dyn ServiceConnection>, Vec<ToolDefinition>);

// ─── CapabilityRegistry ──────────────────────────────────────────────────────

/// Merged, name-spaced capability set over live service connections.
///
/// Capability names are stored as `"service.tool"` (e.g., `"jira.getIssue"`).
pub struct CapabilityRegistry {
    /// Descriptors in configuration order.
    descriptors: Vec<CapabilityDescriptor>,
    /// `qualified_name → index into descriptors`.
    index: HashMap<String, usize>,
    /// Connected services in configuration order.
    connections: Vec<(String, Arc<dyn ServiceConnection>)>,
    failed: Vec<FailedService>,
    call_timeout: Duration,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.index.len())
            .field("services", &self.service_names())
            .field("failed", &self.failed)
            .finish()
    }
}

impl CapabilityRegistry {
    /// Connect every service concurrently and merge their capabilities.
    ///
    /// Services that fail to connect or list are logged and skipped. The
    /// call fails if the merged set is empty, if two capabilities share a
    /// qualified name, or if `cancel` fires; every connection opened so far
    /// is closed first.
    pub async fn initialize(
        configs: &[ServiceConfig],
        connector: Arc<dyn Connector>,
        options: RegistryOptions,
        cancel: &CancelToken,
    ) -> Result<Self, McpError> {
        let mut seen = HashSet::new();
        for config in configs {
            if !seen.insert(config.name.as_str()) {
                return Err(McpError::Config {
                    reason: format!("duplicate service name '{}'", config.name),
                });
            }
        }

        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + options.init_timeout;

        let mut handles = Vec::with_capacity(configs.len());
        for config in configs {
            let connector = Arc::clone(&connector);
            let config = config.clone();
            handles.push((
                config.name.clone(),
                tokio::spawn(async move { connect_and_list(connector.as_ref(), &config).await }),
            ));
        }

        let mut connected: Vec<(String, Connected)> = Vec::new();
        let mut failed = Vec::new();
        let mut pending = handles.into_iter();

        while let Some((name, mut handle)) = pending.next() {
            let joined = tokio::select! {
                res = tokio::time::timeout_at(deadline, &mut handle) => res,
                _ = cancel.cancelled() => {
                    handle.abort();
                    let mut rest = vec![(name, handle)];
                    rest.extend(pending);
                    drain_aborted(rest).await;
                    close_all(connected.iter().map(|(_, (conn, _))| conn)).await;
                    tracing::warn!("initialization cancelled");
                    return Err(McpError::Cancelled);
                }
            };

            let error = match joined {
                Ok(Ok(Ok(ok))) => {
                    connected.push((name, ok));
                    continue;
                }
                Ok(Ok(Err(e))) => e,
                Ok(Err(join_err)) => McpError::Connection {
                    service: name.clone(),
                    reason: format!("join error: {join_err}"),
                },
                Err(_) => {
                    handle.abort();
                    McpError::Connection {
                        service: name.clone(),
                        reason: format!(
                            "initialization deadline of {}s exceeded",
                            options.init_timeout.as_secs()
                        ),
                    }
                }
            };

            tracing::warn!(server = %name, error = %error, "service unavailable, skipping");
            failed.push(FailedService {
                name,
                error: error.to_string(),
            });
        }

        // Merge in configuration order.
        let mut descriptors = Vec::new();
        let mut index = HashMap::new();
        for (service, (_, tools)) in &connected {
            for tool in tools {
                let qualified_name = format!("{service}.{}", tool.name);
                if index.contains_key(&qualified_name) {
                    close_all(connected.iter().map(|(_, (conn, _))| conn)).await;
                    return Err(McpError::DuplicateCapability {
                        name: qualified_name,
                        service: service.clone(),
                    });
                }
                index.insert(qualified_name.clone(), descriptors.len());
                descriptors.push(CapabilityDescriptor {
                    qualified_name,
                    service: service.clone(),
                    remote_name: tool.name.clone(),
                    parameter_schema: tool.input_schema.clone(),
                    description: tool.description.clone().unwrap_or_default(),
                });
            }
        }

        if descriptors.is_empty() {
            close_all(connected.iter().map(|(_, (conn, _))| conn)).await;
            return Err(McpError::NoCapabilities {
                configured: configs.len(),
                connected: connected.len(),
            });
        }

        tracing::info!(
            services = connected.len(),
            failed = failed.len(),
            capabilities = descriptors.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "capability registry ready"
        );

        Ok(Self {
            descriptors,
            index,
            connections: connected
                .into_iter()
                .map(|(name, (conn, _))| (name, conn))
                .collect(),
            failed,
            call_timeout: options.call_timeout,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Route a call to the owning service.
    ///
    /// Missing required arguments come back as an error result so the
    /// reasoning collaborator can correct itself.
    pub async fn invoke(
        &self,
        qualified_name: &str,
        arguments: serde_json::Value,
    ) -> Result<InvocationResult, McpError> {
        let descriptor = self.get(qualified_name).ok_or_else(|| McpError::UnknownCapability {
            name: qualified_name.to_string(),
        })?;

        let arguments = match arguments {
            serde_json::Value::Null => serde_json::json!({}),
            other => other,
        };
        if let Err(reason) = validate_arguments(&descriptor.parameter_schema, &arguments) {
            tracing::info!(capability = %qualified_name, %reason, "rejected invalid arguments");
            return Ok(InvocationResult::error(
                format!("invalid arguments for '{qualified_name}': {reason}"),
                serde_json::Value::Null,
                0,
            ));
        }

        if self.shut_down.load(Ordering::Acquire) {
            return Err(McpError::Transport {
                service: descriptor.service.clone(),
                reason: "registry has been shut down".into(),
            });
        }

        let connection = self
            .connection(&descriptor.service)
            .ok_or_else(|| McpError::UnknownCapability {
                name: qualified_name.to_string(),
            })?;

        let result = tokio::time::timeout(
            self.call_timeout,
            connection.call(&descriptor.remote_name, arguments),
        )
        .await
        .map_err(|_| McpError::Timeout {
            capability: qualified_name.to_string(),
            timeout_ms: self.call_timeout.as_millis() as u64,
        })??;

        tracing::info!(
            capability = %qualified_name,
            outcome = ?result.outcome,
            execution_time_ms = result.execution_time_ms,
            "capability invoked"
        );
        Ok(result)
    }

    /// Close every connection concurrently. Returns individual close errors;
    /// calling it again is a no-op.
    pub async fn shutdown(&self) -> Vec<McpError> {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }

        let errors = close_all(self.connections.iter().map(|(_, conn)| conn)).await;
        tracing::info!(
            services = self.connections.len(),
            errors = errors.len(),
            "capability registry shut down"
        );
        errors
    }

    fn connection(&self, service: &str) -> Option<&Arc<dyn ServiceConnection>> {
        self.connections
            .iter()
            .find(|(name, _)| name == service)
            .map(|(_, conn)| conn)
    }

    /// All descriptors in configuration order.
    pub fn descriptors(&self) -> &[CapabilityDescriptor] {
        &self.descriptors
    }

    /// Look up a capability by its qualified name.
    pub fn get(&self, qualified_name: &str) -> Option<&CapabilityDescriptor> {
        self.index.get(qualified_name).map(|&i| &self.descriptors[i])
    }

    /// Number of registered capabilities.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the registry is empty (never true after `initialize`).
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Connected services in configuration order.
    pub fn service_names(&self) -> Vec<&str> {
        self.connections.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Services skipped during initialization.
    pub fn failed_services(&self) -> &[FailedService] {
        &self.failed
    }

    /// Count capabilities belonging to a specific service.
    pub fn capabilities_for_service(&self, service: &str) -> usize {
        self.descriptors
            .iter()
            .filter(|d| d.service == service)
            .count()
    }

    /// One line per connected service, plus the ones that are unavailable.
    pub fn capability_summary(&self) -> String {
        let parts: Vec<String> = self
            .service_names()
            .iter()
            .map(|name| format!("{name} ({})", self.capabilities_for_service(name)))
            .collect();

        let mut summary = format!(
            "Available capabilities ({} tools across {} services): {}.",
            self.len(),
            self.connections.len(),
            parts.join(", "),
        );

        if !self.failed.is_empty() {
            let names: Vec<&str> = self.failed.iter().map(|f| f.name.as_str()).collect();
            summary.push_str(&format!("\nUnavailable services: {}.", names.join(", ")));
        }

        summary
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn connect_and_list(
    connector: &dyn Connector,
    config: &ServiceConfig,
) -> Result<Connected, McpError> {
    let connection: Arc<dyn ServiceConnection> = Arc::from(connector.connect(config).await?);
    match connection.list_capabilities().await {
        Ok(tools) => {
            tracing::info!(server = %config.name, tools = tools.len(), "service connected");
            Ok((connection, tools))
        }
        Err(e) => {
            let _ = connection.close().await;
            Err(e)
        }
    }
}

/// Await aborted initialization tasks, closing any connection that finished
/// before the abort landed.
async fn drain_aborted(
    handles: Vec<(String, tokio::task::JoinHandle<Result<Connected, McpError>>)>,
) {
    for (_, handle) in &handles {
        handle.abort();
    }
    for (name, handle) in handles {
        if let Ok(Ok((conn, _))) = handle.await {
            if let Err(e) = conn.close().await {
                tracing::debug!(server = %name, error = %e, "close after cancel failed");
            }
        }
    }
}

async fn close_all<'a>(
    connections: impl Iterator<Item = &'a Arc<dyn ServiceConnection>>,
) -> Vec<McpError> {
    let closes = connections.map(|conn| async move {
        let result = conn.close().await;
        if let Err(e) = &result {
            tracing::warn!(server = %conn.name(), error = %e, "failed to close service");
        }
        result
    });
    futures::future::join_all(closes)
        .await
        .into_iter()
        .filter_map(Result::err)
        .collect()
}

/// Replace characters outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_function_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Basic structural check: arguments are an object and every field listed
/// in the schema's `required` array is present. Full JSON Schema validation
/// is left to the service.
fn validate_arguments(schema: &serde_json::Value, arguments: &serde_json::Value) -> Result<(), String> {
    let Some(args_obj) = arguments.as_object() else {
        return Err("arguments must be a JSON object".into());
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field_name in required.iter().filter_map(|f| f.as_str()) {
            if !args_obj.contains_key(field_name) {
                return Err(format!("missing required field: '{field_name}'"));
            }
        }
    }

    Ok(())
}

// ─── Tests ───────────────────────────────────────────────────────────────────
