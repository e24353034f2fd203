//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur while connecting to, listing, or invoking MCP services.
///
/// Remote-side failures of a capability are *not* errors: they arrive as an
/// [`InvocationResult`](super::types::InvocationResult) with an error outcome.
#[derive(Debug, Error)]
pub enum McpError {
    /// The service process or endpoint could not be established.
    #[error("failed to connect to service '{service}': {reason}")]
    Connection { service: String, reason: String },

    /// The service answered with something that is not a valid MCP payload.
    #[error("protocol error from service '{service}': {reason}")]
    Protocol { service: String, reason: String },

    /// The local channel to the service broke (closed pipe, I/O error, HTTP failure).
    #[error("transport error for service '{service}': {reason}")]
    Transport { service: String, reason: String },

    /// A capability call did not finish in time.
    #[error("capability '{capability}' timed out after {timeout_ms}ms")]
    Timeout { capability: String, timeout_ms: u64 },

    /// Service returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The capability is not present in the merged registry.
    #[error("unknown capability: '{name}'")]
    UnknownCapability { name: String },

    /// Two services produced the same qualified capability name.
    #[error("duplicate capability '{name}' registered by service '{service}'")]
    DuplicateCapability { name: String, service: String },

    /// Initialization produced an empty capability set.
    #[error("no capabilities available ({connected} of {configured} services connected)")]
    NoCapabilities { configured: usize, connected: usize },

    /// Service configuration is unusable.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,
}
