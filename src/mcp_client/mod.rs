//! MCP Client: JSON-RPC transports and the capability registry.
//!
//! This module handles:
//! - Spawning stdio MCP services and opening HTTP sessions
//! - JSON-RPC 2.0 communication (line-delimited stdio, HTTP POST / SSE)
//! - The MCP handshake, paginated tool discovery, and tool calls
//! - Merging capabilities across services into one name-spaced registry
//! - Shutdown of every connection at the end of a run

pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod session;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports for convenience
pub use errors::McpError;
pub use registry::{CapabilityRegistry, FailedService, RegistryOptions};
pub use session::{Connector, McpSession, ProcessConnector, ServiceConnection};
pub use types::{CapabilityDescriptor, InvocationResult, LaunchSpec, Outcome, ServiceConfig};
