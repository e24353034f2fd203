//! Capability listing: connect to every service, report what is available,
//! shut down.

use std::sync::Arc;

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::config::Settings;
use crate::mcp_client::{
    CapabilityDescriptor, CapabilityRegistry, Connector, FailedService, McpError,
    ProcessConnector,
};

/// Merged capabilities plus the services that could not be reached.
#[derive(Debug, Clone, Serialize)]
pub struct ToolListing {
    pub capabilities: Vec<CapabilityDescriptor>,
    pub failed_services: Vec<FailedService>,
}

impl ToolListing {
    pub fn to_human(&self) -> String {
        let mut out = String::new();
        for d in &self.capabilities {
            let description = d.description.lines().next().unwrap_or("");
            out.push_str(&format!("{:<40} {description}\n", d.qualified_name));
        }
        if !self.failed_services.is_empty() {
            out.push_str("\nUnavailable services:\n");
            for f in &self.failed_services {
                out.push_str(&format!("  {}: {}\n", f.name, f.error));
            }
        }
        out
    }
}

/// List capabilities with the default process connector.
pub async fn list_tools(settings: &Settings, cancel: &CancelToken) -> Result<ToolListing, McpError> {
    let connector = Arc::new(ProcessConnector::new(settings.connect_timeout));
    list_tools_with(settings, connector, cancel).await
}

pub async fn list_tools_with(
    settings: &Settings,
    connector: Arc<dyn Connector>,
    cancel: &CancelToken,
) -> Result<ToolListing, McpError> {
    let registry = CapabilityRegistry::initialize(
        &settings.mcp_servers,
        connector,
        settings.registry_options(),
        cancel,
    )
    .await?;

    let listing = ToolListing {
        capabilities: registry.descriptors().to_vec(),
        failed_services: registry.failed_services().to_vec(),
    };

    for e in registry.shutdown().await {
        tracing::warn!(error = %e, "service shutdown error");
    }
    Ok(listing)
}
