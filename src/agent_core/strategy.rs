//! The reasoning collaborator seam.

use async_trait::async_trait;

use super::errors::AgentError;
use super::types::{Action, HistoryEntry};
use crate::mcp_client::CapabilityDescriptor;

/// Chooses the next action from the goal, the available capabilities, and
/// everything invoked so far.
#[async_trait]
pub trait ReasoningStrategy: Send {
    async fn decide(
        &mut self,
        goal: &str,
        capabilities: &[CapabilityDescriptor],
        history: &[HistoryEntry],
    ) -> Result<Action, AgentError>;
}
