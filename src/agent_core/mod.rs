//! Agent Core: the bounded dispatch loop and its collaborators.
//!
//! Submodules:
//! - `dispatch`: Alternates strategy decisions and capability invocations
//! - `strategy`: The `ReasoningStrategy` seam
//! - `llm_strategy`: Strategy backed by an OpenAI-compatible model
//! - `report`: Turns a finished run into a `Report`
//! - `types`: Invocation records, actions, dispatch state
//! - `errors`: Agent-level error types

pub mod dispatch;
pub mod errors;
pub mod llm_strategy;
pub mod report;
pub mod strategy;
pub mod types;

// Re-exports for convenience
pub use dispatch::{DispatchLoop, DEFAULT_MAX_ITERATIONS};
pub use errors::AgentError;
pub use llm_strategy::LlmStrategy;
pub use report::{render, Report, ReportStatus, StepSummary};
pub use strategy::ReasoningStrategy;
pub use types::{Action, DispatchState, HistoryEntry, InvocationRequest, Terminal};
