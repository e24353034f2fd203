//! Shared types for the agent core.
//!
//! Invocation records, strategy actions, and the dispatch state the loop
//! builds up over a run.

use serde::Serialize;

use crate::mcp_client::InvocationResult;

// ─── Invocations ────────────────────────────────────────────────────────────

/// A capability call chosen by the strategy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvocationRequest {
    /// Qualified capability name (`service.tool`).
    pub capability: String,
    /// JSON object of arguments.
    pub arguments: serde_json::Value,
}

/// One executed invocation and its result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub request: InvocationRequest,
    pub result: InvocationResult,
}

// ─── Strategy Actions ───────────────────────────────────────────────────────

/// What the strategy wants to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Call a capability.
    Invoke {
        capability: String,
        arguments: serde_json::Value,
    },
    /// Stop with a final answer.
    Complete { answer: String, succeeded: bool },
}

// ─── Dispatch State ─────────────────────────────────────────────────────────

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Terminal {
    /// The strategy declared the goal done (or given up on).
    Completed { answer: String, succeeded: bool },
    /// The iteration limit was reached.
    LimitExceeded { limit: u32 },
    /// A local failure or cancellation aborted the run.
    Failed { reason: String },
}

/// State of one run. Only the dispatch loop mutates it.
///
/// The iteration count is the history length, and nothing is appended once
/// a terminal state is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchState {
    goal: String,
    history: Vec<HistoryEntry>,
    terminal: Option<Terminal>,
}

impl DispatchState {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            history: Vec::new(),
            terminal: None,
        }
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    /// Number of invocations executed so far.
    pub fn iteration_count(&self) -> u32 {
        self.history.len() as u32
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn terminal(&self) -> Option<&Terminal> {
        self.terminal.as_ref()
    }

    /// Number of invocations whose outcome was ok.
    pub fn successful_invocations(&self) -> usize {
        self.history.iter().filter(|e| e.result.is_ok()).count()
    }

    /// Append an executed invocation. Refused once the state is terminal.
    #[must_use]
    pub(crate) fn record(&mut self, entry: HistoryEntry) -> bool {
        if self.terminal.is_some() {
            return false;
        }
        self.history.push(entry);
        true
    }

    /// Set the terminal state. The first one wins.
    pub(crate) fn finish(&mut self, terminal: Terminal) {
        if self.terminal.is_none() {
            self.terminal = Some(terminal);
        }
    }
}
