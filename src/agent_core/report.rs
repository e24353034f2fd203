//! Result Reporter.
//!
//! Turns a terminal [`DispatchState`] into a [`Report`] that can be printed
//! for humans or serialized as JSON. Rendering is pure.

use serde::Serialize;

use super::types::{DispatchState, Terminal};
use crate::mcp_client::Outcome;

/// Overall verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Partial,
    Failure,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReportStatus::Success => "success",
            ReportStatus::Partial => "partial",
            ReportStatus::Failure => "failure",
        };
        f.write_str(s)
    }
}

/// One executed step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub capability: String,
    pub outcome: Outcome,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final record of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub goal: String,
    pub status: ReportStatus,
    pub summary: String,
    pub iterations: u32,
    pub steps: Vec<StepSummary>,
    pub final_answer: Option<String>,
    pub error: Option<String>,
}

/// Build the report for a dispatch state.
///
/// - `success` iff the strategy completed with `succeeded = true`
/// - `failure` on a local failure, or when nothing succeeded at all
/// - `partial` otherwise
pub fn render(state: &DispatchState) -> Report {
    let steps: Vec<StepSummary> = state
        .history()
        .iter()
        .map(|entry| StepSummary {
            capability: entry.request.capability.clone(),
            outcome: entry.result.outcome,
            execution_time_ms: entry.result.execution_time_ms,
            error: entry.result.error_detail.clone(),
        })
        .collect();

    let ok_steps = state.successful_invocations();

    let (status, summary, final_answer, error) = match state.terminal() {
        Some(Terminal::Completed {
            answer,
            succeeded: true,
        }) => (
            ReportStatus::Success,
            format!("Goal completed after {} invocation(s).", steps.len()),
            Some(answer.clone()),
            None,
        ),
        Some(Terminal::Completed {
            answer,
            succeeded: false,
        }) => (
            degraded(ok_steps),
            format!(
                "Strategy gave up after {} invocation(s), {ok_steps} succeeded.",
                steps.len()
            ),
            Some(answer.clone()),
            None,
        ),
        Some(Terminal::LimitExceeded { limit }) => (
            degraded(ok_steps),
            format!(
                "Stopped at the iteration limit ({limit}); {ok_steps} of {} invocation(s) succeeded.",
                steps.len()
            ),
            None,
            Some(format!("iteration limit of {limit} reached")),
        ),
        Some(Terminal::Failed { reason }) => (
            ReportStatus::Failure,
            format!("Run failed after {} invocation(s): {reason}", steps.len()),
            None,
            Some(reason.clone()),
        ),
        None => (
            degraded(ok_steps),
            "Run did not finish.".to_string(),
            None,
            None,
        ),
    };

    Report {
        task_id: None,
        goal: state.goal().to_string(),
        status,
        summary,
        iterations: state.iteration_count(),
        steps,
        final_answer,
        error,
    }
}

fn degraded(ok_steps: usize) -> ReportStatus {
    if ok_steps == 0 {
        ReportStatus::Failure
    } else {
        ReportStatus::Partial
    }
}

impl Report {
    /// Report for a run that never reached the dispatch loop.
    pub fn failure(goal: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            task_id: None,
            goal: goal.into(),
            status: ReportStatus::Failure,
            summary: format!("Run could not start: {error}"),
            iterations: 0,
            steps: Vec::new(),
            final_answer: None,
            error: Some(error),
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ReportStatus::Success
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Plain-text block for terminals.
    pub fn to_human(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = String::new();
        out.push_str(&rule);
        out.push('\n');
        if let Some(task_id) = &self.task_id {
            out.push_str(&format!("Task: {task_id}\n"));
        }
        out.push_str(&format!("Status: {}\n", self.status));
        out.push_str(&format!("Success: {}\n", self.is_success()));
        out.push_str(&format!("Iterations: {}\n", self.iterations));
        out.push_str(&format!("Summary: {}\n", self.summary));

        if !self.steps.is_empty() {
            out.push_str("Steps:\n");
            for (i, step) in self.steps.iter().enumerate() {
                let outcome = match step.outcome {
                    Outcome::Ok => "ok",
                    Outcome::Error => "error",
                };
                out.push_str(&format!(
                    "  {}. {} [{outcome}] ({} ms)",
                    i + 1,
                    step.capability,
                    step.execution_time_ms
                ));
                if let Some(err) = &step.error {
                    out.push_str(&format!(": {err}"));
                }
                out.push('\n');
            }
        }

        if let Some(answer) = &self.final_answer {
            out.push_str(&format!("Answer: {answer}\n"));
        }
        if let Some(error) = &self.error {
            out.push_str(&format!("Error: {error}\n"));
        }
        out.push_str(&rule);
        out
    }
}
