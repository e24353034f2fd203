//! The bounded dispatch loop.
//!
//! Alternates between asking the strategy for an action and executing it
//! against the registry, until the strategy completes, the iteration limit
//! is hit, a local failure occurs, or the run is cancelled.

use tracing::Instrument;

use super::strategy::ReasoningStrategy;
use super::types::{Action, DispatchState, HistoryEntry, InvocationRequest, Terminal};
use crate::cancel::CancelToken;
use crate::mcp_client::CapabilityRegistry;

/// Invocation limit when none is configured.
pub const DEFAULT_MAX_ITERATIONS: u32 = 15;

/// Reason recorded when the cancel token fires.
pub const CANCELLED_REASON: &str = "cancelled";

/// Outcome of a single iteration.
enum Step {
    Record(HistoryEntry),
    Finish(Terminal),
}

/// Runs one goal to a terminal state.
#[derive(Debug, Clone, Copy)]
pub struct DispatchLoop {
    max_iterations: u32,
}

impl Default for DispatchLoop {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

impl DispatchLoop {
    pub fn new(max_iterations: u32) -> Self {
        Self { max_iterations }
    }

    /// Drive `goal` to a terminal state. Never returns a non-terminal state.
    pub async fn run(
        &self,
        goal: &str,
        registry: &CapabilityRegistry,
        strategy: &mut dyn ReasoningStrategy,
        cancel: &CancelToken,
    ) -> DispatchState {
        let mut state = DispatchState::new(goal);

        tracing::info!(
            max_iterations = self.max_iterations,
            capabilities = registry.len(),
            "dispatch loop started"
        );

        loop {
            if state.iteration_count() >= self.max_iterations {
                state.finish(Terminal::LimitExceeded {
                    limit: self.max_iterations,
                });
                break;
            }

            let n = state.iteration_count() + 1;
            let step = self
                .step(goal, registry, strategy, cancel, state.history())
                .instrument(tracing::info_span!("iteration", n))
                .await;

            match step {
                Step::Record(entry) => {
                    let recorded = state.record(entry);
                    debug_assert!(recorded, "record after terminal state");
                    if state.iteration_count() == self.max_iterations {
                        state.finish(Terminal::LimitExceeded {
                            limit: self.max_iterations,
                        });
                        break;
                    }
                }
                Step::Finish(terminal) => {
                    state.finish(terminal);
                    break;
                }
            }
        }

        match state.terminal() {
            Some(Terminal::Completed { succeeded, .. }) => tracing::info!(
                iterations = state.iteration_count(),
                succeeded,
                "dispatch loop completed"
            ),
            Some(Terminal::LimitExceeded { limit }) => tracing::warn!(
                iterations = state.iteration_count(),
                limit,
                "dispatch loop hit the iteration limit"
            ),
            Some(Terminal::Failed { reason }) => tracing::warn!(
                iterations = state.iteration_count(),
                %reason,
                "dispatch loop failed"
            ),
            None => {}
        }

        state
    }

    async fn step(
        &self,
        goal: &str,
        registry: &CapabilityRegistry,
        strategy: &mut dyn ReasoningStrategy,
        cancel: &CancelToken,
        history: &[HistoryEntry],
    ) -> Step {
        if cancel.is_cancelled() {
            return cancelled();
        }

        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled(),
            decision = strategy.decide(goal, registry.descriptors(), history) => decision,
        };

        let (capability, arguments) = match decision {
            Ok(Action::Complete { answer, succeeded }) => {
                return Step::Finish(Terminal::Completed { answer, succeeded });
            }
            Ok(Action::Invoke {
                capability,
                arguments,
            }) => (capability, arguments),
            Err(e) => {
                tracing::warn!(error = %e, "strategy failed");
                return Step::Finish(Terminal::Failed {
                    reason: e.to_string(),
                });
            }
        };

        tracing::debug!(capability = %capability, "invoking capability");

        let invoked = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled(),
            invoked = registry.invoke(&capability, arguments.clone()) => invoked,
        };

        match invoked {
            Ok(result) => Step::Record(HistoryEntry {
                request: InvocationRequest {
                    capability,
                    arguments,
                },
                result,
            }),
            Err(e) => {
                tracing::warn!(capability = %capability, error = %e, "invocation failed locally");
                Step::Finish(Terminal::Failed {
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn cancelled() -> Step {
    Step::Finish(Terminal::Failed {
        reason: CANCELLED_REASON.to_string(),
    })
}
