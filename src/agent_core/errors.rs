//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;

/// Errors a reasoning strategy can raise while choosing the next action.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The strategy could not produce a usable decision.
    #[error("strategy error: {reason}")]
    Strategy { reason: String },

    /// The model endpoint failed.
    #[error("inference failed: {0}")]
    Inference(#[from] InferenceError),

    /// The run was cancelled while the strategy was deciding.
    #[error("cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Strategy {
            reason: format!("serialization error: {e}"),
        }
    }
}
