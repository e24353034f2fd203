//! Inference Client: OpenAI-compatible chat completions.
//!
//! This module handles all communication with the model endpoint:
//! - Non-streaming chat completions with function calling
//! - Parsing tool calls out of the reply
//! - Retry with backoff on transient failures
//!
//! The client speaks the OpenAI Chat Completions API, so any compatible
//! endpoint (hosted or local) works through configuration alone.

pub mod client;
pub mod config;
pub mod errors;
pub mod types;

// Re-exports for convenience
pub use client::InferenceClient;
pub use config::InferenceConfig;
pub use errors::InferenceError;
pub use types::{ChatMessage, Completion, Role, ToolCall, ToolDefinition};
