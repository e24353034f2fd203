//! Model-backed reasoning strategy.
//!
//! Each decision rebuilds the conversation from the dispatch history and
//! asks an OpenAI-compatible endpoint for the next tool call. Capabilities
//! are exposed as functions with sanitized names, plus a synthetic
//! `finish_task` function the model calls to end the run.

use std::collections::HashMap;

use async_trait::async_trait;

use super::errors::AgentError;
use super::strategy::ReasoningStrategy;
use super::types::{Action, HistoryEntry};
use crate::inference::{ChatMessage, Completion, InferenceClient, ToolDefinition};
use crate::mcp_client::registry::sanitize_function_name;
use crate::mcp_client::CapabilityDescriptor;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Name of the function that ends the run.
pub const FINISH_TOOL: &str = "finish_task";

/// Upper bound on a tool result fed back to the model, in bytes.
const MAX_RESULT_BYTES: usize = 6000;

const SYSTEM_PROMPT: &str = "You are an expert assistant that helps migrate Jira issues to GitHub.

Your goal is to:
1. Fetch the Jira issue details using the provided Jira key
2. Extract relevant information (title, description, labels, etc.)
3. Create a corresponding GitHub issue with the extracted information
4. Link back to the original Jira issue if needed

Use the available tools to interact with Jira and GitHub.
Be concise and efficient in your actions.
When the work is done, or cannot be done, call finish_task with a short summary.";

// ─── LlmStrategy ─────────────────────────────────────────────────────────────

/// Strategy that delegates each decision to a chat-completions model.
pub struct LlmStrategy {
    client: InferenceClient,
    github_org: Option<String>,
    github_assignee: Option<String>,
}

impl LlmStrategy {
    pub fn new(client: InferenceClient) -> Self {
        Self {
            client,
            github_org: None,
            github_assignee: None,
        }
    }

    /// Target organization and default assignee mentioned in the prompt.
    pub fn with_github(mut self, org: Option<String>, assignee: Option<String>) -> Self {
        self.github_org = org;
        self.github_assignee = assignee;
        self
    }

    fn system_prompt(&self) -> String {
        format!(
            "{SYSTEM_PROMPT}\n\nOrganization: {}\nDefault Assignee: {}\n",
            self.github_org.as_deref().unwrap_or("N/A"),
            self.github_assignee.as_deref().unwrap_or("N/A"),
        )
    }

    /// `names` maps function names to qualified names, as built by
    /// [`build_tools`], so replayed calls use the names the model was offered.
    fn build_messages(
        &self,
        goal: &str,
        history: &[HistoryEntry],
        names: &HashMap<String, String>,
    ) -> Vec<ChatMessage> {
        let function_for: HashMap<&str, &str> = names
            .iter()
            .map(|(function, qualified)| (qualified.as_str(), function.as_str()))
            .collect();

        let mut messages = Vec::with_capacity(2 + history.len() * 2);
        messages.push(ChatMessage::system(self.system_prompt()));
        messages.push(ChatMessage::user(goal));

        for (i, entry) in history.iter().enumerate() {
            let id = format!("call_{}", i + 1);
            let capability = entry.request.capability.as_str();
            let function_name = function_for
                .get(capability)
                .map(|f| f.to_string())
                .unwrap_or_else(|| sanitize_function_name(capability));
            messages.push(ChatMessage::assistant_tool_call(
                &id,
                &function_name,
                &entry.request.arguments,
            ));
            let text = entry.result.text();
            messages.push(ChatMessage::tool_result(
                &id,
                truncate_utf8(&text, MAX_RESULT_BYTES),
            ));
        }

        messages
    }
}

#[async_trait]
impl ReasoningStrategy for LlmStrategy {
    async fn decide(
        &mut self,
        goal: &str,
        capabilities: &[CapabilityDescriptor],
        history: &[HistoryEntry],
    ) -> Result<Action, AgentError> {
        let (tools, names) = build_tools(capabilities);
        let messages = self.build_messages(goal, history, &names);

        let completion = self.client.chat_completion(messages, Some(tools)).await?;
        let last_ok = history.last().map(|e| e.result.is_ok()).unwrap_or(false);
        Ok(interpret(completion, &names, last_ok))
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Function definitions for every capability plus `finish_task`, and the
/// map from sanitized function names back to qualified names.
///
/// Names that collide after sanitizing get a numeric suffix, in capability
/// order, so every capability stays reachable.
fn build_tools(
    capabilities: &[CapabilityDescriptor],
) -> (Vec<ToolDefinition>, HashMap<String, String>) {
    let mut names: HashMap<String, String> = HashMap::with_capacity(capabilities.len());
    let mut tools = Vec::with_capacity(capabilities.len() + 1);

    for d in capabilities {
        let function_name = unique_function_name(&d.qualified_name, &names);
        if function_name != sanitize_function_name(&d.qualified_name) {
            tracing::debug!(
                capability = %d.qualified_name,
                function = %function_name,
                "function name collision, using suffixed name"
            );
        }
        let parameters = if d.parameter_schema.is_object() {
            d.parameter_schema.clone()
        } else {
            serde_json::json!({"type": "object", "properties": {}})
        };
        tools.push(ToolDefinition::function(
            &function_name,
            &d.description,
            parameters,
        ));
        names.insert(function_name, d.qualified_name.clone());
    }

    tools.push(ToolDefinition::function(
        FINISH_TOOL,
        "End the task. Set succeeded to false if the goal could not be achieved.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "succeeded": {"type": "boolean"},
                "summary": {"type": "string"}
            },
            "required": ["succeeded", "summary"]
        }),
    ));

    (tools, names)
}

fn unique_function_name(qualified: &str, taken: &HashMap<String, String>) -> String {
    let is_free = |name: &str| name != FINISH_TOOL && !taken.contains_key(name);

    let base = sanitize_function_name(qualified);
    if is_free(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{base}_{n}");
        if is_free(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Turn a model reply into an action. Only the first tool call is used.
fn interpret(completion: Completion, names: &HashMap<String, String>, last_ok: bool) -> Action {
    let Some(call) = completion.tool_calls.into_iter().next() else {
        return Action::Complete {
            answer: completion.content.unwrap_or_default(),
            succeeded: last_ok,
        };
    };

    if call.name == FINISH_TOOL {
        let succeeded = call
            .arguments
            .get("succeeded")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let answer = call
            .arguments
            .get("summary")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or(completion.content)
            .unwrap_or_default();
        return Action::Complete { answer, succeeded };
    }

    // Unmapped names pass through so the registry reports them as unknown.
    let capability = names.get(&call.name).cloned().unwrap_or(call.name);
    Action::Invoke {
        capability,
        arguments: call.arguments,
    }
}

/// Truncate to at most `max_bytes` on a char boundary.
fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
