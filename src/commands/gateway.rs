//! Request/response surface for cloud-function style invocation.
//!
//! Two event shapes are accepted:
//! - direct: `{"task_id": "PROJ-123"}` → the report as JSON
//! - gateway: `{"body": "{\"task_id\": \"PROJ-123\"}"}` (or an object body)
//!   → `{statusCode, headers, body}` with the report serialized in `body`
//!
//! The handler never propagates a fault: configuration errors and panics
//! inside the run come back as failure reports.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde_json::{json, Value};

use super::run::{build_goal, run};
use crate::agent_core::Report;
use crate::cancel::CancelToken;
use crate::config::Settings;

/// Keys the task identifier may arrive under, in lookup order.
pub const TASK_ID_KEYS: [&str; 3] = ["task_id", "taskIdentifier", "jira_key"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Direct,
    Gateway,
}

/// Handle one event with the default runner.
pub async fn handle_event(event: Value, settings: &Settings, cancel: &CancelToken) -> Value {
    handle_event_with(&event, |task_id| async move {
        match run(&task_id, settings, cancel).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(error = %e, "configuration error");
                Report::failure(build_goal(&task_id), e.to_string()).with_task_id(task_id)
            }
        }
    })
    .await
}

/// Handle one event, producing the report through `runner`.
pub async fn handle_event_with<F, Fut>(event: &Value, runner: F) -> Value
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Report>,
{
    let (kind, task_id) = match parse_event(event) {
        Ok(parsed) => parsed,
        Err(reason) => {
            tracing::warn!(%reason, "rejected event");
            return bad_request(&reason);
        }
    };

    tracing::info!(task_id = %task_id, ?kind, "handling event");

    let report = match AssertUnwindSafe(runner(task_id.clone()))
        .catch_unwind()
        .await
    {
        Ok(report) => report,
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(task_id = %task_id, %message, "run panicked");
            Report::failure(build_goal(&task_id), format!("internal error: {message}"))
                .with_task_id(task_id.as_str())
        }
    };

    match kind {
        EventKind::Direct => serde_json::to_value(&report)
            .unwrap_or_else(|e| json!({"status": "failure", "error": e.to_string()})),
        EventKind::Gateway => {
            let status_code = if report.is_success() { 200 } else { 500 };
            let body = report.to_json().unwrap_or_else(|e| {
                json!({"status": "failure", "error": e.to_string()}).to_string()
            });
            json!({
                "statusCode": status_code,
                "headers": {"Content-Type": "application/json"},
                "body": body,
            })
        }
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn parse_event(event: &Value) -> Result<(EventKind, String), String> {
    if let Some(id) = find_task_id(event) {
        return Ok((EventKind::Direct, id));
    }

    let Some(body) = event.get("body") else {
        return Err(missing_task_id());
    };

    let parsed;
    let body = match body {
        Value::String(raw) => {
            parsed = serde_json::from_str::<Value>(raw)
                .map_err(|e| format!("Invalid request body: {e}"))?;
            &parsed
        }
        other => other,
    };

    find_task_id(body)
        .map(|id| (EventKind::Gateway, id))
        .ok_or_else(missing_task_id)
}

fn find_task_id(value: &Value) -> Option<String> {
    TASK_ID_KEYS
        .iter()
        .filter_map(|key| value.get(key))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

fn missing_task_id() -> String {
    "Missing required parameter: task_id".to_string()
}

fn bad_request(reason: &str) -> Value {
    json!({
        "statusCode": 400,
        "headers": {"Content-Type": "application/json"},
        "body": json!({"status": "failure", "error": reason}).to_string(),
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
