//! Task runner: one goal from registry initialization to a rendered report.

use std::sync::Arc;

use tracing::Instrument;

use crate::agent_core::{render, DispatchLoop, LlmStrategy, ReasoningStrategy, Report};
use crate::cancel::CancelToken;
use crate::config::{ConfigError, Settings};
use crate::inference::InferenceClient;
use crate::mcp_client::{CapabilityRegistry, Connector, ProcessConnector};

/// Exit code when the report is a success.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit code for a partial or failed report.
pub const EXIT_FAILURE: u8 = 1;
/// Exit code when the run could not start because of configuration.
pub const EXIT_CONFIG: u8 = 2;

/// Natural-language goal for migrating one tracker issue.
pub fn build_goal(task_id: &str) -> String {
    format!(
        "Migrate Jira issue {task_id} to GitHub. Fetch the issue details and create a GitHub issue."
    )
}

/// Build the model-backed strategy from settings.
pub fn build_strategy(settings: &Settings) -> Result<LlmStrategy, ConfigError> {
    let config = settings.inference_config()?;
    let client = InferenceClient::new(config).map_err(|e| ConfigError::Invalid {
        key: "OPENAI_BASE_URL".into(),
        reason: e.to_string(),
    })?;
    Ok(LlmStrategy::new(client)
        .with_github(settings.github_org.clone(), settings.github_assignee.clone()))
}

/// Run `task_id` with the default process connector and model strategy.
///
/// Configuration problems are returned as errors; everything that happens
/// once the run has started ends up in the report.
pub async fn run(
    task_id: &str,
    settings: &Settings,
    cancel: &CancelToken,
) -> Result<Report, ConfigError> {
    let mut strategy = build_strategy(settings)?;
    let connector = Arc::new(ProcessConnector::new(settings.connect_timeout));
    Ok(run_task(task_id, settings, connector, &mut strategy, cancel).await)
}

/// Process exit code for the outcome of [`run`].
pub fn exit_code(outcome: &Result<Report, ConfigError>) -> u8 {
    match outcome {
        Ok(report) if report.is_success() => EXIT_SUCCESS,
        Ok(_) => EXIT_FAILURE,
        Err(_) => EXIT_CONFIG,
    }
}

/// Run `task_id` against the configured services through `connector`.
pub async fn run_task(
    task_id: &str,
    settings: &Settings,
    connector: Arc<dyn Connector>,
    strategy: &mut dyn ReasoningStrategy,
    cancel: &CancelToken,
) -> Report {
    let run_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!("run", %run_id, task_id);
    execute(task_id, settings, connector, strategy, cancel)
        .instrument(span)
        .await
}

async fn execute(
    task_id: &str,
    settings: &Settings,
    connector: Arc<dyn Connector>,
    strategy: &mut dyn ReasoningStrategy,
    cancel: &CancelToken,
) -> Report {
    let goal = build_goal(task_id);
    tracing::info!(services = settings.mcp_servers.len(), "starting run");

    let registry = match CapabilityRegistry::initialize(
        &settings.mcp_servers,
        connector,
        settings.registry_options(),
        cancel,
    )
    .await
    {
        Ok(registry) => registry,
        Err(e) => {
            tracing::error!(error = %e, "registry initialization failed");
            return Report::failure(goal, e.to_string()).with_task_id(task_id);
        }
    };

    tracing::info!("{}", registry.capability_summary());

    let state = DispatchLoop::new(settings.max_iterations)
        .run(&goal, &registry, strategy, cancel)
        .await;

    for e in registry.shutdown().await {
        tracing::warn!(error = %e, "service shutdown error");
    }

    let report = render(&state).with_task_id(task_id);
    tracing::info!(
        status = %report.status,
        iterations = report.iterations,
        "run finished"
    );
    report
}
