use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use apprentice::cancel::{cancel_pair, CancelHandle};
use apprentice::commands::run::{exit_code, EXIT_CONFIG};
use apprentice::commands::{gateway, run, tools};
use apprentice::config::Settings;
use apprentice::{init_tracing, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "apprentice", version)]
#[command(about = "Apprentice - migrate tracker issues through MCP services")]
struct Cli {
    /// YAML config file (defaults to $APPRENTICE_CONFIG, then the environment)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one task to completion and print its report
    Run {
        /// Tracker issue key, e.g. PROJ-123
        task_id: String,
        /// Enable debug logging
        #[arg(long)]
        verbose: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
        /// Override the iteration limit
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Handle a cloud-function event and print the response
    Invoke {
        /// Event file, or `-` for stdin (default)
        #[arg(long)]
        event: Option<String>,
    },
    /// Connect to every service and list the merged capabilities
    Tools {
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match execute(cli.command, &mut settings).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands, settings: &mut Settings) -> anyhow::Result<ExitCode> {
    let (handle, cancel) = cancel_pair();
    spawn_ctrl_c(handle);

    match command {
        Commands::Run {
            task_id,
            verbose,
            json,
            max_iterations,
        } => {
            init_tracing(verbose, &settings.log_level, LogFormat::Text);
            if let Some(n) = max_iterations {
                settings.max_iterations = n;
            }

            let outcome = run::run(&task_id, settings, &cancel).await;
            match &outcome {
                Ok(report) if json => {
                    println!("{}", report.to_json().context("serializing report")?)
                }
                Ok(report) => println!("{}", report.to_human()),
                Err(e) => eprintln!("configuration error: {e}"),
            }
            Ok(ExitCode::from(exit_code(&outcome)))
        }

        Commands::Invoke { event } => {
            init_tracing(false, &settings.log_level, LogFormat::Json);
            let raw = read_event(event.as_deref())?;
            let event: serde_json::Value =
                serde_json::from_str(&raw).context("event is not valid JSON")?;

            let response = gateway::handle_event(event, settings, &cancel).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&response).context("serializing response")?
            );
            Ok(ExitCode::SUCCESS)
        }

        Commands::Tools { json } => {
            init_tracing(false, &settings.log_level, LogFormat::Text);
            let listing = tools::list_tools(settings, &cancel)
                .await
                .context("listing capabilities")?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&listing).context("serializing listing")?
                );
            } else {
                print!("{}", listing.to_human());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Cancel the run on the first Ctrl-C.
fn spawn_ctrl_c(handle: CancelHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            handle.cancel();
        }
    });
}

fn read_event(source: Option<&str>) -> anyhow::Result<String> {
    match source {
        None | Some("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading event from stdin")?;
            Ok(buf)
        }
        Some(path) => std::fs::read_to_string(Path::new(path))
            .with_context(|| format!("reading event file {path}")),
    }
}
