pub mod agent_core;
pub mod cancel;
pub mod commands;
pub mod config;
pub mod inference;
pub mod mcp_client;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Build the log filter.
///
/// `RUST_LOG` wins when set. Otherwise `verbose` forces debug, else the
/// configured level applies to this crate and `warn` to dependencies.
pub fn log_filter(verbose: bool, log_level: &str) -> tracing_subscriber::EnvFilter {
    use tracing_subscriber::EnvFilter;

    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    let level = if verbose {
        "debug".to_string()
    } else {
        match log_level.trim().to_ascii_lowercase().as_str() {
            "warning" => "warn".to_string(),
            "critical" | "fatal" => "error".to_string(),
            "" => "info".to_string(),
            other => other.to_string(),
        }
    };

    EnvFilter::try_new(format!("apprentice={level},warn"))
        .unwrap_or_else(|_| EnvFilter::new("apprentice=info,warn"))
}

/// Initialize the tracing subscriber. Logs go to stderr so stdout carries
/// only the report.
pub fn init_tracing(verbose: bool, log_level: &str, format: LogFormat) {
    use tracing_subscriber::fmt;

    let filter = log_filter(verbose, log_level);
    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    // try_init: a second call (tests, embedding) keeps the first subscriber.
    let _ = match format {
        LogFormat::Text => builder.with_ansi(false).try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
