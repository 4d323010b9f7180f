//! # Itinerary Router
//!
//! Routes LLM completion requests across Cerebras, Gemini and Groq with
//! complexity-based provider selection, key rotation and deadline-bound
//! fallback.
//!
//! ## Usage
//!
//! ```bash
//! # Route a prompt with the default configuration
//! itinerary-router route --prompt "Three days in Lisbon"
//!
//! # Route a JSON request with a config file and the full trace
//! itinerary-router --config router.yaml route --request req.json --trace
//!
//! # Probe every provider
//! itinerary-router health
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use gateway_config::{load_config, LogFormat, RouterConfig};
use gateway_telemetry::{init_tracing, shutdown_tracing, LogStyle, TracingConfig};
use std::process::ExitCode;
use tracing::{error, info};

mod cli;
mod envelope;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).context("loading configuration")?;

    let tracer = init_tracing(&tracing_config(&config, cli.json_logs))?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting itinerary router");

    let result = cli.execute(config).await;
    if let Err(e) = &result {
        error!(error = %e, "Command failed");
    }

    shutdown_tracing(tracer);
    result
}

fn tracing_config(config: &RouterConfig, json_logs: bool) -> TracingConfig {
    let style = match config.telemetry.log_format {
        _ if json_logs => LogStyle::Json,
        LogFormat::Json => LogStyle::Json,
        LogFormat::Pretty => LogStyle::Pretty,
    };
    let tracing = TracingConfig::new(config.telemetry.service_name.clone())
        .with_log_level(config.telemetry.log_level.clone())
        .with_sampling_rate(config.telemetry.trace_sampling_rate)
        .with_style(style);
    match &config.telemetry.otlp_endpoint {
        Some(endpoint) => tracing.with_otlp_endpoint(endpoint.clone()),
        None => tracing,
    }
}
