//! CLI argument definitions using clap.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use gateway_config::RouterConfig;
use gateway_core::{RequestId, ResponseFormat, RoutingRequest, TaskKind};
use gateway_providers::build_registry;
use gateway_routing::RoutingPipeline;
use gateway_telemetry::{MetricsSink, ObservabilityRecorder, PricingTable, TracingSink};
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::envelope::{exit_status, Envelope};

/// Itinerary router - multi-provider LLM routing with fallback
#[derive(Parser, Debug)]
#[command(name = "itinerary-router")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (.yaml, .yml or .toml)
    #[arg(short, long, env = "ROUTER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log as JSON lines regardless of configuration
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Print compact JSON
    #[arg(long, global = true)]
    pub compact: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Route one request and print the response envelope
    Route(RouteArgs),

    /// Probe every provider and print the health snapshot
    Health(HealthArgs),

    /// Print the resolved configuration (keys are never printed)
    Config,
}

/// Requested output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    /// Plain text
    Text,
    /// Any JSON object
    Json,
}

/// Kind of work requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TaskArg {
    /// General question
    Question,
    /// Itinerary planning
    Planning,
}

#[derive(Args, Debug)]
pub struct HealthArgs {
    /// Keep probing on the configured interval until interrupted
    #[arg(short, long)]
    pub watch: bool,
}

#[derive(Args, Debug)]
pub struct RouteArgs {
    /// Prompt text; read from stdin when neither this nor --request is given
    #[arg(short, long, conflicts_with = "request")]
    pub prompt: Option<String>,

    /// JSON routing request file, `-` for stdin
    #[arg(short, long)]
    pub request: Option<PathBuf>,

    /// System instructions
    #[arg(long)]
    pub system: Option<String>,

    /// Upper bound on generated tokens
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Response format
    #[arg(long, value_enum, default_value_t = FormatArg::Text)]
    pub format: FormatArg,

    /// Kind of work requested
    #[arg(long, value_enum, default_value_t = TaskArg::Question)]
    pub task: TaskArg,

    /// Flag the task as needing multi-step reasoning
    #[arg(long)]
    pub multi_step: bool,

    /// Correlation id; generated when absent
    #[arg(long)]
    pub request_id: Option<String>,

    /// Overall deadline in milliseconds, overriding configuration
    #[arg(long)]
    pub deadline_ms: Option<u64>,

    /// Include the full routing trace in the envelope
    #[arg(long)]
    pub trace: bool,

    /// Print Prometheus metrics to stderr after routing
    #[arg(long)]
    pub metrics: bool,
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self, config: RouterConfig) -> Result<ExitCode> {
        match self.command {
            Commands::Route(ref args) => route(args, &config, self.compact).await,
            Commands::Health(ref args) => health(args, &config, self.compact).await,
            Commands::Config => {
                print_json(&config, self.compact)?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

async fn route(args: &RouteArgs, config: &RouterConfig, compact: bool) -> Result<ExitCode> {
    let started = Instant::now();
    let request = args.routing_request()?;

    let registry = Arc::new(build_registry(config)?);
    let mut recorder = ObservabilityRecorder::new(PricingTable::with_overrides(&config.pricing))
        .with_sink(Arc::new(TracingSink));
    let metrics = if config.telemetry.metrics || args.metrics {
        let sink = Arc::new(MetricsSink::new()?);
        recorder = recorder.with_sink(sink.clone());
        Some(sink)
    } else {
        None
    };

    let mut pipeline = RoutingPipeline::from_config(config, registry, Arc::new(recorder));
    if let Some(ms) = args.deadline_ms {
        pipeline = pipeline.with_deadline(Duration::from_millis(ms));
    }

    info!(request_id = %request.request_id, "Routing request");
    let routed = pipeline.handle(&request).await;

    let envelope = Envelope::new(&routed, started.elapsed(), args.trace);
    print_json(&envelope, compact)?;

    if args.metrics {
        if let Some(metrics) = metrics {
            eprintln!("{}", metrics.gather()?);
        }
    }
    Ok(ExitCode::from(exit_status(&routed)))
}

async fn health(args: &HealthArgs, config: &RouterConfig, compact: bool) -> Result<ExitCode> {
    let registry = Arc::new(build_registry(config)?);
    let snapshot = registry.run_health_check().await;
    let healthy = snapshot.iter().any(|h| h.is_available);
    print_json(&snapshot, compact)?;

    if args.watch {
        let interval = config.health.check_interval;
        info!(interval = ?interval, "Watching provider health");
        let ticker = registry.spawn_health_checks(interval);
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                () = tokio::time::sleep(interval) => print_json(&registry.snapshot(), compact)?,
            }
        }
        ticker.abort();
    }

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(3)
    })
}

impl RouteArgs {
    fn routing_request(&self) -> Result<RoutingRequest> {
        let mut request = match (&self.prompt, &self.request) {
            (Some(prompt), _) => RoutingRequest::new(prompt.clone()),
            (None, Some(path)) => {
                let raw = if path.as_os_str() == "-" {
                    read_stdin()?
                } else {
                    std::fs::read_to_string(path)
                        .with_context(|| format!("reading request file {}", path.display()))?
                };
                serde_json::from_str(&raw).context("parsing routing request")?
            }
            (None, None) => {
                if std::io::stdin().is_terminal() {
                    bail!("no prompt given: pass --prompt, --request, or pipe one on stdin");
                }
                RoutingRequest::new(read_stdin()?.trim_end())
            }
        };

        if let Some(system) = &self.system {
            request = request.with_system(system.clone());
        }
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        if self.format == FormatArg::Json {
            request = request.with_response_format(ResponseFormat::JsonObject);
        }
        if self.task == TaskArg::Planning {
            request = request.with_task(TaskKind::Planning);
        }
        if self.multi_step {
            request = request.with_multi_step_reasoning(true);
        }
        if let Some(id) = &self.request_id {
            request = request.with_request_id(RequestId::new(id.clone()));
        }

        debug!(request_id = %request.request_id, chars = request.prompt_chars(), "Parsed request");
        Ok(request)
    }
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("reading stdin")?;
    Ok(buffer)
}

fn print_json<T: serde::Serialize>(value: &T, compact: bool) -> Result<()> {
    let output = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{output}");
    Ok(())
}
