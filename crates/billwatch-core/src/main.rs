//! billwatch CLI
//!
//! Entry point for the scheduler that triggers a billing report run.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use billwatch::config::LoggingConfig;
use billwatch::prelude::*;

/// Legacy variable older deployments keep the webhook token in
const LEGACY_TOKEN_ENV: &str = "LINEtoken";

/// billwatch - daily cloud billing digest
#[derive(Parser)]
#[command(name = "billwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "BILLWATCH_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Webhook bearer token
    #[arg(long, global = true, env = "BILLWATCH_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch charges and post the report (default)
    Run,

    /// Print the report without sending it
    Preview {
        /// Print the fetched charges as JSON instead of the message text
        #[arg(long)]
        json: bool,
    },

    /// List the services currently reporting charges
    Services,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.logging, cli.verbose);

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config, cli.token).await,
        Commands::Preview { json } => run_preview(config, json).await,
        Commands::Services => run_services(config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "billwatch failed");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_orchestrator(
    config: &Config,
    credential: Credential,
) -> anyhow::Result<Orchestrator> {
    let gateway = CloudWatchGateway::connect(config.metrics.clone()).await?;
    info!(gateway = %gateway, "Metrics gateway ready");

    let notifier = WebhookNotifier::new(&config.notify)?;

    Ok(
        Orchestrator::new(Arc::new(gateway), Arc::new(notifier), credential)
            .with_max_in_flight(config.metrics.max_in_flight),
    )
}

async fn run(config: Config, token: Option<String>) -> anyhow::Result<()> {
    let token = token
        .or_else(|| std::env::var(LEGACY_TOKEN_ENV).ok())
        .unwrap_or_default();

    let orchestrator = build_orchestrator(&config, Credential::new(token)).await?;
    let summary = orchestrator.run().await?;

    info!(
        services = summary.services,
        total = summary.total,
        "Billing report sent"
    );
    Ok(())
}

async fn run_preview(config: Config, json: bool) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config, Credential::default()).await?;
    let composed = orchestrator.compose().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&composed.snapshot)?);
    } else {
        println!("{}", composed.message.trim_start_matches('\n'));
    }
    Ok(())
}

async fn run_services(config: Config) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config, Credential::default()).await?;

    for service in orchestrator.list_services().await? {
        println!("{service}");
    }
    Ok(())
}
