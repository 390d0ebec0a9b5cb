use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jsonbridge::config::Config;
use jsonbridge::datasource::{ClientConfig, HttpUpstreamClient, InstanceSettings, QueryCoordinator};
use jsonbridge::models::{BatchRequest, PluginContext, Query};
use jsonbridge::server::BridgeServer;

#[derive(Parser)]
#[command(
    name = "jsonbridge",
    version,
    about = "Dashboard backend adapter for JSON metrics services",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve query batches over HTTP
    Serve {
        /// TOML config file; environment variables are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the bind address
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run one batch of queries against an upstream and print the results
    Query {
        /// Base URL of the upstream JSON service
        #[arg(short, long)]
        url: String,

        /// JSON file holding an array of queries
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Serve {
            config: Some(path), ..
        } => Config::from_file(path)?,
        _ => Config::from_env()?,
    };

    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    if let Err(e) = jsonbridge::metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {}", e);
    }

    match cli.command {
        Commands::Serve { bind, .. } => {
            tracing::info!(bind = ?bind, "Starting serve command");
            serve(config, bind).await?;
        }
        Commands::Query { url, file } => {
            tracing::info!(url = %url, file = %file.display(), "Starting query command");
            query(config, url, file).await?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("jsonbridge=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("jsonbridge={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn serve(mut config: Config, bind: Option<String>) -> Result<()> {
    if let Some(addr) = bind {
        config.server.bind_address = addr
            .parse()
            .with_context(|| format!("Invalid bind address: {addr}"))?;
    }

    let server = BridgeServer::new(config)?;
    server.start_with_shutdown(shutdown_signal()).await?;
    Ok(())
}

async fn query(config: Config, url: String, file: PathBuf) -> Result<()> {
    let content = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read query file: {}", file.display()))?;
    let queries: Vec<Query> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse query file: {}", file.display()))?;

    let batch = BatchRequest {
        plugin_context: PluginContext { datasource_id: 0 },
        queries,
    };
    batch.validate()?;

    let client = HttpUpstreamClient::new(&ClientConfig::from(&config.upstream))?;
    let settings = Arc::new(InstanceSettings::new(0, "cli", &url)?);
    let coordinator = QueryCoordinator::new(Arc::new(client));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::warn!("Interrupted, cancelling in-flight queries");
        on_interrupt.cancel();
    });

    let results = coordinator.query_data(settings, batch.queries, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
