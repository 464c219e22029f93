use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parley::api::{AppState, create_router};
use parley::config::AppConfig;
use parley::gateway::GeminiClient;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Parley - streaming chat relay server.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Increase logging verbosity (stackable)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Reduce output to only errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the relay server
    Serve(ServeCommand),
    /// Print the resolved configuration
    Config,
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Override the listen port
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,
    /// Override the listen host
    #[arg(long, value_name = "HOST")]
    host: Option<String>,
}

fn init_logging(opts: &CommonOpts) {
    let default = if opts.quiet {
        "error"
    } else {
        match opts.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.common);

    let mut config = AppConfig::load(cli.common.config.as_deref())?;

    match cli.command {
        Command::Serve(cmd) => {
            if let Some(port) = cmd.port {
                config.server.port = port;
            }
            if let Some(host) = cmd.host {
                config.server.host = host;
            }
            serve(config).await
        }
        Command::Config => {
            println!("listen   {}", config.server.bind_addr()?);
            println!("model    {}", config.provider.model);
            println!("data dir {}", config.storage.data_dir.display());
            println!(
                "api key  {}",
                if config.provider.api_key.is_empty() {
                    "missing"
                } else {
                    "configured"
                }
            );
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    let mut gateway = GeminiClient::new(config.provider.api_key.clone())
        .with_model(config.provider.model.clone())
        .with_idle_timeout(Duration::from_secs(config.provider.idle_timeout_secs));
    if let Some(base_url) = &config.provider.base_url {
        gateway = gateway.with_base_url(base_url.clone());
    }

    let blob_dir = config.storage.blob_dir();
    tokio::fs::create_dir_all(&blob_dir)
        .await
        .with_context(|| format!("creating blob directory {}", blob_dir.display()))?;

    let state = AppState::new(Arc::new(gateway))
        .with_cors_origins(config.server.cors_origins.clone());
    let router = create_router(state, Some(blob_dir));

    let addr = config.server.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        addr = %listener.local_addr()?,
        model = %config.provider.model,
        "relay listening"
    );

    axum::serve(listener, router)
        .await
        .context("serving relay")?;
    Ok(())
}
