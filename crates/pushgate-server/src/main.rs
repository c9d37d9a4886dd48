//! Pushgate server binary.

use std::{net::SocketAddr, path::PathBuf, process::ExitCode};

use clap::Parser;
use pushgate_server::{ConfigError, ServerConfig, run};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pushgate-server")]
#[command(version, about = "Push notification dispatch service", long_about = None)]
struct Args {
    /// TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listen_addr` from the config
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

fn init_tracing(directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(args: &Args) -> Result<ServerConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            init_tracing("info");
            error!(error = %err, "failed to load config");
            return ExitCode::FAILURE;
        },
    };
    init_tracing(&config.logging.filter);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received");
                signal.cancel();
            },
            Err(err) => warn!(error = %err, "cannot listen for interrupts"),
        }
    });

    info!(listen = %config.listen_addr, "starting pushgate-server");
    match run(config, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "server failed");
            ExitCode::FAILURE
        },
    }
}
