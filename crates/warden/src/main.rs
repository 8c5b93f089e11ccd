//! Warden daemon entry point.
//!
//! Wires the SQLite repository, host adapters and the enforcement service
//! together and runs until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use warden_infrastructure::config::ConfigLoader;
use warden_infrastructure::{
    NixProcessTerminator, SqlitePolicyRepository, SysinfoProcessSampler, SystemClock,
    TracingNotifier, init_logging,
};
use warden_server::EnforcementService;

#[derive(Parser)]
#[command(name = "warden", version, about = "Host-resident parental-control enforcement daemon")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the enforcement daemon
    Serve,
    /// Load and validate the configuration, then print the effective
    /// values
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_path(path);
    }

    match cli.command {
        Command::Serve => serve(loader).await,
        Command::CheckConfig => check_config(loader),
    }
}

async fn serve(loader: ConfigLoader) -> anyhow::Result<()> {
    let config = loader.load().context("configuration failed to load")?;
    init_logging(&config.logging);

    let repo = Arc::new(
        SqlitePolicyRepository::new(&config.database)
            .await
            .context("database failed to open")?,
    );
    let service = EnforcementService::new(
        config,
        repo,
        Arc::new(SysinfoProcessSampler::new()),
        Arc::new(NixProcessTerminator::new()),
        Arc::new(TracingNotifier::new()),
        Arc::new(SystemClock::new()),
    );

    service
        .start()
        .await
        .context("enforcement service failed to start")?;

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    if let Err(e) = service.stop().await {
        error!(error = %e, "shutdown did not drain cleanly");
    }
    Ok(())
}

fn check_config(loader: ConfigLoader) -> anyhow::Result<()> {
    let config = loader.load().context("configuration invalid")?;
    let rendered = serde_yaml::to_string(&config).context("configuration failed to render")?;
    // The one place the daemon intentionally writes to stdout.
    #[allow(clippy::print_stdout)]
    {
        println!("{rendered}");
    }
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
