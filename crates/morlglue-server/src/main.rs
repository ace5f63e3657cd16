//! MORL-Glue server binary

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use morlglue_common::VERSION;
use morlglue_server::{GlueConfig, GlueServer};

#[derive(Parser)]
#[command(name = "morl-glue", version)]
#[command(about = "MORL-Glue coordination server for Agent, Environment and Experiment processes")]
#[command(after_help = "The listening port is taken from RLGLUE_PORT (default 4096).")]
struct Cli {
    /// Print the bare version string and exit
    #[arg(long = "pv")]
    print_version: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.print_version {
        println!("{}", VERSION);
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("MORL-Glue Version {}", VERSION);

    let config = GlueConfig::load()?;
    info!("Loaded configuration: {:?}", config);

    let server = GlueServer::bind(config)?;
    let outcome = server.run_until(shutdown_signal()).await?;

    info!(?outcome, "Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
