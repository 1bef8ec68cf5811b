use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use agent::config::AgentConfig;
use agent::runtime::{boot, serve};

/// On-premise edge agent: manages camera and application containers and
/// bridges them to the cloud control plane.
#[derive(Parser, Debug)]
#[command(name = "agent", version)]
struct Cli {
    /// Path to the yaml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    boot::init_logging();

    let cli = Cli::parse();
    let config = AgentConfig::load(cli.config.as_deref())?;
    info!(
        http = %config.http_bind_address,
        grpc = %config.grpc_bind_address,
        "starting edge agent"
    );

    let cancel = CancellationToken::new();
    let state = boot::boot(config, cancel.clone()).await?;

    serve::serve(state, cancel).await?;

    info!("exit");
    Ok(())
}
