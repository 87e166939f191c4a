//! QuickShare signaling server entry point.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use quickshare_signaling::SignalingServer;

#[derive(Parser, Debug)]
#[command(name = "quickshare-signal")]
#[command(about = "Room registry and signaling relay for QuickShare")]
struct Cli {
    /// TOML configuration file (defaults to the platform config directory).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Port to listen on. Overrides the config file and `PORT`.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting QuickShare signaling server"
    );

    let mut config = config::Config::load(cli.config.as_deref())?;
    config.apply_port_override(std::env::var("PORT").ok().as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    let server_config = config.to_server_config()?;
    tracing::info!(addr = %server_config.bind_addr, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let server = SignalingServer::bind(server_config).await?;
        run(server).await
    })?;

    tracing::info!("signaling server shut down cleanly");
    Ok(())
}

async fn run(server: Arc<SignalingServer>) -> anyhow::Result<()> {
    let server_run = Arc::clone(&server);
    let mut handle = tokio::spawn(async move { server_run.run().await });

    tokio::select! {
        result = &mut handle => {
            result??;
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl-C, shutting down");
        }
    }

    server.shutdown();
    handle.await??;
    Ok(())
}
