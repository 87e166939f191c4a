//! `quickshare`: send or receive files peer-to-peer from a terminal.

mod display;
mod receive;
mod send;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quickshare_session::DEFAULT_SIGNALING_URL;

#[derive(Parser, Debug)]
#[command(name = "quickshare")]
#[command(about = "Peer-to-peer file transfer over WebRTC")]
struct Cli {
    /// Signaling server WebSocket URL.
    #[arg(long, global = true, env = "QUICKSHARE_SERVER", default_value = DEFAULT_SIGNALING_URL)]
    server: String,

    /// Use host candidates only (no STUN/TURN). Useful on a LAN.
    #[arg(long, global = true)]
    lan: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a room and serve files to whoever joins it.
    Send {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
        /// Use this room code instead of a random one.
        #[arg(long, value_name = "CODE")]
        code: Option<String>,
        /// Push every file to each receiver as soon as it connects.
        #[arg(long)]
        push: bool,
    },
    /// Join a room and download its files.
    Receive {
        #[arg(value_name = "CODE")]
        code: String,
        /// Directory to save files into.
        #[arg(long, short, default_value = ".", value_name = "DIR")]
        output: PathBuf,
        /// Only download these file indices (default: all).
        #[arg(long, value_name = "INDEX", value_delimiter = ',')]
        files: Vec<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Send { files, code, push } => rt.block_on(send::run(send::SendArgs {
            server: cli.server,
            lan: cli.lan,
            files,
            code,
            push,
        })),
        Command::Receive {
            code,
            output,
            files,
        } => rt.block_on(receive::run(receive::ReceiveArgs {
            server: cli.server,
            lan: cli.lan,
            code,
            output,
            files,
        })),
    }
}
