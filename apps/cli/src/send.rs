use std::path::PathBuf;

use anyhow::Context;

use quickshare_peer::IceConfig;
use quickshare_protocol::RoomCode;
use quickshare_session::{SenderSession, SessionConfig, SessionEvent};
use quickshare_transfer::SourceFile;

use crate::display::{self, format_bytes, format_rate};

pub struct SendArgs {
    pub server: String,
    pub lan: bool,
    pub files: Vec<PathBuf>,
    pub code: Option<String>,
    pub push: bool,
}

pub async fn run(args: SendArgs) -> anyhow::Result<()> {
    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let file = SourceFile::from_path(path)
            .await
            .with_context(|| format!("cannot send {}", path.display()))?;
        files.push(file);
    }
    let code = args.code.as_deref().map(RoomCode::parse).transpose()?;

    let mut config = SessionConfig::with_server(&args.server);
    if args.lan {
        config.ice = IceConfig::host_only();
    }
    let mut session = SenderSession::start(config, files, code)
        .await
        .with_context(|| format!("cannot create a room on {}", args.server))?;

    println!("Room code: {}", session.room());
    for entry in session.files() {
        println!("  [{}] {} ({})", entry.index, entry.name, format_bytes(entry.size));
    }
    println!("Waiting for receivers. Press Ctrl-C to stop.");

    let mut events = session.take_events().context("session events already taken")?;
    let control = session.control();
    let mut task = tokio::spawn(session.run());

    loop {
        tokio::select! {
            result = &mut task => {
                return result?.map_err(Into::into);
            }
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::ReceiverJoined { peer_id, receiver_count } => {
                        println!("Receiver {peer_id} joined ({receiver_count} connected)");
                    }
                    SessionEvent::ReceiverLeft { peer_id, receiver_count } => {
                        println!("Receiver {peer_id} left ({receiver_count} connected)");
                    }
                    SessionEvent::ReceiverReady { peer_id } => {
                        println!("Receiver {peer_id} connected");
                        if args.push {
                            if let Err(e) = control.send_all().await {
                                eprintln!("Could not start sending: {e}");
                            }
                        }
                    }
                    SessionEvent::ReceiverReconnecting { peer_id, attempt } => {
                        println!("Receiver {peer_id} reconnecting (attempt {attempt})");
                    }
                    SessionEvent::ReceiverFailed { peer_id } => {
                        println!("Lost receiver {peer_id}");
                    }
                    SessionEvent::Progress(p) => display::progress(&p),
                    SessionEvent::TransferFinished(report) => {
                        display::progress_done();
                        println!(
                            "Sent {} ({}) to {} receiver(s) at {}",
                            report.file_name,
                            format_bytes(report.bytes_sent),
                            report.completed.len(),
                            format_rate(report.average_throughput)
                        );
                    }
                    SessionEvent::TransferFailed { file, error } => {
                        display::progress_done();
                        eprintln!("Transfer of {} failed: {error}", file.as_deref().unwrap_or("file"));
                    }
                    SessionEvent::ServerError(message) => eprintln!("Server: {message}"),
                    SessionEvent::StateChanged(state) => tracing::debug!(%state, "session state"),
                    _ => {}
                }
            }
        }
    }

    control.shutdown();
    task.await??;
    Ok(())
}
