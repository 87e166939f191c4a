use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, bail};
use tokio::sync::mpsc;

use quickshare_peer::IceConfig;
use quickshare_protocol::RoomCode;
use quickshare_session::{
    ReceiverControl, ReceiverSession, SessionConfig, SessionEvent, SessionState,
};
use quickshare_transfer::StoragePolicy;

use crate::display::{self, format_bytes};

const MAX_RETRIES: u32 = 2;

pub struct ReceiveArgs {
    pub server: String,
    pub lan: bool,
    pub code: String,
    pub output: PathBuf,
    pub files: Vec<usize>,
}

pub async fn run(args: ReceiveArgs) -> anyhow::Result<()> {
    let code = RoomCode::parse(&args.code)?;
    tokio::fs::create_dir_all(&args.output)
        .await
        .with_context(|| format!("cannot create {}", args.output.display()))?;

    let mut config = SessionConfig {
        storage: StoragePolicy::streaming_to(&args.output),
        ..SessionConfig::with_server(&args.server)
    };
    if args.lan {
        config.ice = IceConfig::host_only();
    }
    let mut session = ReceiverSession::join(config, code).await?;
    println!("Joined room {}. Connecting to sender...", session.room());

    let mut events = session.take_events().context("session events already taken")?;
    let control = session.control();
    let task = tokio::spawn(session.run());

    let outcome = tokio::select! {
        result = receive_files(&mut events, &control, &args) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow::anyhow!("cancelled")),
    };

    control.shutdown();
    let session_result = task.await?;
    outcome?;
    session_result?;
    Ok(())
}

async fn receive_files(
    events: &mut mpsc::Receiver<SessionEvent>,
    control: &ReceiverControl,
    args: &ReceiveArgs,
) -> anyhow::Result<()> {
    let mut pending: Option<BTreeSet<usize>> = None;
    let mut retries = 0;

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::StateChanged(state) => {
                println!("{state}");
                match state {
                    SessionState::Failed | SessionState::TimedOut if retries < MAX_RETRIES => {
                        retries += 1;
                        control.retry().await?;
                    }
                    SessionState::Failed | SessionState::TimedOut => {
                        bail!("could not connect to the sender");
                    }
                    SessionState::SenderLeft => bail!("the sender left before the transfer finished"),
                    _ => {}
                }
            }
            SessionEvent::FileList(files) => {
                println!("Files offered:");
                for entry in &files {
                    println!("  [{}] {} ({})", entry.index, entry.name, format_bytes(entry.size));
                }
                // A reconnect resends the list; only ask for what is missing.
                let wanted: BTreeSet<usize> = match pending.take() {
                    Some(missing) => missing,
                    None if args.files.is_empty() => files.iter().map(|f| f.index).collect(),
                    None => args.files.iter().copied().collect(),
                };
                if let Some(bad) = wanted.iter().find(|i| !files.iter().any(|f| f.index == **i)) {
                    bail!("no file with index {bad}");
                }
                if wanted.is_empty() {
                    println!("Nothing to download.");
                    return Ok(());
                }
                for index in &wanted {
                    control.request_download(*index).await?;
                }
                pending = Some(wanted);
            }
            SessionEvent::Progress(p) => display::progress(&p),
            SessionEvent::FileReceived(file) => {
                display::progress_done();
                let path = file.save_to(&args.output).await?;
                println!(
                    "Saved {} ({}, sha256 {})",
                    path.display(),
                    format_bytes(file.size),
                    file.sha256
                );
                if let Some(wanted) = pending.as_mut() {
                    wanted.remove(&file.file_index);
                    if wanted.is_empty() {
                        return Ok(());
                    }
                }
            }
            SessionEvent::Interrupted(i) => {
                display::progress_done();
                eprintln!(
                    "Transfer of {} interrupted at {} of {}; partial data discarded",
                    i.name,
                    format_bytes(i.received),
                    format_bytes(i.total)
                );
            }
            SessionEvent::TransferFailed { error, .. } => {
                display::progress_done();
                bail!("transfer failed: {error}");
            }
            SessionEvent::ServerError(message) => eprintln!("Server: {message}"),
            _ => {}
        }
    }
    bail!("session ended before every file arrived")
}
