//! Sender session: owns a room and serves a fixed set of files to every
//! receiver that joins it.
//!
//! Each receiver asks for an offer and gets its own peer link through the
//! [`PeerManager`]. Transfers run on a separate worker task so the event
//! loop keeps answering signaling while bytes are flowing; the worker takes
//! jobs one at a time, which keeps `file-metadata`, chunks and `file-end`
//! of different files from interleaving on a channel.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use quickshare_peer::{
    ChannelMessage, LinkEvent, PeerManager, PeerState, ReconnectAction, RtcChannel,
    SignalingClient, SignalingSender,
};
use quickshare_protocol::constants::ERR_ROOM_TAKEN;
use quickshare_protocol::{
    ClientEvent, ControlMessage, FileEntry, PeerId, Role, RoomCode, ServerEvent,
};
use quickshare_transfer::{DataChannelSink, SourceFile, TransferEngine, file_entries};

use crate::config::SessionConfig;
use crate::state::{SessionEvent, SessionState};
use crate::{SessionError, next_reply, publish};

const EVENT_BUFFER: usize = 256;
const LINK_EVENT_BUFFER: usize = 256;
const COMMAND_BUFFER: usize = 16;
const JOB_QUEUE: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Command {
    SendAll { reply: Reply<usize> },
    SendFile { index: usize, reply: Reply<usize> },
}

/// Files to broadcast, in order, to the channels open when queued.
struct TransferJob {
    indices: Vec<usize>,
    channels: Vec<Arc<dyn DataChannelSink>>,
}

/// Cloneable handle to a running [`SenderSession`].
#[derive(Clone)]
pub struct SenderControl {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl SenderControl {
    /// Queues every file for the receivers connected right now. Returns
    /// how many receivers will get them.
    pub async fn send_all(&self) -> Result<usize, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::SendAll { reply }, rx).await
    }

    /// Queues one file for the receivers connected right now.
    pub async fn send_file(&self, index: usize) -> Result<usize, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::SendFile { index, reply }, rx).await
    }

    /// Stops the session. [`SenderSession::run`] returns `Ok(())`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn request<T>(
        &self,
        command: Command,
        rx: oneshot::Receiver<Result<T, SessionError>>,
    ) -> Result<T, SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }
}

enum Next {
    Stop,
    Server(Option<ServerEvent>),
    Link(LinkEvent),
    RestartIce(PeerId),
    Command(Command),
    ConnectionTimeout,
}

/// The sending side of a room.
pub struct SenderSession {
    config: SessionConfig,
    room: RoomCode,
    client: SignalingClient,
    signaling: SignalingSender,
    server_events: mpsc::Receiver<ServerEvent>,
    manager: PeerManager,
    link_events: mpsc::Receiver<LinkEvent>,
    files: Arc<[SourceFile]>,
    entries: Vec<FileEntry>,
    lists: TransferEngine,
    restarts_tx: mpsc::Sender<PeerId>,
    restarts_rx: mpsc::Receiver<PeerId>,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
    events: mpsc::Sender<SessionEvent>,
    events_rx: Option<mpsc::Receiver<SessionEvent>>,
    state: SessionState,
    cancel: CancellationToken,
}

impl SenderSession {
    /// Connects to the signaling server and creates a room.
    ///
    /// With `code` set, that exact room is created and a collision is an
    /// error. Otherwise fresh codes are generated until one is free.
    pub async fn start(
        config: SessionConfig,
        files: Vec<SourceFile>,
        code: Option<RoomCode>,
    ) -> Result<Self, SessionError> {
        let mut client = SignalingClient::connect(&config.server_url).await?;
        let mut server_events = client.take_events().ok_or(SessionError::SignalingClosed)?;
        let room = create_room(&client, &mut server_events, code, config.room_code_attempts).await?;
        info!(room = %room, files = files.len(), "room created");

        let (events, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (link_tx, link_events) = mpsc::channel(LINK_EVENT_BUFFER);
        let (restarts_tx, restarts_rx) = mpsc::channel(COMMAND_BUFFER);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let manager = PeerManager::new(config.ice.clone(), config.reconnect.clone(), link_tx);
        let entries = file_entries(&files);
        let lists = TransferEngine::new(config.tuning.clone());
        let state = SessionState::InRoom {
            room: room.clone(),
            role: Role::Sender,
        };
        let _ = events.try_send(SessionEvent::StateChanged(state.clone()));

        Ok(Self {
            config,
            room,
            signaling: client.sender(),
            client,
            server_events,
            manager,
            link_events,
            files: files.into(),
            entries,
            lists,
            restarts_tx,
            restarts_rx,
            commands_tx,
            commands_rx,
            events,
            events_rx: Some(events_rx),
            state,
            cancel: CancellationToken::new(),
        })
    }

    pub fn room(&self) -> &RoomCode {
        &self.room
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx.take()
    }

    pub fn control(&self) -> SenderControl {
        SenderControl {
            commands: self.commands_tx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Serves the room until it is shut down or the signaling connection
    /// drops. Every peer link is closed on return.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let (jobs, jobs_rx) = mpsc::channel(JOB_QUEUE);
        let worker = self.spawn_worker(jobs_rx);

        let result = self.event_loop(&jobs).await;

        self.cancel.cancel();
        drop(jobs);
        let _ = worker.await;
        self.manager.close_all().await;
        self.client.close().await;
        info!(room = %self.room, "sender session ended");
        result
    }

    fn spawn_worker(&self, jobs: mpsc::Receiver<TransferJob>) -> JoinHandle<()> {
        let progress = self.events.clone();
        let engine = TransferEngine::new(self.config.tuning.clone())
            .with_wake_lock(Arc::clone(&self.config.wake_lock))
            .with_progress(Box::new(move |p| {
                let _ = progress.try_send(SessionEvent::Progress(p));
            }));
        tokio::spawn(transfer_worker(
            engine,
            Arc::clone(&self.files),
            jobs,
            self.events.clone(),
            self.cancel.clone(),
        ))
    }

    async fn event_loop(&mut self, jobs: &mpsc::Sender<TransferJob>) -> Result<(), SessionError> {
        loop {
            let deadline = self.manager.next_deadline();
            let wake = deadline.unwrap_or_else(Instant::now);
            let next = tokio::select! {
                _ = self.cancel.cancelled() => Next::Stop,
                event = self.server_events.recv() => Next::Server(event),
                Some(event) = self.link_events.recv() => Next::Link(event),
                Some(peer) = self.restarts_rx.recv() => Next::RestartIce(peer),
                Some(command) = self.commands_rx.recv() => Next::Command(command),
                _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                    Next::ConnectionTimeout
                }
            };

            match next {
                Next::Stop => return Ok(()),
                Next::Server(Some(event)) => self.on_server_event(event).await?,
                Next::Server(None) => {
                    self.set_state(SessionState::Disconnected);
                    return Err(SessionError::SignalingClosed);
                }
                Next::Link(event) => self.on_link_event(event, jobs).await?,
                Next::RestartIce(peer) => self.restart_ice(&peer).await?,
                Next::Command(command) => self.on_command(command, jobs),
                Next::ConnectionTimeout => self.on_connection_timeout().await,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Signaling
    // -----------------------------------------------------------------------

    async fn on_server_event(&mut self, event: ServerEvent) -> Result<(), SessionError> {
        match event {
            ServerEvent::PeerJoined {
                peer_id,
                receiver_count,
            } => {
                info!(peer = %peer_id, receivers = receiver_count, "receiver joined");
                self.emit(SessionEvent::ReceiverJoined {
                    peer_id,
                    receiver_count,
                });
            }
            ServerEvent::PeerLeft {
                peer_id,
                receiver_count,
            } => {
                self.manager.remove(&peer_id).await;
                info!(peer = %peer_id, receivers = receiver_count, "receiver left");
                self.emit(SessionEvent::ReceiverLeft {
                    peer_id,
                    receiver_count,
                });
            }
            ServerEvent::OfferRequest { receiver_id } => {
                match self.manager.on_offer_request(&receiver_id).await {
                    Ok(offer) => {
                        self.send_offer(&receiver_id, offer).await?;
                        if !self.state.is_ready() {
                            self.set_state(SessionState::Connecting);
                        }
                    }
                    Err(e) => {
                        warn!(peer = %receiver_id, "could not create offer: {e}");
                        self.emit(SessionEvent::ReceiverFailed {
                            peer_id: receiver_id,
                        });
                    }
                }
            }
            ServerEvent::Answer {
                answer,
                receiver_id,
            } => {
                if let Err(e) = self.manager.on_answer(&receiver_id, answer).await {
                    warn!(peer = %receiver_id, "could not apply answer: {e}");
                }
            }
            ServerEvent::IceCandidate {
                candidate,
                sender_id,
            } => {
                if let Err(e) = self.manager.on_candidate(&sender_id, candidate).await {
                    debug!(peer = %sender_id, "dropping remote candidate: {e}");
                }
            }
            ServerEvent::Error { message } => {
                warn!(room = %self.room, "signaling error: {message}");
                self.emit(SessionEvent::ServerError(message));
            }
            other => debug!(event = ?other, "ignoring signaling event"),
        }
        Ok(())
    }

    async fn send_offer(&self, receiver_id: &str, offer: Value) -> Result<(), SessionError> {
        self.signaling
            .send(&ClientEvent::Offer {
                room_id: self.room.clone(),
                offer,
                target_id: Some(receiver_id.to_string()),
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Peer links
    // -----------------------------------------------------------------------

    async fn on_link_event(
        &mut self,
        event: LinkEvent,
        jobs: &mpsc::Sender<TransferJob>,
    ) -> Result<(), SessionError> {
        match event {
            LinkEvent::LocalCandidate {
                remote_id,
                candidate,
            } => {
                self.signaling
                    .send(&ClientEvent::IceCandidate {
                        room_id: self.room.clone(),
                        candidate,
                        target_id: Some(remote_id),
                    })
                    .await?;
            }
            LinkEvent::StateChanged { remote_id, state } => {
                self.on_peer_state(remote_id, state).await;
            }
            LinkEvent::ChannelOpen { remote_id, channel } => {
                self.on_channel_open(remote_id, channel).await;
            }
            LinkEvent::Message { remote_id, message } => {
                self.on_message(&remote_id, message, jobs);
            }
            LinkEvent::ChannelClosed { remote_id } => {
                debug!(peer = %remote_id, "receiver channel closed");
            }
            LinkEvent::ChannelOpenTimeout { remote_id } => {
                if self.manager.remove(&remote_id).await {
                    warn!(peer = %remote_id, "receiver channel never opened, dropping it");
                    self.emit(SessionEvent::ReceiverFailed { peer_id: remote_id });
                }
            }
        }
        Ok(())
    }

    async fn on_connection_timeout(&mut self) {
        for peer_id in self.manager.expire_overdue(Instant::now()).await {
            self.emit(SessionEvent::ReceiverFailed { peer_id });
        }
    }

    async fn on_peer_state(&mut self, peer_id: PeerId, state: PeerState) {
        match self.manager.on_state(&peer_id, state) {
            ReconnectAction::RestartIce { attempt, delay } => {
                info!(peer = %peer_id, attempt, ?delay, "scheduling ICE restart");
                self.schedule_restart(peer_id.clone(), delay);
                self.emit(SessionEvent::ReceiverReconnecting { peer_id, attempt });
            }
            ReconnectAction::GiveUp => {
                warn!(peer = %peer_id, "receiver link gave up reconnecting");
                self.emit(SessionEvent::ReceiverFailed { peer_id });
            }
            ReconnectAction::Recovered => info!(peer = %peer_id, "receiver link recovered"),
            ReconnectAction::None | ReconnectAction::TimedOut => {}
        }
    }

    fn schedule_restart(&self, peer_id: PeerId, delay: Duration) {
        let tx = self.restarts_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(peer_id).await;
                }
            }
        });
    }

    /// Restarts ICE on a link that is still down. Failed links are left
    /// for the receiver to re-request.
    async fn restart_ice(&mut self, peer_id: &str) -> Result<(), SessionError> {
        let Some(link) = self.manager.get(peer_id) else {
            return Ok(());
        };
        let state = link.state();
        if state.is_connected() || state.is_terminal() {
            debug!(peer = peer_id, %state, "skipping ICE restart");
            return Ok(());
        }
        match link.restart_ice().await {
            Ok(offer) => self.send_offer(peer_id, offer).await,
            Err(e) => {
                warn!(peer = peer_id, "ICE restart failed: {e}");
                Ok(())
            }
        }
    }

    async fn on_channel_open(&mut self, peer_id: PeerId, channel: Arc<RtcChannel>) {
        let channel: Arc<dyn DataChannelSink> = channel;
        match self.lists.send_file_list(&[channel], &self.entries).await {
            Ok(_) => {
                info!(peer = %peer_id, files = self.entries.len(), "file list sent");
                self.set_state(SessionState::Ready { role: Role::Sender });
                self.emit(SessionEvent::ReceiverReady { peer_id });
            }
            Err(e) => warn!(peer = %peer_id, "could not send file list: {e}"),
        }
    }

    fn on_message(&self, peer_id: &str, message: ChannelMessage, jobs: &mpsc::Sender<TransferJob>) {
        let ChannelMessage::Text(text) = message else {
            warn!(peer = peer_id, "unexpected binary frame from receiver");
            return;
        };
        match ControlMessage::parse(&text) {
            Ok(ControlMessage::DownloadRequest { file_index }) => {
                if file_index >= self.files.len() {
                    warn!(peer = peer_id, file_index, "download request out of range");
                    return;
                }
                info!(peer = peer_id, file_index, "download requested");
                if let Err(e) = self.queue(vec![file_index], jobs) {
                    warn!(peer = peer_id, "could not queue download: {e}");
                }
            }
            Ok(other) => debug!(peer = peer_id, kind = other.kind(), "ignoring control message"),
            Err(e) => warn!(peer = peer_id, "bad control message: {e}"),
        }
    }

    // -----------------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------------

    fn on_command(&self, command: Command, jobs: &mpsc::Sender<TransferJob>) {
        match command {
            Command::SendAll { reply } => {
                let indices = (0..self.files.len()).collect();
                let _ = reply.send(self.queue(indices, jobs));
            }
            Command::SendFile { index, reply } => {
                let result = if index < self.files.len() {
                    self.queue(vec![index], jobs)
                } else {
                    Err(SessionError::FileIndexOutOfRange(index))
                };
                let _ = reply.send(result);
            }
        }
    }

    /// Queues a broadcast to every open channel. Returns the channel count.
    fn queue(
        &self,
        indices: Vec<usize>,
        jobs: &mpsc::Sender<TransferJob>,
    ) -> Result<usize, SessionError> {
        let channels = self.manager.open_channels();
        if channels.is_empty() {
            return Err(SessionError::NoReceivers);
        }
        let count = channels.len();
        jobs.try_send(TransferJob { indices, channels })
            .map_err(|_| SessionError::SessionClosed)?;
        Ok(count)
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(state = %state, "sender state");
            self.state = state.clone();
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        publish(&self.events, event);
    }
}

async fn create_room(
    client: &SignalingClient,
    events: &mut mpsc::Receiver<ServerEvent>,
    requested: Option<RoomCode>,
    attempts: u32,
) -> Result<RoomCode, SessionError> {
    let fixed = requested.is_some();
    let mut code = requested.unwrap_or_else(RoomCode::generate);
    let attempts = attempts.max(1);

    for attempt in 1..=attempts {
        client
            .send(&ClientEvent::CreateRoom {
                room_id: code.clone(),
            })
            .await?;
        match next_reply(events).await? {
            ServerEvent::RoomJoined {
                room_id,
                role: Role::Sender,
                ..
            } if room_id == code => return Ok(code),
            ServerEvent::Error { message } if message == ERR_ROOM_TAKEN => {
                if fixed {
                    return Err(SessionError::RoomTaken(code));
                }
                debug!(room = %code, attempt, "room code taken, generating another");
                code = RoomCode::generate();
            }
            ServerEvent::Error { message } => return Err(SessionError::Server(message)),
            _ => return Err(SessionError::UnexpectedReply("expected room-joined as sender")),
        }
    }
    Err(SessionError::RoomCodesExhausted(attempts))
}

async fn transfer_worker(
    engine: TransferEngine,
    files: Arc<[SourceFile]>,
    mut jobs: mpsc::Receiver<TransferJob>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => return,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => return,
            },
        };

        let mut channels = job.channels;
        for index in job.indices {
            let name = files.get(index).map(|f| f.name.clone());
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = engine.send_indexed(&channels, &files, index) => result,
            };
            match result {
                Ok(report) => {
                    channels.retain(|c| !report.failed.iter().any(|f| f == c.label()));
                    publish(&events, SessionEvent::TransferFinished(report));
                }
                Err(e) => {
                    warn!(file = ?name, "transfer failed: {e}");
                    publish(
                        &events,
                        SessionEvent::TransferFailed {
                            file: name,
                            error: e.to_string(),
                        },
                    );
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionConfig;
    use quickshare_peer::IceConfig;
    use quickshare_signaling::{ServerConfig, SignalingServer};

    async fn start_server() -> (Arc<SignalingServer>, String) {
        let server = SignalingServer::bind(ServerConfig {
            bind_addr: ([127, 0, 0, 1], 0).into(),
            ..Default::default()
        })
        .await
        .unwrap();
        let running = server.clone();
        tokio::spawn(async move {
            let _ = running.run().await;
        });
        let url = format!("ws://{}", server.local_addr());
        (server, url)
    }

    fn config(url: &str) -> SessionConfig {
        SessionConfig {
            ice: IceConfig::host_only(),
            ..SessionConfig::with_server(url)
        }
    }

    #[tokio::test]
    async fn start_creates_the_requested_room() {
        let (server, url) = start_server().await;
        let code = RoomCode::parse("SEND01").unwrap();
        let mut session = SenderSession::start(config(&url), Vec::new(), Some(code.clone()))
            .await
            .unwrap();
        assert_eq!(session.room(), &code);
        assert!(session.files().is_empty());

        let mut events = session.take_events().unwrap();
        assert!(session.take_events().is_none());
        match events.recv().await {
            Some(SessionEvent::StateChanged(SessionState::InRoom { room, role })) => {
                assert_eq!(room, code);
                assert_eq!(role, Role::Sender);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        server.shutdown();
    }

    #[tokio::test]
    async fn generated_codes_are_valid() {
        let (server, url) = start_server().await;
        let session = SenderSession::start(config(&url), Vec::new(), None)
            .await
            .unwrap();
        assert!(RoomCode::parse(session.room().as_str()).is_ok());
        server.shutdown();
    }

    #[tokio::test]
    async fn a_taken_code_is_rejected_when_fixed() {
        let (server, url) = start_server().await;
        let code = RoomCode::parse("TAKEN1").unwrap();
        let _owner = SenderSession::start(config(&url), Vec::new(), Some(code.clone()))
            .await
            .unwrap();

        let second = SenderSession::start(config(&url), Vec::new(), Some(code.clone())).await;
        assert!(matches!(second, Err(SessionError::RoomTaken(c)) if c == code));
        server.shutdown();
    }

    #[tokio::test]
    async fn joins_are_reported_and_send_all_needs_a_receiver() {
        let (server, url) = start_server().await;
        let code = RoomCode::parse("SEND02").unwrap();
        let mut session = SenderSession::start(config(&url), Vec::new(), Some(code.clone()))
            .await
            .unwrap();
        let mut events = session.take_events().unwrap();
        let control = session.control();
        let task = tokio::spawn(session.run());

        assert!(matches!(
            control.send_all().await,
            Err(SessionError::NoReceivers)
        ));
        assert!(matches!(
            control.send_file(3).await,
            Err(SessionError::FileIndexOutOfRange(3))
        ));

        let mut receiver = SignalingClient::connect(&url).await.unwrap();
        let _receiver_events = receiver.take_events();
        receiver
            .send(&ClientEvent::JoinRoom { room_id: code })
            .await
            .unwrap();

        let joined = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                if let SessionEvent::ReceiverJoined { receiver_count, .. } = event {
                    return Some(receiver_count);
                }
            }
            None
        })
        .await
        .unwrap();
        assert_eq!(joined, Some(1));

        control.shutdown();
        assert!(task.await.unwrap().is_ok());
        assert!(matches!(
            control.send_all().await,
            Err(SessionError::SessionClosed)
        ));
        server.shutdown();
    }
}
