//! Receiver session: joins a room by code, connects to its sender and
//! rebuilds the files the sender streams.
//!
//! The receiver is the polite peer. It never makes offers of its own: it
//! asks the sender for one with `request-offer`, both on first join and
//! after its link failed.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use quickshare_peer::{
    ChannelMessage, LinkEvent, PeerLink, PeerState, ReconnectAction, RetryState, RtcChannel,
    SignalingClient, SignalingSender,
};
use quickshare_protocol::constants::{ERR_ROOM_NOT_FOUND, OFFER_REQUEST_DELAY};
use quickshare_protocol::{ClientEvent, ControlMessage, FileEntry, PeerId, Role, RoomCode, ServerEvent};
use quickshare_transfer::{
    DataChannelSink, ReceiverEvent, ReconstructionEngine, TransferError,
};

use crate::config::SessionConfig;
use crate::state::{SessionEvent, SessionState};
use crate::{SessionError, next_reply, publish};

const EVENT_BUFFER: usize = 256;
const LINK_EVENT_BUFFER: usize = 1024;
const COMMAND_BUFFER: usize = 16;

enum Command {
    RequestDownload {
        index: usize,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Retry,
}

/// Cloneable handle to a running [`ReceiverSession`].
#[derive(Clone)]
pub struct ReceiverControl {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

impl ReceiverControl {
    /// Asks the sender for file `index` of its list.
    pub async fn request_download(&self, index: usize) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::RequestDownload { index, reply })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        rx.await.map_err(|_| SessionError::SessionClosed)?
    }

    /// Drops the current link and asks the sender for a fresh offer.
    pub async fn retry(&self) -> Result<(), SessionError> {
        self.commands
            .send(Command::Retry)
            .await
            .map_err(|_| SessionError::SessionClosed)
    }

    /// Stops the session. [`ReceiverSession::run`] returns `Ok(())`.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

enum Next {
    Stop,
    Server(Option<ServerEvent>),
    Link(LinkEvent),
    RequestOffer,
    Command(Command),
    ConnectionTimeout,
}

/// The receiving side of a room.
pub struct ReceiverSession {
    config: SessionConfig,
    room: RoomCode,
    client: SignalingClient,
    signaling: SignalingSender,
    server_events: mpsc::Receiver<ServerEvent>,
    link: Option<Arc<PeerLink>>,
    channel: Option<Arc<RtcChannel>>,
    sender_id: Option<PeerId>,
    /// Candidates that arrived before the first offer.
    early_candidates: Vec<Value>,
    link_tx: mpsc::Sender<LinkEvent>,
    link_events: mpsc::Receiver<LinkEvent>,
    engine: ReconstructionEngine,
    files: Vec<FileEntry>,
    retry: RetryState,
    deadline: Option<Instant>,
    offer_tx: mpsc::Sender<()>,
    offer_rx: mpsc::Receiver<()>,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
    events: mpsc::Sender<SessionEvent>,
    events_rx: Option<mpsc::Receiver<SessionEvent>>,
    state: SessionState,
    cancel: CancellationToken,
}

impl ReceiverSession {
    /// Connects to the signaling server and joins room `code`.
    pub async fn join(config: SessionConfig, code: RoomCode) -> Result<Self, SessionError> {
        let mut client = SignalingClient::connect(&config.server_url).await?;
        let mut server_events = client.take_events().ok_or(SessionError::SignalingClosed)?;

        client
            .send(&ClientEvent::JoinRoom {
                room_id: code.clone(),
            })
            .await?;
        match next_reply(&mut server_events).await? {
            ServerEvent::RoomJoined {
                room_id,
                role: Role::Receiver,
                peer_count,
            } if room_id == code => {
                info!(room = %code, receivers = peer_count, "joined room");
            }
            ServerEvent::Error { message } if message == ERR_ROOM_NOT_FOUND => {
                return Err(SessionError::RoomNotFound(code));
            }
            ServerEvent::Error { message } => return Err(SessionError::Server(message)),
            _ => return Err(SessionError::UnexpectedReply("expected room-joined as receiver")),
        }

        let (events, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (link_tx, link_events) = mpsc::channel(LINK_EVENT_BUFFER);
        let (offer_tx, offer_rx) = mpsc::channel(COMMAND_BUFFER);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let engine = ReconstructionEngine::new(config.storage.clone())
            .with_wake_lock(Arc::clone(&config.wake_lock));
        let state = SessionState::InRoom {
            room: code.clone(),
            role: Role::Receiver,
        };
        let _ = events.try_send(SessionEvent::StateChanged(state.clone()));

        Ok(Self {
            config,
            room: code,
            signaling: client.sender(),
            client,
            server_events,
            link: None,
            channel: None,
            sender_id: None,
            early_candidates: Vec::new(),
            link_tx,
            link_events,
            engine,
            files: Vec::new(),
            retry: RetryState::default(),
            deadline: None,
            offer_tx,
            offer_rx,
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

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx.take()
    }

    pub fn control(&self) -> ReceiverControl {
        ReceiverControl {
            commands: self.commands_tx.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Runs until shut down, the sender leaves, or the signaling connection
    /// drops. A file still in flight on return is discarded.
    pub async fn run(mut self) -> Result<(), SessionError> {
        // Give the sender a moment to see `peer-joined` first.
        self.schedule_offer_request(OFFER_REQUEST_DELAY);

        let result = self.event_loop().await;

        self.cancel.cancel();
        self.interrupt().await;
        self.drop_link().await;
        self.client.close().await;
        info!(room = %self.room, "receiver session ended");
        result
    }

    async fn event_loop(&mut self) -> Result<(), SessionError> {
        loop {
            let deadline = self.deadline.unwrap_or_else(Instant::now);
            let next = tokio::select! {
                _ = self.cancel.cancelled() => Next::Stop,
                event = self.server_events.recv() => Next::Server(event),
                Some(event) = self.link_events.recv() => Next::Link(event),
                Some(()) = self.offer_rx.recv() => Next::RequestOffer,
                Some(command) = self.commands_rx.recv() => Next::Command(command),
                _ = tokio::time::sleep_until(deadline), if self.deadline.is_some() => {
                    Next::ConnectionTimeout
                }
            };

            match next {
                Next::Stop => return Ok(()),
                Next::Server(None) => {
                    self.set_state(SessionState::Disconnected);
                    return Err(SessionError::SignalingClosed);
                }
                Next::Server(Some(ServerEvent::SenderLeft)) => {
                    info!(room = %self.room, "sender left the room");
                    self.interrupt().await;
                    self.drop_link().await;
                    self.set_state(SessionState::SenderLeft);
                    return Ok(());
                }
                Next::Server(Some(event)) => self.on_server_event(event).await?,
                Next::Link(event) => self.on_link_event(event).await?,
                Next::RequestOffer => self.request_offer().await?,
                Next::Command(command) => self.on_command(command).await,
                Next::ConnectionTimeout => self.on_connection_timeout().await,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Signaling
    // -----------------------------------------------------------------------

    async fn request_offer(&mut self) -> Result<(), SessionError> {
        debug!(room = %self.room, "requesting offer");
        self.signaling
            .send(&ClientEvent::RequestOffer {
                room_id: self.room.clone(),
            })
            .await?;
        self.deadline = Some(Instant::now() + self.config.reconnect.connection_timeout);
        if !matches!(self.state, SessionState::Reconnecting { .. }) {
            self.set_state(SessionState::Connecting);
        }
        Ok(())
    }

    fn schedule_offer_request(&self, delay: Duration) {
        let tx = self.offer_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(()).await;
                }
            }
        });
    }

    async fn on_server_event(&mut self, event: ServerEvent) -> Result<(), SessionError> {
        match event {
            ServerEvent::Offer { offer, sender_id } => self.on_offer(offer, sender_id).await?,
            ServerEvent::IceCandidate {
                candidate,
                sender_id,
            } => {
                let link = self
                    .link
                    .as_ref()
                    .filter(|l| l.remote_id() == sender_id)
                    .cloned();
                match link {
                    Some(link) => {
                        if let Err(e) = link.add_candidate(candidate).await {
                            debug!(peer = %sender_id, "dropping remote candidate: {e}");
                        }
                    }
                    None => self.early_candidates.push(candidate),
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

    async fn on_offer(&mut self, offer: Value, sender_id: PeerId) -> Result<(), SessionError> {
        let reusable = self
            .link
            .as_ref()
            .filter(|l| !l.state().is_terminal() && l.remote_id() == sender_id)
            .cloned();
        let link = match reusable {
            Some(link) => link,
            None => {
                self.drop_link().await;
                let link = Arc::new(
                    PeerLink::new(sender_id.clone(), true, &self.config.ice, self.link_tx.clone())
                        .await?,
                );
                self.link = Some(Arc::clone(&link));
                link
            }
        };
        self.sender_id = Some(sender_id.clone());

        match link.accept_offer(offer).await {
            Ok(Some(answer)) => {
                self.signaling
                    .send(&ClientEvent::Answer {
                        room_id: self.room.clone(),
                        answer,
                        target_id: Some(sender_id.clone()),
                    })
                    .await?;
                debug!(peer = %sender_id, "answer sent");
            }
            Ok(None) => debug!(peer = %sender_id, "offer ignored"),
            Err(e) => warn!(peer = %sender_id, "could not accept offer: {e}"),
        }

        for candidate in std::mem::take(&mut self.early_candidates) {
            if let Err(e) = link.add_candidate(candidate).await {
                debug!(peer = %sender_id, "dropping early candidate: {e}");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Peer link
    // -----------------------------------------------------------------------

    async fn on_link_event(&mut self, event: LinkEvent) -> Result<(), SessionError> {
        match event {
            LinkEvent::LocalCandidate { candidate, .. } => {
                if let Some(sender_id) = &self.sender_id {
                    self.signaling
                        .send(&ClientEvent::IceCandidate {
                            room_id: self.room.clone(),
                            candidate,
                            target_id: Some(sender_id.clone()),
                        })
                        .await?;
                }
            }
            LinkEvent::StateChanged { remote_id, state } => {
                if self.is_current(&remote_id) {
                    self.on_peer_state(state).await;
                }
            }
            LinkEvent::ChannelOpen { remote_id, channel } => {
                if self.is_current(&remote_id) {
                    info!(peer = %remote_id, "data channel open");
                    self.channel = Some(channel);
                    self.deadline = None;
                    self.set_state(SessionState::Ready {
                        role: Role::Receiver,
                    });
                }
            }
            LinkEvent::Message { message, .. } => {
                let result = match message {
                    ChannelMessage::Text(text) => self.engine.handle_text(&text).await,
                    ChannelMessage::Binary(chunk) => self.engine.handle_binary(chunk).await,
                };
                self.on_transfer(result).await;
            }
            LinkEvent::ChannelClosed { remote_id } => {
                if self.is_current(&remote_id) {
                    debug!(peer = %remote_id, "data channel closed");
                    self.channel = None;
                    self.interrupt().await;
                }
            }
            LinkEvent::ChannelOpenTimeout { remote_id } => {
                if self.is_current(&remote_id) {
                    warn!(peer = %remote_id, "data channel never opened");
                    self.drop_link().await;
                    self.deadline = None;
                    self.set_state(SessionState::Failed);
                }
            }
        }
        Ok(())
    }

    async fn on_peer_state(&mut self, state: PeerState) {
        if state.is_connected() {
            self.deadline = None;
        }
        match self.config.reconnect.decide(state, &mut self.retry) {
            ReconnectAction::RestartIce { attempt, delay } => {
                self.set_state(SessionState::Reconnecting { attempt });
                // The sender restarts ICE on a disconnected link by itself.
                // A failed link has to be rebuilt from a fresh offer.
                if state == PeerState::Failed {
                    info!(attempt, "peer link failed, requesting a new offer");
                    self.interrupt().await;
                    self.drop_link().await;
                    self.schedule_offer_request(delay.max(OFFER_REQUEST_DELAY));
                }
            }
            ReconnectAction::GiveUp => {
                warn!(room = %self.room, "giving up on the peer link");
                self.interrupt().await;
                self.drop_link().await;
                self.deadline = None;
                self.set_state(SessionState::Failed);
            }
            ReconnectAction::Recovered => {
                info!(room = %self.room, "peer link recovered");
                if self.channel.as_ref().is_some_and(|c| c.is_open()) {
                    self.set_state(SessionState::Ready {
                        role: Role::Receiver,
                    });
                }
            }
            ReconnectAction::None | ReconnectAction::TimedOut => {}
        }
    }

    async fn on_connection_timeout(&mut self) {
        self.deadline = None;
        let state = self
            .link
            .as_ref()
            .map(|l| l.state())
            .unwrap_or(PeerState::New);
        if self.config.reconnect.on_connection_timeout(state) == ReconnectAction::TimedOut {
            warn!(room = %self.room, %state, "peer connection timed out");
            self.set_state(SessionState::TimedOut);
        }
    }

    fn is_current(&self, remote_id: &str) -> bool {
        self.link.as_ref().is_some_and(|l| l.remote_id() == remote_id)
    }

    async fn drop_link(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        if let Some(link) = self.link.take() {
            link.close().await;
        }
    }

    // -----------------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------------

    async fn on_transfer(&mut self, result: Result<Option<ReceiverEvent>, TransferError>) {
        match result {
            Ok(None) => {}
            Ok(Some(ReceiverEvent::FileList(files))) => {
                info!(files = files.len(), "file list received");
                self.files = files.clone();
                self.emit(SessionEvent::FileList(files));
            }
            Ok(Some(ReceiverEvent::Superseded { interrupted, next })) => {
                warn!(
                    file = %interrupted.name,
                    received = interrupted.received,
                    total = interrupted.total,
                    next = %next.name,
                    "transfer replaced before it finished"
                );
                self.emit(SessionEvent::Interrupted(interrupted));
            }
            Ok(Some(ReceiverEvent::Started(descriptor))) => {
                info!(
                    file = %descriptor.name,
                    size = descriptor.size,
                    index = descriptor.file_index,
                    "receiving file"
                );
            }
            Ok(Some(ReceiverEvent::Progress(progress))) => {
                let _ = self.events.try_send(SessionEvent::Progress(progress));
            }
            Ok(Some(ReceiverEvent::Completed(file))) => {
                info!(file = %file.name, size = file.size, sha256 = %file.sha256, "file received");
                self.emit(SessionEvent::FileReceived(file));
            }
            Err(e) => {
                warn!("transfer failed: {e}");
                self.emit(SessionEvent::TransferFailed {
                    file: None,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Discards a file still in flight and reports it.
    async fn interrupt(&mut self) {
        if let Some(interrupted) = self.engine.abort().await {
            warn!(
                file = %interrupted.name,
                received = interrupted.received,
                total = interrupted.total,
                "transfer interrupted"
            );
            self.emit(SessionEvent::Interrupted(interrupted));
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::RequestDownload { index, reply } => {
                let _ = reply.send(self.request_download(index).await);
            }
            Command::Retry => {
                info!(room = %self.room, "retrying peer connection");
                self.retry = RetryState::default();
                self.interrupt().await;
                self.drop_link().await;
                self.schedule_offer_request(Duration::ZERO);
            }
        }
    }

    async fn request_download(&self, index: usize) -> Result<(), SessionError> {
        if !self.files.is_empty() && index >= self.files.len() {
            return Err(SessionError::FileIndexOutOfRange(index));
        }
        let channel = self
            .channel
            .as_ref()
            .filter(|c| c.is_open())
            .ok_or(SessionError::NotReady)?;
        let text = ControlMessage::DownloadRequest { file_index: index }.to_json()?;
        channel.send_text(text).await?;
        debug!(index, "download requested");
        Ok(())
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!(state = %state, "receiver state");
            self.state = state.clone();
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: SessionEvent) {
        publish(&self.events, event);
    }
}
