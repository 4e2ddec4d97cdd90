use std::sync::Arc;

use chrono::Utc;
use shared::{
    domain::{AttachmentRef, DeliveryState, Message, MessageKind, PeerRecord, Route, UserId},
    protocol::{HistoryRecord, ServerFrame},
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    api::ChatApi,
    attachment::{AttachmentPipeline, FileUpload},
    config::ClientSettings,
    connection::{ConnectionChange, ConnectionManager, ConnectionState},
    conversation::{ConversationStore, HistoryTicket},
    dispatcher::MessageDispatcher,
    error::{
        ApiError, CaptureError, ConnectivityError, EmptyCaptureError, RecordingError,
        SessionClosed, UploadError,
    },
    recorder::{AudioInput, VoiceRecorder},
    timer::{TimerFired, TimerKind},
    transport::{Connector, TransportEvent},
    typing::{PresenceState, TypingObserver, TypingSignaler},
};

const EVENT_CAPACITY: usize = 256;

/// Requests from the presentation layer.
pub enum SessionCommand {
    Connect,
    SelectPeer(UserId),
    InputChanged(String),
    SendText(String),
    SendFile(FileUpload),
    StartRecording,
    StopRecording,
    CancelRecording,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

/// An upload in flight, with the route it was started for.
#[derive(Debug, Clone)]
pub struct PendingAttachment {
    pub route: Route,
    pub file_name: String,
    /// Forced kind; derived from the uploaded file type when `None`.
    pub kind: Option<MessageKind>,
}

/// Everything the event loop reacts to, handled one at a time.
pub enum SessionInput {
    Command(SessionCommand),
    Transport(TransportEvent),
    Timer(TimerFired),
    HistoryLoaded {
        ticket: HistoryTicket,
        result: Result<Vec<HistoryRecord>, ApiError>,
    },
    PeersLoaded(Result<Vec<PeerRecord>, ApiError>),
    UploadFinished {
        pending: PendingAttachment,
        result: Result<AttachmentRef, UploadError>,
    },
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    ConnectionChanged {
        state: ConnectionState,
        episode: u64,
    },
    ConnectError(ConnectivityError),
    PeersLoaded(Vec<PeerRecord>),
    TimelineChanged {
        peer_id: UserId,
        len: usize,
    },
    TypingChanged(PresenceState),
    MessageForInactivePeer {
        peer_id: UserId,
    },
    HistoryFailed {
        peer_id: UserId,
        error: ApiError,
    },
    UploadFailed {
        file_name: String,
        error: UploadError,
    },
    CaptureFailed(CaptureError),
    EmptyRecording(EmptyCaptureError),
    RecordingChanged {
        recording: bool,
    },
    Error(String),
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub self_id: UserId,
    pub connection: ConnectionState,
    pub episode: u64,
    pub active_peer: Option<UserId>,
    pub messages: Vec<Message>,
    pub presence: Option<PresenceState>,
    pub recording: bool,
    pub peers: Vec<PeerRecord>,
}

/// Owns all client state. Inputs are applied strictly in arrival order, so
/// nothing in here is shared or locked.
pub struct ChatSession {
    self_id: UserId,
    connection: ConnectionManager,
    conversation: ConversationStore,
    signaler: TypingSignaler,
    observer: TypingObserver,
    recorder: VoiceRecorder,
    attachments: AttachmentPipeline,
    api: Arc<dyn ChatApi>,
    peers: Vec<PeerRecord>,
    peers_requested: bool,
    inputs: mpsc::UnboundedSender<SessionInput>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatSession {
    pub fn new(
        self_id: UserId,
        settings: &ClientSettings,
        connector: Arc<dyn Connector>,
        api: Arc<dyn ChatApi>,
        audio: Arc<dyn AudioInput>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionInput>) {
        let (inputs, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let session = Self {
            connection: ConnectionManager::new(self_id.clone(), connector, inputs.clone()),
            conversation: ConversationStore::new(self_id.clone(), settings.timeline_ordering),
            signaler: TypingSignaler::new(settings.typing_debounce, inputs.clone()),
            observer: TypingObserver::new(
                self_id.clone(),
                settings.typing_safety_timeout,
                inputs.clone(),
            ),
            recorder: VoiceRecorder::new(
                audio,
                settings.min_audio_bytes,
                settings.recording_max_duration,
                inputs.clone(),
            ),
            attachments: AttachmentPipeline::new(api.clone()),
            api,
            peers: Vec::new(),
            peers_requested: false,
            self_id,
            inputs,
            events,
        };
        (session, rx)
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            inputs: self.inputs.clone(),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<ChatEvent> {
        self.events.clone()
    }

    pub fn peer(&self, id: &UserId) -> Option<&PeerRecord> {
        self.peers.iter().find(|peer| &peer.id == id)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            self_id: self.self_id.clone(),
            connection: self.connection.state(),
            episode: self.connection.episode(),
            active_peer: self.conversation.active_peer().cloned(),
            messages: self.conversation.current_messages(),
            presence: self.observer.presence(),
            recording: self.recorder.is_recording(),
            peers: self.peers.clone(),
        }
    }

    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionInput>) {
        info!(user_id = %self.self_id, "session: event loop started");
        while let Some(input) = rx.recv().await {
            if !self.handle_input(input) {
                break;
            }
        }
        self.recorder.cancel();
        if let Some(frame) = self.signaler.reset() {
            self.connection.emit(frame);
        }
        info!(user_id = %self.self_id, "session: event loop stopped");
    }

    /// Applies one input. Returns `false` once the session should stop.
    pub fn handle_input(&mut self, input: SessionInput) -> bool {
        match input {
            SessionInput::Command(command) => return self.handle_command(command),
            SessionInput::Transport(event) => self.handle_transport(event),
            SessionInput::Timer(fired) => self.handle_timer(fired),
            SessionInput::HistoryLoaded { ticket, result } => self.history_loaded(ticket, result),
            SessionInput::PeersLoaded(result) => self.peers_loaded(result),
            SessionInput::UploadFinished { pending, result } => {
                self.finish_attachment(pending, result)
            }
        }
        true
    }

    fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Connect => self.connect(),
            SessionCommand::SelectPeer(peer_id) => self.select_peer(peer_id),
            SessionCommand::InputChanged(content) => self.input_changed(&content),
            SessionCommand::SendText(body) => self.send_text(&body),
            SessionCommand::SendFile(file) => self.begin_attachment(file, None),
            SessionCommand::StartRecording => self.start_recording(),
            SessionCommand::StopRecording => {
                let result = self.recorder.stop();
                self.recording_stopped(result);
            }
            SessionCommand::CancelRecording => {
                if self.recorder.cancel() {
                    self.emit(ChatEvent::RecordingChanged { recording: false });
                }
            }
            SessionCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Shutdown => {
                info!("session: shutdown requested");
                return false;
            }
        }
        true
    }

    fn connect(&mut self) {
        self.connection.connect();
        if self.peers_requested {
            return;
        }
        self.peers_requested = true;
        let api = self.api.clone();
        let inputs = self.inputs.clone();
        let self_id = self.self_id.clone();
        tokio::spawn(async move {
            let result = api.fetch_peers(&self_id).await;
            let _ = inputs.send(SessionInput::PeersLoaded(result));
        });
    }

    /// Synchronously resets timeline and presence, then backfills history.
    fn select_peer(&mut self, peer_id: UserId) {
        if let Some(frame) = self.signaler.reset() {
            self.connection.emit(frame);
        }
        if self.recorder.cancel() {
            info!("session: recording discarded on peer switch");
            self.emit(ChatEvent::RecordingChanged { recording: false });
        }

        let ticket = self.conversation.select_peer(peer_id.clone());
        self.observer.set_peer(Some(peer_id.clone()));
        self.emit(ChatEvent::TimelineChanged {
            peer_id: peer_id.clone(),
            len: 0,
        });
        self.emit(ChatEvent::TypingChanged(PresenceState {
            peer_id: peer_id.clone(),
            is_typing: false,
        }));

        let api = self.api.clone();
        let inputs = self.inputs.clone();
        let self_id = self.self_id.clone();
        tokio::spawn(async move {
            let result = api.fetch_history(&self_id, &peer_id).await;
            let _ = inputs.send(SessionInput::HistoryLoaded { ticket, result });
        });
    }

    fn input_changed(&mut self, content: &str) {
        let Some(route) = self.active_route() else {
            return;
        };
        for frame in self.signaler.on_input(content, &route) {
            self.connection.emit(frame);
        }
    }

    fn send_text(&mut self, body: &str) {
        let echo = MessageDispatcher::new(
            &self.connection,
            &mut self.conversation,
            &mut self.signaler,
        )
        .send_text(body);
        if echo.is_some() {
            self.timeline_changed();
        }
    }

    /// First half of the upload-then-send unit. The route is captured here.
    fn begin_attachment(&mut self, file: FileUpload, kind: Option<MessageKind>) {
        let Some(route) = self.active_route() else {
            debug!(file_name = %file.file_name, "session: no peer selected, attachment not sent");
            return;
        };
        if !self.connection.is_connected() {
            debug!(file_name = %file.file_name, "session: not connected, attachment not sent");
            return;
        }

        info!(file_name = %file.file_name, receiver_id = %route.receiver_id, "session: uploading attachment");
        let pending = PendingAttachment {
            route,
            file_name: file.file_name.clone(),
            kind,
        };
        let pipeline = self.attachments.clone();
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            let result = pipeline.upload(file).await;
            let _ = inputs.send(SessionInput::UploadFinished { pending, result });
        });
    }

    fn finish_attachment(
        &mut self,
        pending: PendingAttachment,
        result: Result<AttachmentRef, UploadError>,
    ) {
        let attachment = match result {
            Ok(attachment) => attachment,
            Err(error) => {
                warn!(file_name = %pending.file_name, "session: attachment aborted: {error}");
                self.emit(ChatEvent::UploadFailed {
                    file_name: pending.file_name,
                    error,
                });
                return;
            }
        };

        let kind = pending
            .kind
            .unwrap_or_else(|| MessageKind::for_file_type(&attachment.file_type));
        let sent = MessageDispatcher::new(
            &self.connection,
            &mut self.conversation,
            &mut self.signaler,
        )
        .send_attachment(&pending.route, attachment, kind);
        match sent {
            Ok(Some(_)) => self.timeline_changed(),
            Ok(None) => {}
            Err(error) => self.emit(ChatEvent::UploadFailed {
                file_name: pending.file_name,
                error,
            }),
        }
    }

    fn start_recording(&mut self) {
        if self.conversation.active_peer().is_none() {
            debug!("session: no peer selected, recording not started");
            return;
        }
        match self.recorder.start() {
            Ok(()) => self.emit(ChatEvent::RecordingChanged { recording: true }),
            Err(err) => {
                warn!("session: capture failed: {err}");
                self.emit(ChatEvent::CaptureFailed(err));
            }
        }
    }

    fn recording_stopped(&mut self, result: Result<FileUpload, RecordingError>) {
        match result {
            Ok(file) => {
                self.emit(ChatEvent::RecordingChanged { recording: false });
                self.begin_attachment(file, Some(MessageKind::Audio));
            }
            Err(RecordingError::Empty(err)) => {
                self.emit(ChatEvent::RecordingChanged { recording: false });
                self.emit(ChatEvent::EmptyRecording(err));
            }
            Err(RecordingError::Capture(err)) => {
                warn!("session: recording failed: {err}");
                self.emit(ChatEvent::RecordingChanged {
                    recording: self.recorder.is_recording(),
                });
                self.emit(ChatEvent::CaptureFailed(err));
            }
        }
    }

    fn handle_transport(&mut self, event: TransportEvent) {
        if let TransportEvent::Frame(frame) = event {
            self.handle_frame(frame);
            return;
        }
        match self.connection.on_transport(&event) {
            Some(ConnectionChange::Connected { episode }) => {
                self.emit(ChatEvent::ConnectionChanged {
                    state: ConnectionState::Connected,
                    episode,
                });
            }
            Some(ConnectionChange::Disconnected(_)) => {
                // Presence owed to the peer cannot be delivered any more.
                self.signaler.reset();
                self.emit(ChatEvent::ConnectionChanged {
                    state: ConnectionState::Disconnected,
                    episode: self.connection.episode(),
                });
            }
            Some(ConnectionChange::ConnectError(err)) => {
                self.emit(ChatEvent::ConnectError(err));
            }
            None => {}
        }
    }

    fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::ReceiveMessage(payload) => {
                let message =
                    payload.into_message(&self.self_id, Utc::now(), DeliveryState::Confirmed);
                let counterpart = message.counterpart(&self.self_id).clone();
                if self.conversation.active_peer() != Some(&counterpart) {
                    debug!(peer_id = %counterpart, "session: message for inactive conversation");
                    self.emit(ChatEvent::MessageForInactivePeer {
                        peer_id: counterpart,
                    });
                    return;
                }

                let sender_id = message.sender_id.clone();
                let outcome = self.conversation.append_remote(message);
                if self.observer.on_message_from(&sender_id) {
                    self.typing_changed();
                }
                if outcome.changed_timeline() {
                    self.timeline_changed();
                }
            }
            ServerFrame::Typing(signal) => {
                if self.observer.on_typing(&signal) {
                    self.typing_changed();
                }
            }
            ServerFrame::StopTyping(signal) => {
                if self.observer.on_stop_typing(&signal) {
                    self.typing_changed();
                }
            }
        }
    }

    fn handle_timer(&mut self, fired: TimerFired) {
        match fired.kind {
            TimerKind::TypingCooldown => {
                if let Some(frame) = self.signaler.on_cooldown_expired(fired) {
                    self.connection.emit(frame);
                }
            }
            TimerKind::TypingSafety => {
                if self.observer.on_safety_expired(fired) {
                    self.typing_changed();
                }
            }
            TimerKind::RecordingCap => {
                if let Some(result) = self.recorder.on_cap_expired(fired) {
                    self.recording_stopped(result);
                }
            }
        }
    }

    fn history_loaded(
        &mut self,
        ticket: HistoryTicket,
        result: Result<Vec<HistoryRecord>, ApiError>,
    ) {
        if !self.conversation.is_current(&ticket) {
            debug!(peer_id = %ticket.peer_id(), "session: stale history response discarded");
            return;
        }
        match result {
            Ok(records) => {
                let arrived_at = Utc::now();
                let history = records
                    .into_iter()
                    .map(|record| {
                        record.into_message(&self.self_id, arrived_at, DeliveryState::Confirmed)
                    })
                    .collect();
                if self.conversation.apply_history(&ticket, history) {
                    self.timeline_changed();
                }
            }
            Err(error) => {
                warn!(peer_id = %ticket.peer_id(), "session: history fetch failed: {error}");
                self.emit(ChatEvent::HistoryFailed {
                    peer_id: ticket.peer_id().clone(),
                    error,
                });
            }
        }
    }

    fn peers_loaded(&mut self, result: Result<Vec<PeerRecord>, ApiError>) {
        match result {
            Ok(peers) => {
                info!(count = peers.len(), "session: peer directory loaded");
                self.peers = peers;
                self.emit(ChatEvent::PeersLoaded(self.peers.clone()));
            }
            Err(err) => {
                warn!("session: peer directory unavailable: {err}");
                self.emit(ChatEvent::Error(format!("peer directory unavailable: {err}")));
            }
        }
    }

    fn active_route(&self) -> Option<Route> {
        self.conversation
            .active_peer()
            .map(|peer| Route::new(self.self_id.clone(), peer.clone()))
    }

    fn timeline_changed(&self) {
        if let Some(peer_id) = self.conversation.active_peer() {
            self.emit(ChatEvent::TimelineChanged {
                peer_id: peer_id.clone(),
                len: self.conversation.len(),
            });
        }
    }

    fn typing_changed(&self) {
        if let Some(presence) = self.observer.presence() {
            self.emit(ChatEvent::TypingChanged(presence));
        }
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }
}

/// Cloneable command surface of a running [`ChatSession`].
#[derive(Clone)]
pub struct SessionHandle {
    inputs: mpsc::UnboundedSender<SessionInput>,
}

impl SessionHandle {
    fn command(&self, command: SessionCommand) -> Result<(), SessionClosed> {
        self.inputs
            .send(SessionInput::Command(command))
            .map_err(|_| SessionClosed)
    }

    pub fn connect(&self) -> Result<(), SessionClosed> {
        self.command(SessionCommand::Connect)
    }

    pub fn select_peer(&self, peer_id: UserId) -> Result<(), SessionClosed> {
        self.command(SessionCommand::SelectPeer(peer_id))
    }

    pub fn input_changed(&self, content: impl Into<String>) -> Result<(), SessionClosed> {
        self.command(SessionCommand::InputChanged(content.into()))
    }

    pub fn send_text(&self, body: impl Into<String>) -> Result<(), SessionClosed> {
        self.command(SessionCommand::SendText(body.into()))
    }

    pub fn send_file(&self, file: FileUpload) -> Result<(), SessionClosed> {
        self.command(SessionCommand::SendFile(file))
    }

    pub fn start_recording(&self) -> Result<(), SessionClosed> {
        self.command(SessionCommand::StartRecording)
    }

    pub fn stop_recording(&self) -> Result<(), SessionClosed> {
        self.command(SessionCommand::StopRecording)
    }

    pub fn cancel_recording(&self) -> Result<(), SessionClosed> {
        self.command(SessionCommand::CancelRecording)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionClosed> {
        let (reply, rx) = oneshot::channel();
        self.command(SessionCommand::Snapshot(reply))?;
        rx.await.map_err(|_| SessionClosed)
    }

    pub fn shutdown(&self) -> Result<(), SessionClosed> {
        self.command(SessionCommand::Shutdown)
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
