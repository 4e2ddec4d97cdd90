use std::sync::Arc;

use shared::{domain::UserId, protocol::ClientFrame};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    error::ConnectivityError,
    session::SessionInput,
    transport::{Connector, TransportEvent},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Observable connectivity transition produced by a transport event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionChange {
    Connected { episode: u64 },
    Disconnected(ConnectivityError),
    ConnectError(ConnectivityError),
}

/// Sole owner of the connection state. Registration is replayed on every
/// transition into `Connected`, once per connection episode.
pub struct ConnectionManager {
    self_id: UserId,
    state: ConnectionState,
    episode: u64,
    connector: Arc<dyn Connector>,
    outbound: Option<mpsc::UnboundedSender<ClientFrame>>,
    inputs: mpsc::UnboundedSender<SessionInput>,
}

impl ConnectionManager {
    pub fn new(
        self_id: UserId,
        connector: Arc<dyn Connector>,
        inputs: mpsc::UnboundedSender<SessionInput>,
    ) -> Self {
        Self {
            self_id,
            state: ConnectionState::Disconnected,
            episode: 0,
            connector,
            outbound: None,
            inputs,
        }
    }

    /// Opens the transport once per session. Later calls are no-ops: the
    /// transport beneath reconnects on its own.
    pub fn connect(&mut self) -> bool {
        if self.outbound.is_some() {
            debug!(state = ?self.state, "connection: connect ignored, transport already open");
            return false;
        }
        info!(user_id = %self.self_id, "connection: opening transport");
        self.outbound = Some(self.connector.open(self.inputs.clone()));
        self.state = ConnectionState::Connecting;
        true
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of connection episodes seen so far.
    pub fn episode(&self) -> u64 {
        self.episode
    }

    /// Queues `frame` on the live connection. Returns `false` when there is
    /// no connected episode to carry it.
    pub fn emit(&self, frame: ClientFrame) -> bool {
        if !self.is_connected() {
            debug!(event = frame.name(), "connection: dropping frame while not connected");
            return false;
        }
        let Some(outbound) = &self.outbound else {
            return false;
        };
        let event = frame.name();
        if outbound.send(frame).is_err() {
            warn!(event, "connection: transport is gone, frame dropped");
            return false;
        }
        true
    }

    pub fn on_transport(&mut self, event: &TransportEvent) -> Option<ConnectionChange> {
        match event {
            TransportEvent::Connected => {
                if self.state == ConnectionState::Connected {
                    debug!("connection: duplicate connected signal ignored");
                    return None;
                }
                self.state = ConnectionState::Connected;
                self.episode += 1;
                info!(episode = self.episode, user_id = %self.self_id, "connection: connected, registering");
                self.emit(ClientFrame::Register(self.self_id.clone()));
                Some(ConnectionChange::Connected {
                    episode: self.episode,
                })
            }
            TransportEvent::Disconnected { reason } => {
                let was_connected = self.state == ConnectionState::Connected;
                self.state = ConnectionState::Disconnected;
                warn!(episode = self.episode, reason = %reason, "connection: disconnected");
                was_connected.then(|| {
                    ConnectionChange::Disconnected(ConnectivityError::Dropped(reason.clone()))
                })
            }
            TransportEvent::ConnectError(reason) => {
                self.state = ConnectionState::Disconnected;
                warn!(reason = %reason, "connection: connect error");
                Some(ConnectionChange::ConnectError(
                    ConnectivityError::ConnectFailed(reason.clone()),
                ))
            }
            TransportEvent::Frame(_) => None,
        }
    }
}
