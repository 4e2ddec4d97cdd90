//! Client-side realtime core of a one-to-one chat: persistent connection,
//! per-peer timeline, typing presence and upload-then-send attachments, all
//! driven by a single event loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::info;

pub mod api;
pub mod attachment;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod dispatcher;
pub mod error;
pub mod identity;
pub mod recorder;
pub mod session;
pub mod timer;
pub mod transport;
pub mod typing;

pub use api::{ChatApi, HttpChatApi};
pub use attachment::{AttachmentPipeline, FileUpload};
pub use config::{load_settings, ClientSettings, TimelineOrdering};
pub use connection::ConnectionState;
pub use identity::{load_identity, StoredUser};
pub use recorder::{AudioInput, CaptureConstraints, CaptureFormat, CaptureStream};
pub use session::{ChatEvent, ChatSession, SessionHandle, SessionSnapshot};
pub use transport::{Backoff, Connector, WsConnector};

/// A session running on the current tokio runtime.
pub struct RunningSession {
    pub user: StoredUser,
    handle: SessionHandle,
    events: broadcast::Sender<ChatEvent>,
    task: JoinHandle<()>,
}

impl RunningSession {
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Stops the event loop and waits for it to wind down.
    pub async fn shutdown(self) -> Result<()> {
        if self.handle.shutdown().is_ok() {
            self.task.await.context("session task failed")?;
        }
        Ok(())
    }
}

/// Loads the stored identity, wires the websocket transport and REST
/// collaborators, starts the event loop and connects.
pub fn start(settings: ClientSettings, audio: Arc<dyn AudioInput>) -> Result<RunningSession> {
    let user = load_identity(&settings.identity_path)?;
    let api = Arc::new(HttpChatApi::new(&settings.server_url)?);
    let connector = Arc::new(WsConnector::new(
        &settings.server_url,
        Backoff {
            initial: settings.reconnect_initial_delay,
            max: settings.reconnect_max_delay,
        },
    )?);

    let (session, rx) = ChatSession::new(user.id.clone(), &settings, connector, api, audio);
    let handle = session.handle();
    let events = session.event_sender();
    let task = tokio::spawn(session.run(rx));
    handle.connect().context("session stopped before connecting")?;
    info!(user_id = %user.id, server_url = %settings.server_url, "client core started");

    Ok(RunningSession {
        user,
        handle,
        events,
        task,
    })
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
