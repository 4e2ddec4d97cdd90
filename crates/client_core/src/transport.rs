use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use futures::{SinkExt, StreamExt};
use shared::{
    error::ProtocolError,
    protocol::{ClientFrame, ServerFrame},
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::session::SessionInput;

/// What the transport reports to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: String },
    ConnectError(String),
    Frame(ServerFrame),
}

/// Opens the persistent connection. Implementations own reconnection: after
/// a failure or drop they keep retrying and report every transition through
/// `inputs`. Dropping the returned sender closes the transport.
pub trait Connector: Send + Sync {
    fn open(&self, inputs: mpsc::UnboundedSender<SessionInput>)
        -> mpsc::UnboundedSender<ClientFrame>;
}

#[derive(Debug, Clone)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(6);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Websocket transport carrying JSON `{"event", "data"}` frames.
#[derive(Debug, Clone)]
pub struct WsConnector {
    ws_url: Url,
    backoff: Backoff,
}

impl WsConnector {
    pub fn new(server_url: &str, backoff: Backoff) -> Result<Self> {
        Ok(Self {
            ws_url: ws_url_for(server_url)?,
            backoff,
        })
    }

    pub fn ws_url(&self) -> &Url {
        &self.ws_url
    }
}

impl Connector for WsConnector {
    fn open(
        &self,
        inputs: mpsc::UnboundedSender<SessionInput>,
    ) -> mpsc::UnboundedSender<ClientFrame> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_ws_transport(
            self.ws_url.clone(),
            self.backoff.clone(),
            inputs,
            outbound_rx,
        ));
        outbound
    }
}

/// Derives the websocket endpoint from the http(s) server url.
pub fn ws_url_for(server_url: &str) -> Result<Url> {
    let mut url = Url::parse(server_url.trim())
        .with_context(|| format!("invalid server url: {server_url}"))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(anyhow!("unsupported server url scheme `{other}`")),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot rewrite scheme of {server_url}"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("server url cannot carry a path: {server_url}"))?
        .pop_if_empty()
        .push("ws");
    Ok(url)
}

enum EpisodeEnd {
    Dropped(String),
    Closed,
}

async fn run_ws_transport(
    ws_url: Url,
    backoff: Backoff,
    inputs: mpsc::UnboundedSender<SessionInput>,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientFrame>,
) {
    let mut attempt: u32 = 0;
    loop {
        match connect_async(ws_url.as_str()).await {
            Ok((stream, _)) => {
                attempt = 0;
                let mut discarded = 0usize;
                while outbound_rx.try_recv().is_ok() {
                    discarded += 1;
                }
                if discarded > 0 {
                    debug!(discarded, "transport: dropped frames queued while offline");
                }
                info!(url = %ws_url, "transport: connected");
                if inputs
                    .send(SessionInput::Transport(TransportEvent::Connected))
                    .is_err()
                {
                    return;
                }

                let (mut writer, mut reader) = stream.split();
                let end = loop {
                    tokio::select! {
                        frame = outbound_rx.recv() => {
                            let Some(frame) = frame else {
                                let _ = writer.close().await;
                                break EpisodeEnd::Closed;
                            };
                            let text = match frame.encode() {
                                Ok(text) => text,
                                Err(err) => {
                                    warn!(event = frame.name(), "transport: failed to encode frame: {err}");
                                    continue;
                                }
                            };
                            if let Err(err) = writer.send(Message::Text(text)).await {
                                break EpisodeEnd::Dropped(err.to_string());
                            }
                        }
                        message = reader.next() => match message {
                            Some(Ok(Message::Text(text))) => match ServerFrame::decode(&text) {
                                Ok(frame) => {
                                    if inputs
                                        .send(SessionInput::Transport(TransportEvent::Frame(frame)))
                                        .is_err()
                                    {
                                        break EpisodeEnd::Closed;
                                    }
                                }
                                Err(ProtocolError::UnknownEvent(event)) => {
                                    debug!(event = %event, "transport: ignoring unhandled server event");
                                }
                                Err(err) => warn!("transport: invalid server frame: {err}"),
                            },
                            Some(Ok(Message::Close(_))) | None => {
                                break EpisodeEnd::Dropped("closed by server".to_string());
                            }
                            Some(Ok(_)) => {}
                            Some(Err(err)) => break EpisodeEnd::Dropped(err.to_string()),
                        },
                    }
                };

                match end {
                    EpisodeEnd::Closed => {
                        info!("transport: closed by client");
                        return;
                    }
                    EpisodeEnd::Dropped(reason) => {
                        warn!(reason = %reason, "transport: connection lost");
                        if inputs
                            .send(SessionInput::Transport(TransportEvent::Disconnected {
                                reason,
                            }))
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(url = %ws_url, attempt, "transport: connect failed: {err}");
                if inputs
                    .send(SessionInput::Transport(TransportEvent::ConnectError(
                        err.to_string(),
                    )))
                    .is_err()
                {
                    return;
                }
            }
        }

        let delay = backoff.delay(attempt);
        attempt = attempt.saturating_add(1);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "transport: retrying");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = inputs.closed() => return,
        }
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
