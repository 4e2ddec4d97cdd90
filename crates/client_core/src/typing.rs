use std::time::Duration;

use shared::{
    domain::{Route, UserId},
    protocol::{ClientFrame, PresenceSignal},
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    session::SessionInput,
    timer::{TimerFired, TimerKind, TimerSlot},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalerState {
    Idle,
    /// `typing` was emitted for this route and the cool-down timer is armed.
    Signaling(Route),
}

/// Outbound presence: leading-edge `typing`, trailing-edge `stop-typing`
/// once input has been quiet for the debounce window.
pub struct TypingSignaler {
    state: SignalerState,
    debounce: Duration,
    cooldown: TimerSlot,
}

impl TypingSignaler {
    pub fn new(debounce: Duration, inputs: mpsc::UnboundedSender<SessionInput>) -> Self {
        Self {
            state: SignalerState::Idle,
            debounce,
            cooldown: TimerSlot::new(TimerKind::TypingCooldown, inputs),
        }
    }

    pub fn state(&self) -> &SignalerState {
        &self.state
    }

    pub fn is_signaling(&self) -> bool {
        matches!(self.state, SignalerState::Signaling(_))
    }

    /// Frames to emit for one input-change event. Empty content is ignored.
    pub fn on_input(&mut self, content: &str, route: &Route) -> Vec<ClientFrame> {
        if content.is_empty() {
            return Vec::new();
        }
        let mut frames = Vec::new();
        match &self.state {
            SignalerState::Signaling(current) if current == route => {}
            SignalerState::Signaling(current) => {
                frames.push(ClientFrame::StopTyping(current.clone()));
                frames.push(ClientFrame::Typing(route.clone()));
            }
            SignalerState::Idle => {
                debug!(receiver_id = %route.receiver_id, "typing: started");
                frames.push(ClientFrame::Typing(route.clone()));
            }
        }
        self.state = SignalerState::Signaling(route.clone());
        self.cooldown.arm(self.debounce);
        frames
    }

    pub fn on_cooldown_expired(&mut self, fired: TimerFired) -> Option<ClientFrame> {
        if !self.cooldown.accept(fired) {
            return None;
        }
        match std::mem::replace(&mut self.state, SignalerState::Idle) {
            SignalerState::Signaling(route) => {
                debug!(receiver_id = %route.receiver_id, "typing: cooled down");
                Some(ClientFrame::StopTyping(route))
            }
            SignalerState::Idle => None,
        }
    }

    /// A send always silences typing on its route, whatever the timer state.
    /// Signaling toward a different route is left alone.
    pub fn silence_for_send(&mut self, route: &Route) -> ClientFrame {
        let elsewhere =
            matches!(&self.state, SignalerState::Signaling(current) if current != route);
        if !elsewhere {
            self.cooldown.cancel();
            self.state = SignalerState::Idle;
        }
        ClientFrame::StopTyping(route.clone())
    }

    /// Forces `Idle`, returning the `stop-typing` owed to the peer if any.
    pub fn reset(&mut self) -> Option<ClientFrame> {
        self.cooldown.cancel();
        match std::mem::replace(&mut self.state, SignalerState::Idle) {
            SignalerState::Signaling(route) => Some(ClientFrame::StopTyping(route)),
            SignalerState::Idle => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceState {
    pub peer_id: UserId,
    pub is_typing: bool,
}

/// Inbound presence for the active peer, with a safety timeout that clears a
/// `typing` whose `stop-typing` never arrives.
pub struct TypingObserver {
    self_id: UserId,
    peer: Option<UserId>,
    typing: bool,
    safety_timeout: Duration,
    safety: TimerSlot,
}

impl TypingObserver {
    pub fn new(
        self_id: UserId,
        safety_timeout: Duration,
        inputs: mpsc::UnboundedSender<SessionInput>,
    ) -> Self {
        Self {
            self_id,
            peer: None,
            typing: false,
            safety_timeout,
            safety: TimerSlot::new(TimerKind::TypingSafety, inputs),
        }
    }

    /// Unconditionally clears presence. Returns whether it was showing.
    pub fn set_peer(&mut self, peer: Option<UserId>) -> bool {
        self.safety.cancel();
        self.peer = peer;
        std::mem::replace(&mut self.typing, false)
    }

    pub fn is_typing(&self) -> bool {
        self.typing
    }

    pub fn presence(&self) -> Option<PresenceState> {
        self.peer.as_ref().map(|peer_id| PresenceState {
            peer_id: peer_id.clone(),
            is_typing: self.typing,
        })
    }

    /// Returns whether `is_typing` changed.
    pub fn on_typing(&mut self, signal: &PresenceSignal) -> bool {
        if !self.is_from_peer(signal) {
            debug!(sender_id = %signal.sender_id, "typing: ignoring signal from inactive peer");
            return false;
        }
        self.safety.arm(self.safety_timeout);
        !std::mem::replace(&mut self.typing, true)
    }

    pub fn on_stop_typing(&mut self, signal: &PresenceSignal) -> bool {
        if !self.is_from_peer(signal) {
            return false;
        }
        self.clear()
    }

    /// A confirmed message from the peer implies typing ended.
    pub fn on_message_from(&mut self, sender_id: &UserId) -> bool {
        if self.peer.as_ref() != Some(sender_id) {
            return false;
        }
        self.clear()
    }

    pub fn on_safety_expired(&mut self, fired: TimerFired) -> bool {
        if !self.safety.accept(fired) || !self.typing {
            return false;
        }
        debug!(peer_id = ?self.peer, "typing: safety timeout cleared stale indicator");
        self.typing = false;
        true
    }

    fn clear(&mut self) -> bool {
        self.safety.cancel();
        std::mem::replace(&mut self.typing, false)
    }

    fn is_from_peer(&self, signal: &PresenceSignal) -> bool {
        self.peer.as_ref() == Some(&signal.sender_id)
            && signal
                .receiver_id
                .as_ref()
                .map_or(true, |receiver| receiver == &self.self_id)
    }
}

#[cfg(test)]
#[path = "tests/typing_tests.rs"]
mod tests;
