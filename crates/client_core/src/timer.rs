use std::time::Duration;

use tokio::{sync::mpsc, task::JoinHandle};

use crate::session::SessionInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    TypingCooldown,
    TypingSafety,
    RecordingCap,
}

/// Delivered to the event loop when an armed timer elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    token: u64,
}

/// One owned timer handle per concern. Re-arming or cancelling supersedes the
/// previous deadline; an expiry that was already queued when the slot moved on
/// carries a stale token and is rejected by [`TimerSlot::accept`].
pub struct TimerSlot {
    kind: TimerKind,
    token: u64,
    pending: Option<JoinHandle<()>>,
    inputs: mpsc::UnboundedSender<SessionInput>,
}

impl TimerSlot {
    pub fn new(kind: TimerKind, inputs: mpsc::UnboundedSender<SessionInput>) -> Self {
        Self {
            kind,
            token: 0,
            pending: None,
            inputs,
        }
    }

    pub fn arm(&mut self, after: Duration) {
        self.cancel();
        self.token = self.token.wrapping_add(1);
        let fired = TimerFired {
            kind: self.kind,
            token: self.token,
        };
        let inputs = self.inputs.clone();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = inputs.send(SessionInput::Timer(fired));
        }));
    }

    /// Returns whether a deadline was pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) => {
                handle.abort();
                self.token = self.token.wrapping_add(1);
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Consumes an expiry addressed to the current deadline.
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        if self.pending.is_some() && fired.kind == self.kind && fired.token == self.token {
            self.pending = None;
            true
        } else {
            false
        }
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}
