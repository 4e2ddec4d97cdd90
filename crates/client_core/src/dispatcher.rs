use chrono::Utc;
use shared::{
    domain::{AttachmentRef, ClientMessageId, DeliveryState, Message, MessageKind, Route},
    protocol::{ClientFrame, SendMessagePayload},
};
use tracing::{debug, info, warn};

use crate::{
    connection::ConnectionManager,
    conversation::{AppendOutcome, ConversationStore},
    error::UploadError,
    typing::TypingSignaler,
};

/// Single path for every outbound message: silence typing, emit
/// `send-message`, then echo locally.
pub struct MessageDispatcher<'a> {
    connection: &'a ConnectionManager,
    conversation: &'a mut ConversationStore,
    signaler: &'a mut TypingSignaler,
}

impl<'a> MessageDispatcher<'a> {
    pub fn new(
        connection: &'a ConnectionManager,
        conversation: &'a mut ConversationStore,
        signaler: &'a mut TypingSignaler,
    ) -> Self {
        Self {
            connection,
            conversation,
            signaler,
        }
    }

    /// Returns the local echo, or `None` when a precondition is not met.
    pub fn send_text(&mut self, body: &str) -> Option<Message> {
        if body.trim().is_empty() {
            debug!("dispatch: empty text ignored");
            return None;
        }
        let Some(route) = self.active_route() else {
            debug!("dispatch: no peer selected, text not sent");
            return None;
        };
        if !self.connection.is_connected() {
            debug!("dispatch: not connected, text not sent");
            return None;
        }

        let id = ClientMessageId::generate();
        let echo = Message::text(&route, body, Utc::now(), DeliveryState::Local)
            .with_client_message_id(id.clone());
        let payload = SendMessagePayload::text(&route, body, id);
        self.dispatch(&route, payload, Some(echo))
    }

    /// Sends an uploaded attachment to the route captured when its upload
    /// began. The echo is only shown if that route is still on screen.
    pub fn send_attachment(
        &mut self,
        route: &Route,
        attachment: AttachmentRef,
        kind: MessageKind,
    ) -> Result<Option<Message>, UploadError> {
        if !self.connection.is_connected() {
            warn!(file_name = %attachment.file_name, "dispatch: connection lost before attachment send");
            return Err(UploadError::ConnectionLost);
        }
        let kind = if kind.carries_attachment() {
            kind
        } else {
            MessageKind::File
        };

        let id = ClientMessageId::generate();
        let payload = SendMessagePayload::attachment(route, kind, &attachment, id.clone());
        let on_screen = self.conversation.active_peer() == Some(&route.receiver_id);
        let echo = on_screen.then(|| {
            Message::with_attachment(route, kind, attachment, Utc::now(), DeliveryState::Local)
                .with_client_message_id(id)
        });
        if !on_screen {
            info!(receiver_id = %route.receiver_id, "dispatch: attachment delivered to a conversation no longer shown");
        }
        Ok(self.dispatch(route, payload, echo))
    }

    fn dispatch(
        &mut self,
        route: &Route,
        payload: SendMessagePayload,
        echo: Option<Message>,
    ) -> Option<Message> {
        let stop = self.signaler.silence_for_send(route);
        self.connection.emit(stop);

        let kind = payload.message_type;
        if !self.connection.emit(ClientFrame::SendMessage(payload)) {
            warn!(receiver_id = %route.receiver_id, ?kind, "dispatch: send-message could not be queued");
            return None;
        }
        info!(receiver_id = %route.receiver_id, ?kind, "dispatch: message sent");

        let echo = echo?;
        match self.conversation.append_local(echo.clone()) {
            AppendOutcome::Appended => Some(echo),
            outcome => {
                warn!(?outcome, "dispatch: local echo not appended");
                None
            }
        }
    }

    fn active_route(&self) -> Option<Route> {
        self.conversation
            .active_peer()
            .map(|peer| Route::new(self.conversation.self_id().clone(), peer.clone()))
    }
}
