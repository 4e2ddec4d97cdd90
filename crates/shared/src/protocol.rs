use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{
    domain::{
        AttachmentRef, ClientMessageId, DeliveryState, Message, MessageKind, Route, UserId,
    },
    error::ProtocolError,
};

/// Events emitted by the client over the persistent connection.
///
/// Encoded as `{"event": "<name>", "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientFrame {
    Register(UserId),
    SendMessage(SendMessagePayload),
    Typing(Route),
    StopTyping(Route),
}

impl ClientFrame {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::SendMessage(_) => "send-message",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stop-typing",
        }
    }
}

/// Events pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerFrame {
    ReceiveMessage(ReceiveMessagePayload),
    Typing(PresenceSignal),
    StopTyping(PresenceSignal),
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ServerFrame {
    /// Decodes one inbound text frame. Events this client does not consume
    /// are reported as `UnknownEvent` so the caller can skip them quietly.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawFrame = serde_json::from_str(text)?;
        match raw.event.as_str() {
            "receive-message" => Ok(Self::ReceiveMessage(serde_json::from_value(raw.data)?)),
            "typing" => Ok(Self::Typing(serde_json::from_value(raw.data)?)),
            "stop-typing" => Ok(Self::StopTyping(serde_json::from_value(raw.data)?)),
            _ => Err(ProtocolError::UnknownEvent(raw.event)),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound `typing` / `stop-typing`. Some servers only forward the sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSignal {
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
    pub message_type: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_document: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<ClientMessageId>,
}

impl SendMessagePayload {
    pub fn text(route: &Route, body: impl Into<String>, client_message_id: ClientMessageId) -> Self {
        Self {
            sender_id: route.sender_id.clone(),
            receiver_id: route.receiver_id.clone(),
            message: body.into(),
            message_type: MessageKind::Text,
            file_url: None,
            download_url: None,
            file_name: None,
            file_size: None,
            file_type: None,
            is_document: None,
            client_message_id: Some(client_message_id),
        }
    }

    pub fn attachment(
        route: &Route,
        kind: MessageKind,
        attachment: &AttachmentRef,
        client_message_id: ClientMessageId,
    ) -> Self {
        Self {
            sender_id: route.sender_id.clone(),
            receiver_id: route.receiver_id.clone(),
            message: attachment.file_name.clone(),
            message_type: kind,
            file_url: Some(attachment.url.clone()),
            download_url: Some(attachment.download_url.clone()),
            file_name: Some(attachment.file_name.clone()),
            file_size: Some(attachment.file_size),
            file_type: Some(attachment.file_type.clone()),
            is_document: Some(attachment.is_document),
            client_message_id: Some(client_message_id),
        }
    }
}

/// Inbound `receive-message`; also the shape of history records.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveMessagePayload {
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<MessageKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_document: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_stamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Document creation time on stores that stamp records themselves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<ClientMessageId>,
}

/// History records share the inbound message shape.
pub type HistoryRecord = ReceiveMessagePayload;

impl ReceiveMessagePayload {
    /// Send time as reported by the server: `timeStamp`, then `timestamp`,
    /// then `createdAt`.
    pub fn sent_at(&self) -> Option<&str> {
        self.time_stamp
            .as_deref()
            .or(self.timestamp.as_deref())
            .or(self.created_at.as_deref())
    }

    /// Converts the wire payload into a timeline message. A missing receiver
    /// defaults to `self_id`; a missing or unparsable timestamp is replaced
    /// by `arrived_at`.
    pub fn into_message(
        self,
        self_id: &UserId,
        arrived_at: DateTime<Utc>,
        delivery_state: DeliveryState,
    ) -> Message {
        let timestamp = match self.sent_at() {
            Some(raw) => match DateTime::parse_from_rfc3339(raw) {
                Ok(parsed) => parsed.with_timezone(&Utc),
                Err(err) => {
                    warn!(raw, "protocol: unparsable message timestamp, using arrival time: {err}");
                    arrived_at
                }
            },
            None => arrived_at,
        };
        let route = Route::new(
            self.sender_id,
            self.receiver_id.unwrap_or_else(|| self_id.clone()),
        );

        let kind = match (self.message_type, self.file_url.is_some()) {
            (Some(kind), _) => kind,
            (None, true) => MessageKind::for_file_type(self.file_type.as_deref().unwrap_or_default()),
            (None, false) => MessageKind::Text,
        };

        let message = match (kind.carries_attachment(), self.file_url) {
            (true, Some(url)) => {
                let file_type = self.file_type.unwrap_or_default();
                let attachment = AttachmentRef {
                    download_url: self.download_url.unwrap_or_else(|| url.clone()),
                    url,
                    file_name: self.file_name.unwrap_or_else(|| self.message.clone()),
                    file_size: self.file_size.unwrap_or_default(),
                    is_document: self
                        .is_document
                        .unwrap_or_else(|| is_document_type(&file_type)),
                    file_type,
                };
                Message::with_attachment(&route, kind, attachment, timestamp, delivery_state)
            }
            _ => Message::text(&route, self.message, timestamp, delivery_state),
        };

        match self.client_message_id {
            Some(id) => message.with_client_message_id(id),
            None => message,
        }
    }
}

/// Anything that is not image, audio or video media counts as a document.
pub fn is_document_type(file_type: &str) -> bool {
    !(file_type.starts_with("image/")
        || file_type.starts_with("audio/")
        || file_type.starts_with("video/"))
}

/// Body of `POST /api/upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_document: Option<bool>,
}
