use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(ClientMessageId);

impl ClientMessageId {
    /// Fresh idempotency key for an outbound message.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    Audio,
}

impl MessageKind {
    /// Kind for an uploaded blob, derived from its MIME type.
    pub fn for_file_type(file_type: &str) -> Self {
        if file_type.starts_with("image/") {
            Self::Image
        } else {
            Self::File
        }
    }

    pub fn carries_attachment(self) -> bool {
        self != Self::Text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Local,
    Confirmed,
}

/// Structured result of a successful blob upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub url: String,
    pub download_url: String,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub is_document: bool,
}

/// Sender/receiver pair addressed by presence signals and sends.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub sender_id: UserId,
    pub receiver_id: UserId,
}

impl Route {
    pub fn new(sender_id: UserId, receiver_id: UserId) -> Self {
        Self {
            sender_id,
            receiver_id,
        }
    }
}

/// One timeline entry. The attachment is present iff `kind` is not `Text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentRef>,
    pub timestamp: DateTime<Utc>,
    pub delivery_state: DeliveryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<ClientMessageId>,
}

impl Message {
    pub fn text(
        route: &Route,
        body: impl Into<String>,
        timestamp: DateTime<Utc>,
        delivery_state: DeliveryState,
    ) -> Self {
        Self {
            sender_id: route.sender_id.clone(),
            receiver_id: route.receiver_id.clone(),
            kind: MessageKind::Text,
            body: body.into(),
            attachment: None,
            timestamp,
            delivery_state,
            client_message_id: None,
        }
    }

    /// Non-text message; `kind` must carry an attachment, otherwise this
    /// degrades to a text message naming the file.
    pub fn with_attachment(
        route: &Route,
        kind: MessageKind,
        attachment: AttachmentRef,
        timestamp: DateTime<Utc>,
        delivery_state: DeliveryState,
    ) -> Self {
        let body = attachment.file_name.clone();
        let attachment = kind.carries_attachment().then_some(attachment);
        Self {
            sender_id: route.sender_id.clone(),
            receiver_id: route.receiver_id.clone(),
            kind,
            body,
            attachment,
            timestamp,
            delivery_state,
            client_message_id: None,
        }
    }

    pub fn with_client_message_id(mut self, id: ClientMessageId) -> Self {
        self.client_message_id = Some(id);
        self
    }

    pub fn is_well_formed(&self) -> bool {
        self.kind.carries_attachment() == self.attachment.is_some()
    }

    /// The participant on the other side of `self_id`.
    pub fn counterpart(&self, self_id: &UserId) -> &UserId {
        if &self.sender_id == self_id {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// Directory entry returned by `GET /users/{selfId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    #[serde(rename = "_id")]
    pub id: UserId,
    #[serde(rename = "firstName", default)]
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}
