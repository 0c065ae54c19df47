//! Event types exchanged over a hub connection.
//!
//! Every event is an internally tagged object: `{"type": "identify", ...}`.

use serde::{Deserialize, Serialize};

use crate::model::{Attachment, ChatMessage, ConnectionId, DeliveryStatus, MessageId, UserInfo};

/// Numeric codes carried by [`ServerEvent::Error`].
pub mod error_code {
    /// The event could not be decoded or lacks a required field.
    pub const MALFORMED_EVENT: u16 = 4000;
    /// The connection has not sent `identify` yet.
    pub const NOT_IDENTIFIED: u16 = 4001;
    /// The sender is no longer registered.
    pub const UNKNOWN_SENDER: u16 = 4002;
    /// The requested display name is empty or too long.
    pub const INVALID_DISPLAY_NAME: u16 = 4003;
    /// The message body exceeds the configured limit.
    pub const MESSAGE_TOO_LARGE: u16 = 4004;
    /// Anything else.
    pub const INTERNAL: u16 = 5000;
}

/// Events sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Join the chat under a self-declared display name.
    Identify { display_name: String },

    /// Send a chat message. Exactly one of `body` and `attachment` is expected;
    /// `to` makes it private.
    SendMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment: Option<Attachment>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<ConnectionId>,
    },

    /// Start or stop composing.
    Typing { is_typing: bool },

    /// The client has received a message.
    AckDelivered { message_id: MessageId },

    /// The client has displayed a message.
    AckRead { message_id: MessageId },

    /// Keepalive.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ClientEvent {
    /// Create an `identify` event.
    #[must_use]
    pub fn identify(display_name: impl Into<String>) -> Self {
        ClientEvent::Identify {
            display_name: display_name.into(),
        }
    }

    /// Create a broadcast text message.
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        ClientEvent::SendMessage {
            body: Some(body.into()),
            attachment: None,
            to: None,
        }
    }

    /// Create a private text message.
    #[must_use]
    pub fn private_text(to: impl Into<ConnectionId>, body: impl Into<String>) -> Self {
        ClientEvent::SendMessage {
            body: Some(body.into()),
            attachment: None,
            to: Some(to.into()),
        }
    }

    /// Create a broadcast attachment message.
    #[must_use]
    pub fn attachment(filename: impl Into<String>, url: impl Into<String>) -> Self {
        ClientEvent::SendMessage {
            body: None,
            attachment: Some(Attachment {
                filename: filename.into(),
                url: url.into(),
            }),
            to: None,
        }
    }

    /// Create a `typing` event.
    #[must_use]
    pub fn typing(is_typing: bool) -> Self {
        ClientEvent::Typing { is_typing }
    }

    /// Short name used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Identify { .. } => "identify",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::AckDelivered { .. } => "ack_delivered",
            ClientEvent::AckRead { .. } => "ack_read",
            ClientEvent::Ping { .. } => "ping",
        }
    }
}

/// Events pushed by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// First event on every connection.
    Connected {
        connection_id: ConnectionId,
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Full online-users snapshot.
    UserList { users: Vec<UserInfo> },

    /// Someone identified.
    UserJoined {
        connection_id: ConnectionId,
        display_name: String,
    },

    /// Someone disconnected.
    UserLeft {
        connection_id: ConnectionId,
        display_name: String,
    },

    /// A stamped chat message, broadcast or private.
    Message { message: ChatMessage },

    /// Full snapshot of who is composing, without the recipient itself.
    Typing { users: Vec<String> },

    /// Delivery status change of a message this connection sent.
    StatusUpdate {
        message_id: MessageId,
        status: DeliveryStatus,
    },

    /// A single event was rejected. The connection stays open.
    Error { code: u16, message: String },

    /// Keepalive response.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ServerEvent {
    /// Create an `error` event.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
        }
    }

    /// Short name used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected { .. } => "connected",
            ServerEvent::UserList { .. } => "user_list",
            ServerEvent::UserJoined { .. } => "user_joined",
            ServerEvent::UserLeft { .. } => "user_left",
            ServerEvent::Message { .. } => "message",
            ServerEvent::Typing { .. } => "typing",
            ServerEvent::StatusUpdate { .. } => "status_update",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong { .. } => "pong",
        }
    }
}
