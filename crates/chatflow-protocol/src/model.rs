//! Records carried inside events.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a chat message, unique within one hub.
pub type MessageId = u64;

/// Disambiguates connection ids generated within the same nanosecond.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Opaque identifier of one live transport connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One entry of the online-users view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub connection_id: ConnectionId,
    pub display_name: String,
}

impl UserInfo {
    #[must_use]
    pub fn new(connection_id: ConnectionId, display_name: impl Into<String>) -> Self {
        Self {
            connection_id,
            display_name: display_name.into(),
        }
    }
}

/// A file already stored by the upload service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub url: String,
}

/// What a chat message carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    /// Plain text.
    Text { body: String },
    /// A reference to an uploaded file.
    Attachment { filename: String, url: String },
}

impl Content {
    /// Size of the content as it counts against the message size limit.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Content::Text { body } => body.len(),
            Content::Attachment { filename, url } => filename.len() + url.len(),
        }
    }

    /// Whether the content carries nothing usable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Content::Text { body } => body.trim().is_empty(),
            Content::Attachment { filename, url } => filename.is_empty() || url.is_empty(),
        }
    }
}

impl From<Attachment> for Content {
    fn from(a: Attachment) -> Self {
        Content::Attachment {
            filename: a.filename,
            url: a.url,
        }
    }
}

/// Audience of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Every registered connection.
    Broadcast,
    /// The sender and exactly one recipient.
    Private,
}

/// A stamped chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: ConnectionId,
    /// Display name of the sender at submission time.
    pub sender: String,
    pub content: Content,
    /// Milliseconds since the Unix epoch, stamped by the hub.
    pub created_at: u64,
    pub scope: Scope,
    /// Present iff `scope` is [`Scope::Private`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<ConnectionId>,
}

impl ChatMessage {
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.scope == Scope::Private
    }
}

/// Delivery status of a message.
///
/// Ordered so that a later stage compares greater than an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

impl DeliveryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }
}
