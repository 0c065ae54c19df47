//! Stamping of chat messages.
//!
//! Identifiers and timestamps are assigned when the hub accepts a message,
//! so ordering reflects server arrival rather than client composition.

use chatflow_protocol::{ChatMessage, ConnectionId, Content, MessageId, Scope, UserInfo};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Hands out strictly increasing message ids, starting at 1.
///
/// One stamper belongs to one hub; ids restart with a new hub.
#[derive(Debug)]
pub struct MessageStamper {
    next_id: AtomicU64,
}

impl MessageStamper {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserve the next message id.
    pub fn next_id(&self) -> MessageId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Build a fully stamped message from `sender`.
    ///
    /// `recipient` makes the message private.
    #[must_use]
    pub fn stamp(
        &self,
        sender: &UserInfo,
        content: Content,
        recipient: Option<ConnectionId>,
    ) -> ChatMessage {
        let scope = if recipient.is_some() {
            Scope::Private
        } else {
            Scope::Broadcast
        };

        ChatMessage {
            id: self.next_id(),
            sender_id: sender.connection_id.clone(),
            sender: sender.display_name.clone(),
            content,
            created_at: now_millis(),
            scope,
            recipient_id: recipient,
        }
    }
}

impl Default for MessageStamper {
    fn default() -> Self {
        Self::new()
    }
}
