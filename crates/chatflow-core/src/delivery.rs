//! Per-message delivery status.
//!
//! Statuses only move forward (`sent → delivered → read`). The notification
//! target of a change is always the sender recorded with the message.

use chatflow_protocol::{ChatMessage, ConnectionId, DeliveryStatus, MessageId};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, trace};

/// Default number of messages whose status is tracked.
pub const DEFAULT_TRACKED_MESSAGES: usize = 10_000;

#[derive(Debug, Clone)]
struct Tracked {
    sender_id: ConnectionId,
    /// Only this connection may acknowledge a private message.
    recipient_id: Option<ConnectionId>,
    status: DeliveryStatus,
}

/// A status change to report to the message's sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub message_id: MessageId,
    pub sender_id: ConnectionId,
    pub status: DeliveryStatus,
}

/// Tracks the delivery status of recent messages.
#[derive(Debug)]
pub struct DeliveryTracker {
    messages: DashMap<MessageId, Tracked>,
    /// Insertion order, for eviction.
    order: Mutex<VecDeque<MessageId>>,
    capacity: usize,
}

impl DeliveryTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TRACKED_MESSAGES)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Start tracking a freshly routed message as `sent`.
    pub fn track(&self, message: &ChatMessage) {
        self.messages.insert(
            message.id,
            Tracked {
                sender_id: message.sender_id.clone(),
                recipient_id: message.recipient_id.clone(),
                status: DeliveryStatus::Sent,
            },
        );

        let mut order = self.order.lock().unwrap_or_else(PoisonError::into_inner);
        order.push_back(message.id);
        while order.len() > self.capacity {
            if let Some(evicted) = order.pop_front() {
                self.messages.remove(&evicted);
                trace!(id = evicted, "Stopped tracking message");
            }
        }
    }

    /// Record that `acker` received the message.
    pub fn mark_delivered(
        &self,
        message_id: MessageId,
        acker: &ConnectionId,
    ) -> Option<StatusChange> {
        self.advance(message_id, acker, DeliveryStatus::Delivered)
    }

    /// Record that `acker` read the message.
    pub fn mark_read(&self, message_id: MessageId, acker: &ConnectionId) -> Option<StatusChange> {
        self.advance(message_id, acker, DeliveryStatus::Read)
    }

    /// Move the status of `message_id` forward to `status`.
    ///
    /// Returns the change to report, or `None` when the id is unknown, the
    /// acknowledgement is not admissible, or the status would not move
    /// forward.
    fn advance(
        &self,
        message_id: MessageId,
        acker: &ConnectionId,
        status: DeliveryStatus,
    ) -> Option<StatusChange> {
        let Some(mut tracked) = self.messages.get_mut(&message_id) else {
            debug!(id = message_id, "Ack for untracked message ignored");
            return None;
        };

        if &tracked.sender_id == acker {
            trace!(id = message_id, "Ack from sender ignored");
            return None;
        }
        if let Some(recipient) = &tracked.recipient_id {
            if recipient != acker {
                debug!(id = message_id, acker = %acker, "Ack from non-recipient ignored");
                return None;
            }
        }
        if status <= tracked.status {
            return None;
        }

        tracked.status = status;
        Some(StatusChange {
            message_id,
            sender_id: tracked.sender_id.clone(),
            status,
        })
    }

    /// Current status of a tracked message.
    #[must_use]
    pub fn status(&self, message_id: MessageId) -> Option<DeliveryStatus> {
        self.messages.get(&message_id).map(|t| t.status)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&self) {
        self.messages.clear();
        self.order
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for DeliveryTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatflow_protocol::{Content, Scope};

    fn id(s: &str) -> ConnectionId {
        ConnectionId::from(s)
    }

    fn message(message_id: MessageId, recipient: Option<&str>) -> ChatMessage {
        ChatMessage {
            id: message_id,
            sender_id: id("conn-a"),
            sender: "alice".into(),
            content: Content::Text { body: "hi".into() },
            created_at: 0,
            scope: if recipient.is_some() {
                Scope::Private
            } else {
                Scope::Broadcast
            },
            recipient_id: recipient.map(id),
        }
    }

    #[test]
    fn test_forward_transitions_notify_sender() {
        let tracker = DeliveryTracker::new();
        tracker.track(&message(1, None));
        assert_eq!(tracker.status(1), Some(DeliveryStatus::Sent));

        let change = tracker.mark_delivered(1, &id("conn-b")).unwrap();
        assert_eq!(change.sender_id, id("conn-a"));
        assert_eq!(change.status, DeliveryStatus::Delivered);

        let change = tracker.mark_read(1, &id("conn-b")).unwrap();
        assert_eq!(change.status, DeliveryStatus::Read);
    }

    #[test]
    fn test_read_before_delivered_does_not_regress() {
        let tracker = DeliveryTracker::new();
        tracker.track(&message(1, None));

        assert!(tracker.mark_read(1, &id("conn-b")).is_some());
        assert!(tracker.mark_delivered(1, &id("conn-b")).is_none());
        assert_eq!(tracker.status(1), Some(DeliveryStatus::Read));

        // Repeats are silent too.
        assert!(tracker.mark_read(1, &id("conn-c")).is_none());
    }

    #[test]
    fn test_unknown_message_ignored() {
        let tracker = DeliveryTracker::new();
        assert!(tracker.mark_delivered(99, &id("conn-b")).is_none());
        assert!(tracker.status(99).is_none());
    }

    #[test]
    fn test_sender_ack_ignored() {
        let tracker = DeliveryTracker::new();
        tracker.track(&message(1, None));

        assert!(tracker.mark_delivered(1, &id("conn-a")).is_none());
        assert_eq!(tracker.status(1), Some(DeliveryStatus::Sent));
    }

    #[test]
    fn test_private_ack_only_from_recipient() {
        let tracker = DeliveryTracker::new();
        tracker.track(&message(1, Some("conn-b")));

        assert!(tracker.mark_delivered(1, &id("conn-c")).is_none());
        assert!(tracker.mark_delivered(1, &id("conn-b")).is_some());
    }

    #[test]
    fn test_eviction() {
        let tracker = DeliveryTracker::with_capacity(2);
        tracker.track(&message(1, None));
        tracker.track(&message(2, None));
        tracker.track(&message(3, None));

        assert_eq!(tracker.len(), 2);
        assert!(tracker.status(1).is_none());
        assert!(tracker.mark_read(1, &id("conn-b")).is_none());
        assert!(tracker.status(3).is_some());
    }
}
