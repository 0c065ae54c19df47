//! Chat message routing.
//!
//! The router validates and stamps outgoing messages, decides who receives
//! them, and keeps a bounded backlog of recent broadcast messages for late
//! joiners and polling clients.

use crate::message::MessageStamper;
use crate::registry::ConnectionRegistry;
use chatflow_protocol::{ChatMessage, ConnectionId, Content};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Router errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// The sender has not identified or has already left.
    #[error("Unknown sender: {0}")]
    UnknownSender(ConnectionId),

    /// The message carries nothing usable.
    #[error("Malformed message: {0}")]
    Malformed(&'static str),

    /// The message exceeds the configured size limit.
    #[error("Message size {size} exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Number of broadcast messages kept in the backlog.
    pub backlog_capacity: usize,
    /// Maximum message content size in bytes.
    pub max_message_size: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            backlog_capacity: 100,
            max_message_size: 64 * 1024,
        }
    }
}

/// Who receives a routed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Every registered connection, sender included.
    Everyone,
    /// The sender only: a private message to itself, or to a recipient that
    /// is no longer registered.
    SenderOnly,
    /// The sender and one registered recipient.
    SenderAndRecipient(ConnectionId),
}

/// A stamped message and its audience.
#[derive(Debug, Clone)]
pub struct Routed {
    pub message: Arc<ChatMessage>,
    pub delivery: Delivery,
}

/// Validates, stamps and routes chat messages.
#[derive(Debug)]
pub struct MessageRouter {
    stamper: MessageStamper,
    backlog: Mutex<VecDeque<Arc<ChatMessage>>>,
    config: RouterConfig,
}

impl MessageRouter {
    /// Create a new router with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a new router with custom configuration.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        info!("Creating message router with config: {:?}", config);
        Self {
            stamper: MessageStamper::new(),
            backlog: Mutex::new(VecDeque::with_capacity(config.backlog_capacity)),
            config,
        }
    }

    /// Stamp a message from `sender_id` and decide its audience.
    ///
    /// Without a recipient the message is a broadcast and enters the
    /// backlog. With one it is private; a recipient that has left is not
    /// an error, the sender still gets its copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the sender is not registered or the content is
    /// empty or too large.
    pub fn submit(
        &self,
        registry: &ConnectionRegistry,
        sender_id: &ConnectionId,
        content: Content,
        recipient_id: Option<ConnectionId>,
    ) -> Result<Routed, RouterError> {
        let sender = registry
            .lookup(sender_id)
            .ok_or_else(|| RouterError::UnknownSender(sender_id.clone()))?;

        if content.is_empty() {
            return Err(RouterError::Malformed("Message content is empty"));
        }
        if content.len() > self.config.max_message_size {
            return Err(RouterError::TooLarge {
                size: content.len(),
                max: self.config.max_message_size,
            });
        }

        let delivery = match &recipient_id {
            None => Delivery::Everyone,
            Some(recipient) if recipient == sender_id => Delivery::SenderOnly,
            Some(recipient) if registry.is_registered(recipient) => {
                Delivery::SenderAndRecipient(recipient.clone())
            }
            Some(recipient) => {
                debug!(
                    sender = %sender_id,
                    recipient = %recipient,
                    "Private message recipient is gone, delivering to sender only"
                );
                Delivery::SenderOnly
            }
        };

        let message = Arc::new(self.stamper.stamp(&sender, content, recipient_id));

        if delivery == Delivery::Everyone {
            self.append_backlog(Arc::clone(&message));
        }

        trace!(id = message.id, sender = %sender_id, scope = ?message.scope, "Routed message");
        Ok(Routed { message, delivery })
    }

    fn append_backlog(&self, message: Arc<ChatMessage>) {
        let mut backlog = self.lock_backlog();
        backlog.push_back(message);
        while backlog.len() > self.config.backlog_capacity {
            if let Some(evicted) = backlog.pop_front() {
                trace!(id = evicted.id, "Evicted message from backlog");
            }
        }
    }

    fn lock_backlog(&self) -> MutexGuard<'_, VecDeque<Arc<ChatMessage>>> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recent broadcast messages, oldest first.
    #[must_use]
    pub fn backlog(&self) -> Vec<Arc<ChatMessage>> {
        self.lock_backlog().iter().cloned().collect()
    }

    /// Number of messages in the backlog.
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.lock_backlog().len()
    }

    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatflow_protocol::Scope;

    fn id(s: &str) -> ConnectionId {
        ConnectionId::from(s)
    }

    fn text(body: &str) -> Content {
        Content::Text { body: body.into() }
    }

    fn registry_with(users: &[(&str, &str)]) -> ConnectionRegistry {
        let registry = ConnectionRegistry::new();
        for (conn, name) in users {
            registry.register(&id(conn), *name);
        }
        registry
    }

    #[test]
    fn test_broadcast_enters_backlog() {
        let registry = registry_with(&[("conn-a", "alice")]);
        let router = MessageRouter::new();

        let routed = router
            .submit(&registry, &id("conn-a"), text("hi"), None)
            .unwrap();
        assert_eq!(routed.delivery, Delivery::Everyone);
        assert_eq!(routed.message.scope, Scope::Broadcast);
        assert_eq!(routed.message.sender, "alice");

        let backlog = router.backlog();
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].id, routed.message.id);
    }

    #[test]
    fn test_unknown_sender() {
        let registry = ConnectionRegistry::new();
        let router = MessageRouter::new();

        assert_eq!(
            router
                .submit(&registry, &id("conn-x"), text("hi"), None)
                .unwrap_err(),
            RouterError::UnknownSender(id("conn-x"))
        );
        assert_eq!(router.backlog_len(), 0);
    }

    #[test]
    fn test_private_message() {
        let registry = registry_with(&[("conn-a", "alice"), ("conn-b", "bob")]);
        let router = MessageRouter::new();

        let routed = router
            .submit(&registry, &id("conn-a"), text("psst"), Some(id("conn-b")))
            .unwrap();
        assert_eq!(routed.delivery, Delivery::SenderAndRecipient(id("conn-b")));
        assert_eq!(routed.message.recipient_id, Some(id("conn-b")));
        assert_eq!(router.backlog_len(), 0);
    }

    #[test]
    fn test_private_to_departed_recipient() {
        let registry = registry_with(&[("conn-a", "alice"), ("conn-b", "bob")]);
        registry.unregister(&id("conn-b"));
        let router = MessageRouter::new();

        let routed = router
            .submit(&registry, &id("conn-a"), text("psst"), Some(id("conn-b")))
            .unwrap();
        assert_eq!(routed.delivery, Delivery::SenderOnly);
        assert!(routed.message.is_private());
        assert_eq!(router.backlog_len(), 0);
    }

    #[test]
    fn test_private_to_self() {
        let registry = registry_with(&[("conn-a", "alice")]);
        let router = MessageRouter::new();

        let routed = router
            .submit(&registry, &id("conn-a"), text("note"), Some(id("conn-a")))
            .unwrap();
        assert_eq!(routed.delivery, Delivery::SenderOnly);
    }

    #[test]
    fn test_rejects_empty_and_oversized() {
        let registry = registry_with(&[("conn-a", "alice")]);
        let router = MessageRouter::with_config(RouterConfig {
            backlog_capacity: 10,
            max_message_size: 4,
        });

        assert!(matches!(
            router.submit(&registry, &id("conn-a"), text("  "), None),
            Err(RouterError::Malformed(_))
        ));
        assert_eq!(
            router
                .submit(&registry, &id("conn-a"), text("hello"), None)
                .unwrap_err(),
            RouterError::TooLarge { size: 5, max: 4 }
        );
        assert!(router
            .submit(&registry, &id("conn-a"), text("hey"), None)
            .is_ok());
    }

    #[test]
    fn test_attachment_recorded_as_is() {
        let registry = registry_with(&[("conn-a", "alice")]);
        let router = MessageRouter::new();
        let content = Content::Attachment {
            filename: "cat.png".into(),
            url: "http://files/cat.png".into(),
        };

        let routed = router
            .submit(&registry, &id("conn-a"), content.clone(), None)
            .unwrap();
        assert_eq!(routed.message.content, content);
    }

    #[test]
    fn test_backlog_is_bounded_fifo() {
        let registry = registry_with(&[("conn-a", "alice")]);
        let capacity = 5;
        let router = MessageRouter::with_config(RouterConfig {
            backlog_capacity: capacity,
            ..RouterConfig::default()
        });

        let ids: Vec<_> = (0..=capacity)
            .map(|i| {
                router
                    .submit(&registry, &id("conn-a"), text(&format!("m{i}")), None)
                    .unwrap()
                    .message
                    .id
            })
            .collect();

        let backlog: Vec<_> = router.backlog().iter().map(|m| m.id).collect();
        assert_eq!(backlog.len(), capacity);
        assert!(!backlog.contains(&ids[0]));
        assert_eq!(backlog, ids[1..].to_vec());
    }
}
