//! The hub: connection lifecycle and event dispatch.
//!
//! Each connection moves through `Connected → Identified → Closed`. A peer
//! exists from [`Hub::connect`] until [`Hub::disconnect`]; it is identified
//! while it has an entry in the registry.
//!
//! Every change to the user list, the typing set, the message stream or a
//! delivery status is committed and queued to peers under that stream's
//! gate, so all peers see the snapshots of one stream in the same order.
//! Opening a connection also takes the roster gate, which is how it
//! serializes against [`Hub::shutdown`]. Queueing never waits; the
//! network write happens in each connection's own writer task.

use crate::delivery::{DeliveryTracker, StatusChange, DEFAULT_TRACKED_MESSAGES};
use crate::peer::{Peer, PushOutcome, DEFAULT_OUTBOUND_CAPACITY};
use crate::registry::{validate_display_name, ConnectionRegistry, DEFAULT_MAX_DISPLAY_NAME_LENGTH};
use crate::router::{Delivery, MessageRouter, RouterConfig, RouterError};
use crate::typing::TypingAggregator;
use chatflow_protocol::{
    error_code, Attachment, ChatMessage, ClientEvent, ConnectionId, Content, DeliveryStatus,
    MessageId, ServerEvent, UserInfo,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Hub errors.
///
/// None of these is fatal: the offending event is rejected and the
/// connection stays open.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The hub has been shut down.
    #[error("Hub is stopped")]
    Stopped,

    /// Too many live connections.
    #[error("Connection limit of {0} reached")]
    ConnectionLimit(usize),

    /// The transport reused a live connection ID.
    #[error("Connection already exists: {0}")]
    DuplicateConnection(ConnectionId),

    /// The connection is closed or was never opened.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The event needs an identified connection.
    #[error("Connection has not identified")]
    NotIdentified,

    /// The requested display name is unusable.
    #[error("Invalid display name: {0}")]
    InvalidDisplayName(&'static str),

    /// The event lacks a required field.
    #[error("Malformed event: {0}")]
    Malformed(&'static str),

    /// The message was rejected by the router.
    #[error(transparent)]
    Router(#[from] RouterError),
}

impl HubError {
    /// Protocol error code reported to the client.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            HubError::Malformed(_) | HubError::Router(RouterError::Malformed(_)) => {
                error_code::MALFORMED_EVENT
            }
            HubError::Router(RouterError::TooLarge { .. }) => error_code::MESSAGE_TOO_LARGE,
            HubError::Router(RouterError::UnknownSender(_)) => error_code::UNKNOWN_SENDER,
            HubError::NotIdentified => error_code::NOT_IDENTIFIED,
            HubError::InvalidDisplayName(_) => error_code::INVALID_DISPLAY_NAME,
            HubError::Stopped
            | HubError::ConnectionLimit(_)
            | HubError::DuplicateConnection(_)
            | HubError::UnknownConnection(_) => error_code::INTERNAL,
        }
    }
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum number of live connections.
    pub max_connections: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Maximum display name length, in characters.
    pub max_display_name_length: usize,
    /// Number of messages whose delivery status is tracked.
    pub tracked_messages: usize,
    /// Message router settings.
    pub router: RouterConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
            outbound_queue_capacity: DEFAULT_OUTBOUND_CAPACITY,
            max_display_name_length: DEFAULT_MAX_DISPLAY_NAME_LENGTH,
            tracked_messages: DEFAULT_TRACKED_MESSAGES,
            router: RouterConfig::default(),
        }
    }
}

/// Hub statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubStats {
    /// Live connections, identified or not.
    pub connections: usize,
    /// Identified connections.
    pub identified: usize,
    /// Connections currently composing.
    pub typing: usize,
    /// Broadcast messages held in the backlog.
    pub backlog: usize,
    /// Messages whose delivery status is tracked.
    pub tracked_messages: usize,
    /// Chat messages routed since start.
    pub messages_routed: u64,
    /// Outbound events dropped because a queue was full.
    pub events_dropped: u64,
}

type Target = (ConnectionId, Peer);

fn lock(gate: &Mutex<()>) -> MutexGuard<'_, ()> {
    gate.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Turn the optional fields of `send_message` into message content.
fn message_content(
    body: Option<String>,
    attachment: Option<Attachment>,
) -> Result<Content, HubError> {
    match (body, attachment) {
        (Some(body), None) => Ok(Content::Text { body }),
        (None, Some(attachment)) => Ok(attachment.into()),
        (None, None) => Err(HubError::Malformed(
            "send_message needs a body or an attachment",
        )),
        (Some(_), Some(_)) => Err(HubError::Malformed(
            "send_message takes a body or an attachment, not both",
        )),
    }
}

/// The presence-and-messaging coordinator.
///
/// A hub is an owned value with an explicit lifecycle: it accepts
/// connections from [`Hub::new`] until [`Hub::shutdown`].
pub struct Hub {
    config: HubConfig,
    peers: DashMap<ConnectionId, Peer>,
    registry: ConnectionRegistry,
    typing: TypingAggregator,
    router: MessageRouter,
    delivery: DeliveryTracker,
    roster_gate: Mutex<()>,
    typing_gate: Mutex<()>,
    message_gate: Mutex<()>,
    status_gate: Mutex<()>,
    running: AtomicBool,
    messages_routed: AtomicU64,
    events_dropped: AtomicU64,
}

impl Hub {
    /// Create a running hub with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HubConfig::default())
    }

    /// Create a running hub with custom configuration.
    #[must_use]
    pub fn with_config(config: HubConfig) -> Self {
        info!(
            max_connections = config.max_connections,
            backlog = config.router.backlog_capacity,
            "Starting hub"
        );
        Self {
            router: MessageRouter::with_config(config.router.clone()),
            delivery: DeliveryTracker::with_capacity(config.tracked_messages),
            config,
            peers: DashMap::new(),
            registry: ConnectionRegistry::new(),
            typing: TypingAggregator::new(),
            roster_gate: Mutex::new(()),
            typing_gate: Mutex::new(()),
            message_gate: Mutex::new(()),
            status_gate: Mutex::new(()),
            running: AtomicBool::new(true),
            messages_routed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the hub: refuse new connections and close every outbound queue.
    ///
    /// Writers see their queue end and close their transports. The backlog
    /// stays readable.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let _roster = lock(&self.roster_gate);
        let _typing = lock(&self.typing_gate);
        let closed = self.peers.len();
        self.peers.clear();
        self.registry.clear();
        self.typing.clear();
        self.delivery.clear();
        info!(connections = closed, "Hub stopped");
    }

    /// Open a connection in the `Connected` state.
    ///
    /// Returns the receiving end of its outbound queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub is stopped, full, or the ID is in use.
    pub fn connect(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<mpsc::Receiver<Arc<ServerEvent>>, HubError> {
        let _roster = lock(&self.roster_gate);
        // Re-checked under the gate: shutdown flips the flag before taking it.
        if !self.is_running() {
            return Err(HubError::Stopped);
        }
        if self.peers.len() >= self.config.max_connections {
            warn!(connection = %connection_id, "Connection limit reached");
            return Err(HubError::ConnectionLimit(self.config.max_connections));
        }

        match self.peers.entry(connection_id.clone()) {
            Entry::Occupied(_) => Err(HubError::DuplicateConnection(connection_id.clone())),
            Entry::Vacant(slot) => {
                let (peer, rx) = Peer::channel(self.config.outbound_queue_capacity);
                slot.insert(peer);
                debug!(connection = %connection_id, "Connected");
                Ok(rx)
            }
        }
    }

    /// Move a connection to `Identified` under `display_name`.
    ///
    /// Everyone identified gets the new user list; everyone else also gets a
    /// `user_joined` notice, and the joiner gets the current typing set.
    /// Identifying again renames the connection without a join notice.
    ///
    /// Returns the user list after the change.
    ///
    /// # Errors
    ///
    /// Returns an error if the display name is invalid or the connection is
    /// closed.
    pub fn identify(
        &self,
        connection_id: &ConnectionId,
        display_name: &str,
    ) -> Result<Vec<UserInfo>, HubError> {
        let name = validate_display_name(display_name, self.config.max_display_name_length)
            .map_err(HubError::InvalidDisplayName)?;

        let (previous, users) = {
            let _roster = lock(&self.roster_gate);
            if !self.peers.contains_key(connection_id) {
                return Err(HubError::UnknownConnection(connection_id.clone()));
            }

            let previous = self.registry.lookup(connection_id);
            let users = self.registry.register(connection_id, name);

            let targets = self.identified_peers();
            self.fan_out(
                &targets,
                &Arc::new(ServerEvent::UserList {
                    users: users.clone(),
                }),
            );

            if previous.is_none() {
                let others: Vec<Target> = targets
                    .into_iter()
                    .filter(|(id, _)| id != connection_id)
                    .collect();
                self.fan_out(
                    &others,
                    &Arc::new(ServerEvent::UserJoined {
                        connection_id: connection_id.clone(),
                        display_name: name.to_string(),
                    }),
                );
            }

            (previous, users)
        };

        match previous {
            None => {
                info!(connection = %connection_id, name = %name, "User joined");
                let _typing = lock(&self.typing_gate);
                self.send_to(
                    connection_id,
                    ServerEvent::Typing {
                        users: self.typing.current_typists(Some(name)),
                    },
                );
            }
            Some(previous) => {
                info!(
                    connection = %connection_id,
                    from = %previous.display_name,
                    to = %name,
                    "User renamed"
                );
                let _typing = lock(&self.typing_gate);
                if self.typing.is_typing(connection_id) {
                    self.typing.set_typing(connection_id, name, true);
                    self.broadcast_typing();
                } else {
                    // The new name may already be in the set under another
                    // connection; the renamer must stop seeing it.
                    self.send_to(
                        connection_id,
                        ServerEvent::Typing {
                            users: self.typing.current_typists(Some(name)),
                        },
                    );
                }
            }
        }

        Ok(users)
    }

    /// Route a chat message from an identified connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the sender is unknown or the content is rejected.
    pub fn send_message(
        &self,
        sender_id: &ConnectionId,
        content: Content,
        recipient_id: Option<ConnectionId>,
    ) -> Result<Arc<ChatMessage>, HubError> {
        let _order = lock(&self.message_gate);

        let routed = self
            .router
            .submit(&self.registry, sender_id, content, recipient_id)?;
        self.delivery.track(&routed.message);
        self.messages_routed.fetch_add(1, Ordering::Relaxed);

        let targets = match &routed.delivery {
            Delivery::Everyone => self.identified_peers(),
            Delivery::SenderOnly => self.peers_of([sender_id.clone()]),
            Delivery::SenderAndRecipient(recipient) => {
                self.peers_of([sender_id.clone(), recipient.clone()])
            }
        };

        let event = Arc::new(ServerEvent::Message {
            message: routed.message.as_ref().clone(),
        });
        let queued = self.fan_out(&targets, &event);

        debug!(
            id = routed.message.id,
            sender = %sender_id,
            scope = ?routed.message.scope,
            recipients = queued,
            "Message delivered"
        );
        Ok(routed.message)
    }

    /// Record a typing start or stop and re-broadcast the typing set.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection has not identified.
    pub fn set_typing(&self, connection_id: &ConnectionId, is_typing: bool) -> Result<(), HubError> {
        let user = self
            .registry
            .lookup(connection_id)
            .ok_or(HubError::NotIdentified)?;
        self.update_typing(connection_id, &user.display_name, is_typing);
        Ok(())
    }

    fn update_typing(&self, connection_id: &ConnectionId, display_name: &str, is_typing: bool) {
        let _typing = lock(&self.typing_gate);
        // A connection that left meanwhile must not reappear in the set.
        if is_typing && !self.registry.is_registered(connection_id) {
            return;
        }
        self.typing.set_typing(connection_id, display_name, is_typing);
        self.broadcast_typing();
    }

    /// Push the typing set to every identified connection, each without its
    /// own name. Callers hold the typing gate.
    fn broadcast_typing(&self) {
        let typists = self.typing.current_typists(None);
        for user in self.registry.snapshot() {
            let Some(peer) = self.peer(&user.connection_id) else {
                continue;
            };
            let users: Vec<String> = typists
                .iter()
                .filter(|name| **name != user.display_name)
                .cloned()
                .collect();
            self.fan_out(
                &[(user.connection_id, peer)],
                &Arc::new(ServerEvent::Typing { users }),
            );
        }
    }

    /// Acknowledge receipt of a message.
    ///
    /// Returns the new status if it changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection has not identified.
    pub fn ack_delivered(
        &self,
        connection_id: &ConnectionId,
        message_id: MessageId,
    ) -> Result<Option<DeliveryStatus>, HubError> {
        self.acknowledge(connection_id, message_id, |tracker| {
            tracker.mark_delivered(message_id, connection_id)
        })
    }

    /// Acknowledge that a message was read.
    ///
    /// Returns the new status if it changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection has not identified.
    pub fn ack_read(
        &self,
        connection_id: &ConnectionId,
        message_id: MessageId,
    ) -> Result<Option<DeliveryStatus>, HubError> {
        self.acknowledge(connection_id, message_id, |tracker| {
            tracker.mark_read(message_id, connection_id)
        })
    }

    fn acknowledge(
        &self,
        connection_id: &ConnectionId,
        message_id: MessageId,
        mark: impl FnOnce(&DeliveryTracker) -> Option<StatusChange>,
    ) -> Result<Option<DeliveryStatus>, HubError> {
        if !self.registry.is_registered(connection_id) {
            return Err(HubError::NotIdentified);
        }

        // Held until the update is queued, so the sender never sees a
        // status older than one it already got.
        let _status = lock(&self.status_gate);
        let Some(change) = mark(&self.delivery) else {
            return Ok(None);
        };

        // The sender recorded with the message is the only target.
        if self.registry.is_registered(&change.sender_id) {
            self.send_to(
                &change.sender_id,
                ServerEvent::StatusUpdate {
                    message_id,
                    status: change.status,
                },
            );
        } else {
            trace!(id = message_id, sender = %change.sender_id, "Sender gone, status not pushed");
        }

        Ok(Some(change.status))
    }

    /// Dispatch one inbound event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event is rejected; the connection stays open.
    pub fn dispatch(&self, connection_id: &ConnectionId, event: ClientEvent) -> Result<(), HubError> {
        if !self.peers.contains_key(connection_id) {
            return Err(HubError::UnknownConnection(connection_id.clone()));
        }
        trace!(connection = %connection_id, event = event.kind(), "Dispatch");

        match event {
            ClientEvent::Ping { timestamp } => {
                self.send_to(connection_id, ServerEvent::Pong { timestamp });
                Ok(())
            }
            ClientEvent::Identify { display_name } => {
                self.identify(connection_id, &display_name).map(|_| ())
            }
            _ if !self.registry.is_registered(connection_id) => {
                debug!(connection = %connection_id, "Event before identify rejected");
                Err(HubError::NotIdentified)
            }
            ClientEvent::SendMessage {
                body,
                attachment,
                to,
            } => {
                let content = message_content(body, attachment)?;
                self.send_message(connection_id, content, to).map(|_| ())
            }
            ClientEvent::Typing { is_typing } => self.set_typing(connection_id, is_typing),
            ClientEvent::AckDelivered { message_id } => {
                self.ack_delivered(connection_id, message_id).map(|_| ())
            }
            ClientEvent::AckRead { message_id } => {
                self.ack_read(connection_id, message_id).map(|_| ())
            }
        }
    }

    /// Close a connection. Safe to call any number of times.
    ///
    /// If it had identified, everyone left gets the new user list, a
    /// `user_left` notice and the typing set. Returns the departed identity.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> Option<UserInfo> {
        let had_peer = self.peers.remove(connection_id).is_some();

        let departed = {
            let _roster = lock(&self.roster_gate);
            let (removed, users) = self.registry.unregister(connection_id);
            if let Some(user) = &removed {
                let targets = self.identified_peers();
                self.fan_out(&targets, &Arc::new(ServerEvent::UserList { users }));
                self.fan_out(
                    &targets,
                    &Arc::new(ServerEvent::UserLeft {
                        connection_id: user.connection_id.clone(),
                        display_name: user.display_name.clone(),
                    }),
                );
            }
            removed
        };

        match &departed {
            Some(user) => {
                let _typing = lock(&self.typing_gate);
                self.typing.remove(connection_id);
                self.broadcast_typing();
                info!(connection = %connection_id, name = %user.display_name, "User left");
            }
            None if had_peer => {
                debug!(connection = %connection_id, "Unidentified connection closed");
            }
            None => {}
        }

        departed
    }

    /// Queue an event for one connection.
    ///
    /// Returns `false` if the connection is gone or its queue is full.
    pub fn send_to(&self, connection_id: &ConnectionId, event: ServerEvent) -> bool {
        match self.peer(connection_id) {
            Some(peer) => self.fan_out(&[(connection_id.clone(), peer)], &Arc::new(event)) == 1,
            None => false,
        }
    }

    fn peer(&self, connection_id: &ConnectionId) -> Option<Peer> {
        self.peers.get(connection_id).map(|p| p.value().clone())
    }

    fn peers_of(&self, ids: impl IntoIterator<Item = ConnectionId>) -> Vec<Target> {
        let mut targets: Vec<Target> = Vec::new();
        for id in ids {
            if targets.iter().any(|(seen, _)| *seen == id) {
                continue;
            }
            if let Some(peer) = self.peer(&id) {
                targets.push((id, peer));
            }
        }
        targets
    }

    fn identified_peers(&self) -> Vec<Target> {
        self.registry
            .connection_ids()
            .into_iter()
            .filter_map(|id| self.peer(&id).map(|peer| (id, peer)))
            .collect()
    }

    /// Push `event` to every target without waiting. Returns how many
    /// queued it.
    fn fan_out(&self, targets: &[Target], event: &Arc<ServerEvent>) -> usize {
        let mut queued = 0;
        for (id, peer) in targets {
            match peer.push(Arc::clone(event)) {
                PushOutcome::Queued => queued += 1,
                PushOutcome::Dropped => {
                    self.events_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(connection = %id, event = event.kind(), "Outbound queue full, event dropped");
                }
                PushOutcome::Closed => {
                    trace!(connection = %id, event = event.kind(), "Target already closed");
                }
            }
        }
        queued
    }

    /// Current online users, in join order.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserInfo> {
        self.registry.snapshot()
    }

    /// Recent broadcast messages, oldest first.
    #[must_use]
    pub fn backlog(&self) -> Vec<Arc<ChatMessage>> {
        self.router.backlog()
    }

    /// Display names of everyone composing.
    #[must_use]
    pub fn typists(&self) -> Vec<String> {
        self.typing.current_typists(None)
    }

    /// Delivery status of a tracked message.
    #[must_use]
    pub fn delivery_status(&self, message_id: MessageId) -> Option<DeliveryStatus> {
        self.delivery.status(message_id)
    }

    #[must_use]
    pub fn is_identified(&self, connection_id: &ConnectionId) -> bool {
        self.registry.is_registered(connection_id)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.peers.len()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.peers.len(),
            identified: self.registry.len(),
            typing: self.typing.len(),
            backlog: self.router.backlog_len(),
            tracked_messages: self.delivery.len(),
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
