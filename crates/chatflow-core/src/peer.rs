//! Outbound queues of live connections.

use chatflow_protocol::ServerEvent;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default per-connection outbound queue capacity.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Result of pushing one event to one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The event is queued for the connection's writer.
    Queued,
    /// The queue was full; the event was dropped for this peer only.
    Dropped,
    /// The connection is gone.
    Closed,
}

/// Sending half of a connection's bounded outbound queue.
///
/// Pushing never waits: a slow consumer loses events instead of stalling
/// the hub.
#[derive(Debug, Clone)]
pub struct Peer {
    tx: mpsc::Sender<Arc<ServerEvent>>,
}

impl Peer {
    /// Create a peer and the receiver its writer task drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<ServerEvent>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue an event without waiting.
    pub fn push(&self, event: Arc<ServerEvent>) -> PushOutcome {
        match self.tx.try_send(event) {
            Ok(()) => PushOutcome::Queued,
            Err(TrySendError::Full(_)) => PushOutcome::Dropped,
            Err(TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong() -> Arc<ServerEvent> {
        Arc::new(ServerEvent::Pong { timestamp: None })
    }

    #[tokio::test]
    async fn test_push_and_receive() {
        let (peer, mut rx) = Peer::channel(4);
        assert_eq!(peer.push(pong()), PushOutcome::Queued);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "pong");
    }

    #[test]
    fn test_full_queue_drops() {
        let (peer, _rx) = Peer::channel(1);
        assert_eq!(peer.push(pong()), PushOutcome::Queued);
        assert_eq!(peer.push(pong()), PushOutcome::Dropped);
    }

    #[test]
    fn test_closed_queue() {
        let (peer, rx) = Peer::channel(1);
        drop(rx);
        assert!(peer.is_closed());
        assert_eq!(peer.push(pong()), PushOutcome::Closed);
    }
}
