//! # chatflow-core
//!
//! Presence, message routing, typing aggregation and delivery tracking for
//! the ChatFlow hub.
//!
//! - **Registry** - Who is online, in join order
//! - **Router** - Stamps messages and picks their audience; keeps a backlog
//! - **Typing** - Who is composing right now
//! - **Delivery** - Monotonic `sent → delivered → read` status per message
//! - **Hub** - Connection lifecycle and fan-out to outbound queues
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│     Hub     │────▶│   Router    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲              │    │    │
//!        │              ▼    ▼    ▼
//!  ┌───────────┐  Registry Typing Delivery
//!  │ Peer queue│◀─────── fan-out
//!  └───────────┘
//! ```
//!
//! ```
//! use chatflow_core::Hub;
//! use chatflow_protocol::{ClientEvent, ConnectionId};
//!
//! let hub = Hub::new();
//! let alice = ConnectionId::from("conn-a");
//! let mut outbound = hub.connect(&alice).unwrap();
//!
//! hub.dispatch(&alice, ClientEvent::identify("alice")).unwrap();
//! hub.dispatch(&alice, ClientEvent::text("hello")).unwrap();
//!
//! assert_eq!(hub.online_users().len(), 1);
//! assert_eq!(hub.backlog().len(), 1);
//! assert!(outbound.try_recv().is_ok());
//! ```

pub mod delivery;
pub mod hub;
pub mod message;
pub mod peer;
pub mod registry;
pub mod router;
pub mod typing;

pub use delivery::{DeliveryTracker, StatusChange};
pub use hub::{Hub, HubConfig, HubError, HubStats};
pub use message::MessageStamper;
pub use peer::{Peer, PushOutcome};
pub use registry::{validate_display_name, ConnectionRegistry};
pub use router::{Delivery, MessageRouter, Routed, RouterConfig, RouterError};
pub use typing::TypingAggregator;
