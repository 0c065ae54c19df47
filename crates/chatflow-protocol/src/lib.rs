//! # chatflow-protocol
//!
//! Wire definitions shared by the ChatFlow hub and its clients.
//!
//! Events travel either as JSON text frames or as length-prefixed
//! MessagePack binary frames. Both carry the same `type`-tagged shapes.
//!
//! ## Events
//!
//! - [`ClientEvent`] - what a client may send (`identify`, `send_message`, ...)
//! - [`ServerEvent`] - what the hub pushes back (`user_list`, `message`, ...)
//!
//! ## Example
//!
//! ```rust
//! use chatflow_protocol::{codec, ClientEvent};
//!
//! let event = ClientEvent::identify("alice");
//!
//! let encoded = codec::encode(&event).unwrap();
//! let decoded: ClientEvent = codec::decode(&encoded).unwrap();
//! assert_eq!(event, decoded);
//! ```

pub mod codec;
pub mod events;
pub mod model;

pub use codec::{decode, encode, ProtocolError, WireFormat};
pub use events::{error_code, ClientEvent, ServerEvent};
pub use model::{
    Attachment, ChatMessage, ConnectionId, Content, DeliveryStatus, MessageId, Scope, UserInfo,
};

/// Protocol version announced in the `connected` event.
pub const PROTOCOL_VERSION: u8 = 1;
