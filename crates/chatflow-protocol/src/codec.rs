//! Codecs for hub events.
//!
//! Binary frames use MessagePack with a length prefix; text frames are plain JSON.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which codec a connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// JSON in text frames.
    #[default]
    Json,
    /// Length-prefixed MessagePack in binary frames.
    MessagePack,
}

impl WireFormat {
    /// Parse the `format` query parameter of the upgrade request.
    #[must_use]
    pub fn from_param(param: Option<&str>) -> Self {
        match param {
            Some("msgpack") | Some("messagepack") => WireFormat::MessagePack,
            _ => WireFormat::Json,
        }
    }

    /// Short label, as used in logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Json => "json",
            WireFormat::MessagePack => "msgpack",
        }
    }
}

/// Encode a value to a length-prefixed MessagePack frame.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded value (named fields)
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(value, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a value into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into<T: Serialize>(value: &T, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = rmp_serde::to_vec_named(value)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a single frame from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    Ok(rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(value))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
/// A frame that fails to deserialize is still consumed, so the caller can
/// reject it and carry on with the next one.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from<T: DeserializeOwned>(buf: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    Ok(Some(rmp_serde::from_slice(&payload)?))
}

/// Encode a value as a JSON text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_json<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a JSON text frame.
///
/// # Errors
///
/// Returns an error if the text is not a valid event.
pub fn decode_json<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ClientEvent, ServerEvent};
    use crate::model::{ChatMessage, Content, Scope};

    #[test]
    fn test_message_event_survives_msgpack() {
        let event = ServerEvent::Message {
            message: ChatMessage {
                id: 42,
                sender_id: "conn-a".into(),
                sender: "alice".into(),
                content: Content::Attachment {
                    filename: "cat.png".into(),
                    url: "http://localhost/files/cat.png".into(),
                },
                created_at: 1_700_000_000_000,
                scope: Scope::Broadcast,
                recipient_id: None,
            },
        };

        let encoded = encode(&event).unwrap();
        let decoded: ServerEvent = decode(&encoded).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&ClientEvent::identify("alice")).unwrap();

        match decode::<ClientEvent>(&encoded[..5]) {
            Err(ProtocolError::Incomplete(_)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_oversized_length_prefix() {
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_FRAME_SIZE + 1) as u32);

        match decode_from::<ClientEvent>(&mut buf) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_streaming_decode() {
        let first = ClientEvent::identify("alice");
        let second = ClientEvent::typing(true);

        let mut buf = BytesMut::new();
        encode_into(&first, &mut buf).unwrap();
        encode_into(&second, &mut buf).unwrap();
        // Half of a third frame.
        let third = encode(&ClientEvent::text("hi")).unwrap();
        buf.extend_from_slice(&third[..3]);

        assert_eq!(decode_from::<ClientEvent>(&mut buf).unwrap(), Some(first));
        assert_eq!(decode_from::<ClientEvent>(&mut buf).unwrap(), Some(second));
        assert_eq!(decode_from::<ClientEvent>(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_bad_frame_is_consumed() {
        let mut buf = BytesMut::new();
        encode_into(&serde_json::json!({"type": "nope"}), &mut buf).unwrap();
        encode_into(&ClientEvent::typing(false), &mut buf).unwrap();

        assert!(decode_from::<ClientEvent>(&mut buf).is_err());
        assert_eq!(
            decode_from::<ClientEvent>(&mut buf).unwrap(),
            Some(ClientEvent::typing(false))
        );
    }

    #[test]
    fn test_json_text_frames() {
        let event: ClientEvent = decode_json(r#"{"type":"typing","is_typing":true}"#).unwrap();
        assert_eq!(event, ClientEvent::typing(true));

        let text = encode_json(&ServerEvent::Pong { timestamp: Some(5) }).unwrap();
        assert_eq!(text, r#"{"type":"pong","timestamp":5}"#);

        assert!(matches!(
            decode_json::<ClientEvent>("{not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_wire_format_param() {
        assert_eq!(WireFormat::from_param(Some("msgpack")), WireFormat::MessagePack);
        assert_eq!(WireFormat::from_param(Some("json")), WireFormat::Json);
        assert_eq!(WireFormat::from_param(None), WireFormat::Json);
        assert_eq!(WireFormat::MessagePack.as_str(), "msgpack");
    }
}
