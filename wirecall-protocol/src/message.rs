//! The payload codec seam.
//!
//! The engine moves opaque byte strings; what those bytes mean is decided
//! by [`Message`] implementations. Any serializer works as long as it can
//! name its types stably and turn values into bytes and back. Handlers are
//! looked up by [`Message::TYPE_NAME`], so the name must be unique across
//! all request types bound on one server.

use crate::error::ProtocolError;

/// A typed payload that can travel as a request or response body.
pub trait Message: Sized {
    /// Stable, globally unique type name. Sent as the REQ_NAME frame and
    /// used as the handler registry key.
    const TYPE_NAME: &'static str;

    /// Serializes the message. An empty byte string is a valid encoding.
    fn encode(&self) -> Result<Vec<u8>, ProtocolError>;

    /// Parses a message from its serialized form.
    fn decode(bytes: &[u8]) -> Result<Self, ProtocolError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal hand-rolled codec: the message is its own bytes.
    #[derive(Debug, PartialEq)]
    struct RawBytes(Vec<u8>);

    impl Message for RawBytes {
        const TYPE_NAME: &'static str = "test.RawBytes";

        fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
            Ok(self.0.clone())
        }

        fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
            Ok(RawBytes(bytes.to_vec()))
        }
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = RawBytes(b"payload".to_vec());
        let encoded = msg.encode().unwrap();
        assert_eq!(RawBytes::decode(&encoded).unwrap(), msg);
        assert_eq!(RawBytes::TYPE_NAME, "test.RawBytes");
    }

    #[test]
    fn test_empty_encoding_is_valid() {
        let msg = RawBytes(Vec::new());
        assert!(msg.encode().unwrap().is_empty());
        assert_eq!(RawBytes::decode(&[]).unwrap(), msg);
    }
}
