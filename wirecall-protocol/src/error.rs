//! Protocol error types.

use crate::code::Code;
use thiserror::Error;

/// Errors surfaced by the transport and the frame codec.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The per-call deadline expired before the operation completed.
    #[error("operation timed out")]
    Timeout,

    /// The peer closed the connection before sending any byte of the
    /// current frame.
    #[error("peer is not connected")]
    NotConnected,

    /// The peer closed the connection in the middle of a frame, or a send
    /// observed a broken pipe.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// A frame carried a different code than the protocol state expects.
    #[error("received {} ({got}) instead of {} ({})", Code::name_of(*.got), .expected.name(), .expected.as_u32())]
    UnexpectedCode { got: u32, expected: Code },

    /// A payload failed to parse.
    #[error("decode error: {0}")]
    Decode(String),

    /// A payload failed to serialize.
    #[error("encode error: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns whether this error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProtocolError::Timeout)
    }

    /// Returns whether the peer went away (cleanly or mid-frame).
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ProtocolError::NotConnected | ProtocolError::ConnectionReset
        )
    }
}
