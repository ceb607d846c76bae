//! Client error types.

use thiserror::Error;
use wirecall_protocol::ProtocolError;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected")]
    NotConnected,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server refused the request type (NACK). The exchange completed
    /// cleanly, so the connection remains usable.
    #[error("request rejected by server: {0}")]
    Rejected(String),

    /// The handler reported an error in the trailing ERR frame. The
    /// exchange completed cleanly, so the connection remains usable.
    #[error("handler error: {0}")]
    Handler(String),
}

impl ClientError {
    /// Returns whether the call failed because the deadline expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ClientError::Protocol(ProtocolError::Timeout))
    }

    /// Returns whether the failure closed the connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ClientError::Rejected(_) | ClientError::Handler(_))
    }
}
