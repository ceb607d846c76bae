//! Server error types.

use thiserror::Error;
use wirecall_protocol::ProtocolError;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("handler already bound for request '{0}'")]
    DuplicateHandler(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("server is already running")]
    Running,

    #[error("connection is in an unexpected {0} state")]
    UnexpectedState(&'static str),
}
