//! # wirecall-protocol
//!
//! Wire protocol implementation for wirecall.
//!
//! This crate provides:
//! - The code-tagged, length-delimited frame format
//! - Deadline-aware blocking send/receive over TCP and Unix stream sockets
//! - Listener and connector factories for all supported endpoint families
//! - The string-map metadata codec
//! - The [`Message`] codec seam that keeps payload serialization pluggable

pub mod code;
pub mod error;
pub mod frame;
pub mod message;
pub mod metadata;
pub mod net;
pub mod transport;

pub use code::Code;
pub use error::ProtocolError;
pub use message::Message;
pub use metadata::Metadata;
pub use net::{Endpoint, Listener};
pub use transport::Stream;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: i32 = 512;
