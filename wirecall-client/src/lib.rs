//! # wirecall-client
//!
//! Synchronous RPC client for wirecall.
//!
//! A [`Client`] owns one connection and issues blocking calls with a
//! per-call deadline that is recomputed between every wire step, so the
//! whole exchange is bounded by a single timeout.

pub mod client;
pub mod error;

pub use client::Client;
pub use error::ClientError;
