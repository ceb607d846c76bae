//! Frame codec: code-tagged, length-delimited units over a [`Stream`].
//!
//! Wire layout (all integers u32 network byte order):
//!
//! ```text
//! control frame:  +------+
//!                 | code |
//!                 +------+
//! data frame:     +------+-----+--------------+
//!                 | code | len | len bytes    |
//!                 +------+-----+--------------+
//! ```
//!
//! A zero-length payload is valid and encoded as code + len only. No frame
//! spans multiple calls.

use crate::code::Code;
use crate::error::ProtocolError;
use crate::metadata::{self, Metadata};
use crate::transport::Stream;
use bytes::{BufMut, BytesMut};
use std::time::Instant;

/// Encodes a data frame into a single buffer.
pub fn encode_data(code: Code, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(8 + payload.len());
    buf.put_u32(code.as_u32());
    buf.put_u32(payload.len() as u32);
    if !payload.is_empty() {
        buf.put_slice(payload);
    }
    buf
}

/// Sends a bare control code.
pub fn send_code(
    stream: &Stream,
    code: Code,
    deadline: Option<Instant>,
) -> Result<(), ProtocolError> {
    stream.send_all(&code.as_u32().to_be_bytes(), deadline)
}

/// Receives a control code without validating it.
///
/// Used where the protocol branches on the received value (ACK vs NACK).
pub fn recv_code_raw(stream: &Stream, deadline: Option<Instant>) -> Result<u32, ProtocolError> {
    let mut buf = [0u8; 4];
    stream.recv_exact(&mut buf, deadline)?;
    Ok(u32::from_be_bytes(buf))
}

/// Receives a control code and fails unless it matches `expected`.
pub fn recv_code(
    stream: &Stream,
    expected: Code,
    deadline: Option<Instant>,
) -> Result<(), ProtocolError> {
    let got = recv_code_raw(stream, deadline)?;
    if got != expected.as_u32() {
        return Err(ProtocolError::UnexpectedCode { got, expected });
    }
    Ok(())
}

/// Sends a data frame: code, length, payload.
pub fn send_data(
    stream: &Stream,
    code: Code,
    payload: &[u8],
    deadline: Option<Instant>,
) -> Result<(), ProtocolError> {
    stream.send_all(&encode_data(code, payload), deadline)
}

/// Receives a data frame tagged `expected` and returns its payload.
///
/// Once the code has been read the frame is in flight, so a clean peer
/// close while reading the length or payload reports `ConnectionReset`
/// rather than `NotConnected`.
pub fn recv_data(
    stream: &Stream,
    expected: Code,
    deadline: Option<Instant>,
) -> Result<Vec<u8>, ProtocolError> {
    recv_code(stream, expected, deadline)?;

    let mut len_buf = [0u8; 4];
    stream
        .recv_exact(&mut len_buf, deadline)
        .map_err(mid_frame)?;
    let len = u32::from_be_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.recv_exact(&mut payload, deadline).map_err(mid_frame)?;
    }
    Ok(payload)
}

/// Sends a metadata map as a METADATA data frame.
pub fn send_metadata(
    stream: &Stream,
    metadata: &Metadata,
    deadline: Option<Instant>,
) -> Result<(), ProtocolError> {
    send_data(stream, Code::Metadata, &metadata::encode(metadata), deadline)
}

/// Receives a METADATA data frame and parses the map.
pub fn recv_metadata(
    stream: &Stream,
    deadline: Option<Instant>,
) -> Result<Metadata, ProtocolError> {
    let payload = recv_data(stream, Code::Metadata, deadline)?;
    metadata::decode(&payload)
}

fn mid_frame(err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::NotConnected => ProtocolError::ConnectionReset,
        other => other,
    }
}
