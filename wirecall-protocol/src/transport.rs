//! Deadline-aware blocking socket transport.
//!
//! [`Stream`] wraps a connected TCP or Unix stream socket and provides
//! `send_all`/`recv_exact` primitives that transfer an exact byte count or
//! fail. A deadline of `None` blocks indefinitely (the server's worker
//! threads rely on this together with the idle sweeper); `Some(instant)`
//! bounds every readiness wait with the remaining time, re-armed after
//! `EINTR` and `EAGAIN`.

use crate::error::ProtocolError;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Instant;

/// A connected stream socket, either TCP or Unix domain.
#[derive(Debug)]
pub enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Stream {
    /// Receives exactly `buf.len()` bytes.
    ///
    /// A zero-byte read before the first byte maps to `NotConnected`
    /// (the peer closed cleanly before speaking); after at least one byte
    /// it maps to `ConnectionReset`.
    pub fn recv_exact(
        &self,
        buf: &mut [u8],
        deadline: Option<Instant>,
    ) -> Result<(), ProtocolError> {
        let mut received = 0usize;
        while received < buf.len() {
            if let Some(deadline) = deadline {
                wait_ready(self.as_raw_fd(), libc::POLLIN, deadline)?;
            }
            match self.read_once(&mut buf[received..]) {
                Ok(0) => {
                    return Err(if received == 0 {
                        ProtocolError::NotConnected
                    } else {
                        ProtocolError::ConnectionReset
                    });
                }
                Ok(n) => received += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(map_io_recv(e)),
            }
        }
        Ok(())
    }

    /// Sends all of `buf`, looping over short writes.
    pub fn send_all(&self, buf: &[u8], deadline: Option<Instant>) -> Result<(), ProtocolError> {
        let mut sent = 0usize;
        while sent < buf.len() {
            if let Some(deadline) = deadline {
                wait_ready(self.as_raw_fd(), libc::POLLOUT, deadline)?;
            }
            match self.write_once(&buf[sent..]) {
                Ok(0) => return Err(ProtocolError::ConnectionReset),
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(map_io_send(e)),
            }
        }
        Ok(())
    }

    fn read_once(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => (&*s).read(buf),
            Stream::Unix(s) => (&*s).read(buf),
        }
    }

    fn write_once(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => (&*s).write(buf),
            Stream::Unix(s) => (&*s).write(buf),
        }
    }
}

impl AsRawFd for Stream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Stream::Tcp(s) => s.as_raw_fd(),
            Stream::Unix(s) => s.as_raw_fd(),
        }
    }
}

/// Waits until `fd` is ready for `events` or the deadline expires.
///
/// `EINTR` retries with the remaining time only; a `poll` expiry slightly
/// before the deadline re-enters the wait so the deadline itself is
/// authoritative.
fn wait_ready(fd: RawFd, events: libc::c_short, deadline: Instant) -> Result<(), ProtocolError> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ProtocolError::Timeout);
        }
        let timeout_ms = remaining.as_millis().min(i32::MAX as u128) as i32;
        // Sub-millisecond remainders round up so poll never spins at 0.
        let timeout_ms = timeout_ms.max(1);

        let mut pollfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };
        // SAFETY: `pollfd` points to one valid struct for the duration of
        // the call.
        let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(ProtocolError::Io(err));
        }
        if rc == 0 {
            // poll may expire a tick early; the loop head settles it.
            continue;
        }
        return Ok(());
    }
}

fn map_io_recv(err: io::Error) -> ProtocolError {
    match err.kind() {
        io::ErrorKind::ConnectionReset => ProtocolError::ConnectionReset,
        io::ErrorKind::NotConnected => ProtocolError::NotConnected,
        _ => ProtocolError::Io(err),
    }
}

fn map_io_send(err: io::Error) -> ProtocolError {
    match err.kind() {
        // A peer that went away mid-conversation shows up as EPIPE or
        // ECONNRESET on the send path; both fold into ConnectionReset.
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => {
            ProtocolError::ConnectionReset
        }
        io::ErrorKind::NotConnected => ProtocolError::NotConnected,
        _ => ProtocolError::Io(err),
    }
}
