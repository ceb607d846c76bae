//! Safe wrapper over the epoll readiness facility.
//!
//! Client descriptors are armed one-shot: a descriptor fires at most once
//! until explicitly re-armed with [`Epoll::modify`]. That discipline is
//! what serializes workers on a connection, so every re-arm must happen
//! only after the owning callback has returned.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// Interest for the listening descriptor (level-triggered).
pub(crate) const LISTENER: u32 = libc::EPOLLIN as u32;

/// Interest while a connection waits for the next inbound frame.
pub(crate) const READ_ONESHOT: u32 =
    (libc::EPOLLIN | libc::EPOLLRDHUP | libc::EPOLLONESHOT) as u32;

/// Interest while a connection has frames to send.
pub(crate) const WRITE_ONESHOT: u32 =
    (libc::EPOLLIN | libc::EPOLLOUT | libc::EPOLLRDHUP | libc::EPOLLONESHOT) as u32;

/// Returns whether the event bits dispatch as a read.
///
/// Hangup and error conditions ride the read path so the state machine
/// observes them as a failed receive and tears the connection down.
pub(crate) fn is_read_event(events: u32) -> bool {
    events & (libc::EPOLLIN | libc::EPOLLHUP | libc::EPOLLRDHUP | libc::EPOLLERR) as u32 != 0
}

/// Returns whether the event bits dispatch as a write.
pub(crate) fn is_write_event(events: u32) -> bool {
    events & libc::EPOLLOUT as u32 != 0
}

/// An owned epoll instance.
#[derive(Debug)]
pub(crate) struct Epoll {
    fd: OwnedFd,
}

impl Epoll {
    pub(crate) fn new() -> io::Result<Self> {
        // SAFETY: plain epoll creation; the result is checked below.
        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `raw` was just created and is owned by no one else.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(raw) },
        })
    }

    pub(crate) fn add(&self, fd: RawFd, events: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, events)
    }

    pub(crate) fn modify(&self, fd: RawFd, events: u32) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, events)
    }

    pub(crate) fn delete(&self, fd: RawFd) -> io::Result<()> {
        // SAFETY: a null event pointer is valid for EPOLL_CTL_DEL.
        let rc = unsafe {
            libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut())
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Waits for events, filling `events` and returning the ready count.
    ///
    /// Returns `Ok(0)` on timeout; `EINTR` is surfaced as an
    /// `Interrupted` error for the caller to retry.
    pub(crate) fn wait(
        &self,
        events: &mut [libc::epoll_event],
        timeout_ms: i32,
    ) -> io::Result<usize> {
        // SAFETY: `events` points to a writable buffer of the given
        // length for the duration of the call.
        let rc = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                events.as_mut_ptr(),
                events.len() as libc::c_int,
                timeout_ms,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rc as usize)
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        // SAFETY: `event` is a valid epoll_event for the duration of the
        // call; concurrent epoll_ctl calls on one instance are safe.
        let rc = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
